//! Registry of scheduler sessions keyed by `(namespace, name)`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::info;

use crate::error::ScheduleError;
use crate::session::SchedulerSession;

pub struct SchedulerRegistry {
    default_namespace: String,
    default_name: String,
    sessions: Mutex<HashMap<(String, String), Arc<SchedulerSession>>>,
}

impl SchedulerRegistry {
    pub fn new(default_namespace: impl Into<String>, default_name: impl Into<String>) -> Self {
        Self {
            default_namespace: default_namespace.into(),
            default_name: default_name.into(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            common::env::var_str("DEFAULT_SCHEDULE_NAMESPACE", "default"),
            common::env::var_str("DEFAULT_SCHEDULE_NAME", "default"),
        )
    }

    pub fn default_key(&self) -> (String, String) {
        (self.default_namespace.clone(), self.default_name.clone())
    }

    /// Applies a configuration payload, creating the session on first use.
    pub async fn configure(&self, namespace: &str, name: &str, payload: &Value) {
        let session = self.ensure_session(namespace, name, Some(payload));
        let empty = payload.as_object().is_none_or(|m| m.is_empty());
        if empty {
            session.request_refresh();
        } else {
            session.apply_overrides(payload).await;
        }
    }

    pub fn get_schedule(&self, namespace: &str, name: &str) -> Result<Value, ScheduleError> {
        let session = self
            .sessions
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ScheduleError::Unknown {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;

        session.get_schedule().ok_or_else(|| ScheduleError::Pending {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    pub async fn manual_override(&self, namespace: &str, name: &str, payload: Value) {
        let session = self.ensure_session(namespace, name, None);
        session.set_manual_override(payload).await;
    }

    pub fn ensure_default(&self) -> Arc<SchedulerSession> {
        let (namespace, name) = self.default_key();
        self.ensure_session(&namespace, &name, None)
    }

    fn ensure_session(
        &self,
        namespace: &str,
        name: &str,
        payload: Option<&Value>,
    ) -> Arc<SchedulerSession> {
        let key = (namespace.to_string(), name.to_string());
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get(&key) {
            return session.clone();
        }

        info!(namespace, schedule = name, "creating scheduler session");
        let session = SchedulerSession::spawn(namespace, name, payload);
        sessions.insert(key, session.clone());
        session
    }
}
