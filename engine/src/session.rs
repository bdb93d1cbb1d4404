//! Long-lived scheduler session for one `(namespace, name)` schedule.
//!
//! Each session owns a [`SchedulerEngine`] and a background worker that
//! re-evaluates the schedule shortly before the previous one expires. The
//! worker also honours manual overrides and configuration reloads:
//!
//! - a manual override freezes evaluation until its deadline passes;
//! - a configuration reload swaps in a fresh engine (new ledger, manual
//!   cleared) and wakes the worker immediately;
//! - evaluation failures are logged and backed off, never fatal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use scheduler::SchedulerEngine;

use crate::overrides::partition_payload;

const EVALUATION_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Default)]
struct PublishedState {
    schedule: Option<Value>,
    manual: Option<Value>,
    manual_deadline: Option<Instant>,
}

pub struct SchedulerSession {
    namespace: String,
    name: String,
    engine: tokio::sync::Mutex<SchedulerEngine>,
    state: Mutex<PublishedState>,
    refresh: Notify,
    stopped: AtomicBool,
}

impl SchedulerSession {
    /// Creates the session from the environment (plus an optional config
    /// payload) and starts its worker.
    pub fn spawn(
        namespace: impl Into<String>,
        name: impl Into<String>,
        payload: Option<&Value>,
    ) -> Arc<Self> {
        let namespace = namespace.into();
        let name = name.into();
        let (overrides, bounds) = partition_payload(payload);
        let engine = SchedulerEngine::from_env(&namespace, &name, Some(&overrides), bounds);
        Self::spawn_with_engine(namespace, name, engine)
    }

    /// Starts a session around a pre-built engine. Lets tests drive the
    /// worker with a stubbed forecast source.
    pub fn spawn_with_engine(
        namespace: impl Into<String>,
        name: impl Into<String>,
        engine: SchedulerEngine,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            namespace: namespace.into(),
            name: name.into(),
            engine: tokio::sync::Mutex::new(engine),
            state: Mutex::new(PublishedState::default()),
            refresh: Notify::new(),
            stopped: AtomicBool::new(false),
        });

        tokio::spawn(session.clone().run());
        session.refresh.notify_one();
        session
    }

    /// The currently published schedule: an unexpired manual override wins,
    /// then the last computed decision.
    pub fn get_schedule(&self) -> Option<Value> {
        let state = self.state.lock();
        if let (Some(manual), Some(deadline)) = (&state.manual, state.manual_deadline) {
            if deadline > Instant::now() {
                return Some(manual.clone());
            }
        }
        state.schedule.clone()
    }

    /// Pins `payload` as the active schedule for one validity window. The
    /// payload is echoed to consumers untouched; gauges are updated on a
    /// best-effort parse.
    pub async fn set_manual_override(&self, payload: Value) {
        let engine = self.engine.lock().await;
        let ttl = Duration::from_secs(engine.config().valid_for.max(1));
        engine.publish_manual_metrics(&payload);
        drop(engine);

        let mut state = self.state.lock();
        state.schedule = Some(payload.clone());
        state.manual = Some(payload);
        state.manual_deadline = Some(Instant::now() + ttl);
        drop(state);

        warn!(
            namespace = %self.namespace,
            schedule = %self.name,
            "manual schedule override applied"
        );
        self.refresh.notify_one();
    }

    /// Re-parses configuration and replaces the engine wholesale: fresh
    /// ledger, fresh policy, manual override cleared.
    pub async fn apply_overrides(&self, payload: &Value) {
        info!(
            namespace = %self.namespace,
            schedule = %self.name,
            "applying configuration overrides"
        );
        let (overrides, bounds) = partition_payload(Some(payload));
        let engine =
            SchedulerEngine::from_env(&self.namespace, &self.name, Some(&overrides), bounds);

        *self.engine.lock().await = engine;
        {
            let mut state = self.state.lock();
            state.schedule = None;
            state.manual = None;
            state.manual_deadline = None;
        }
        self.refresh.notify_one();
    }

    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }

    /// Cooperative shutdown: the worker observes the flag on its next wake.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        self.refresh.notify_one();
    }

    fn manual_active(&self) -> bool {
        let state = self.state.lock();
        matches!(
            (&state.manual, state.manual_deadline),
            (Some(_), Some(deadline)) if deadline > Instant::now()
        )
    }

    async fn next_wait(&self) -> Duration {
        let valid_for = self.engine.lock().await.config().valid_for;
        Duration::from_secs(((valid_for as f64 * 0.8) as u64).max(1))
    }

    async fn run(self: Arc<Self>) {
        info!(
            namespace = %self.namespace,
            schedule = %self.name,
            "scheduler session worker started"
        );

        loop {
            let wait = self.next_wait().await;
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.refresh.notified() => {}
            }

            if self.stopped.load(Ordering::Relaxed) {
                break;
            }
            if self.manual_active() {
                continue;
            }

            let evaluation = self.engine.lock().await.evaluate().await;
            match evaluation {
                Ok(decision) => {
                    let mut state = self.state.lock();
                    state.schedule = Some(decision.as_json());
                    state.manual = None;
                    state.manual_deadline = None;
                }
                Err(e) => {
                    error!(
                        namespace = %self.namespace,
                        schedule = %self.name,
                        error = %e,
                        "scheduler iteration failed"
                    );
                    tokio::time::sleep(EVALUATION_BACKOFF).await;
                }
            }
        }

        info!(
            namespace = %self.namespace,
            schedule = %self.name,
            "scheduler session worker stopped"
        );
    }
}
