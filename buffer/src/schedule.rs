//! Schedule snapshot/watch/expiry for the router and consumer.
//!
//! The manager polls the decision engine's schedule endpoint and keeps the
//! latest document behind an atomically swapped `Arc`, so request handlers
//! read a consistent snapshot without blocking. When the document's
//! `validUntil` passes without a refresh, the built-in default schedule
//! takes over.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::metrics;

/// Fallback published while no live schedule is known.
pub fn default_schedule() -> Value {
    json!({
        "flavourWeights": {"precision-100": 60, "precision-50": 30, "precision-30": 10},
        "flavourRules": [
            {"flavourName": "precision-100", "precision": 100, "weight": 60},
            {"flavourName": "precision-50", "precision": 50, "weight": 30},
            {"flavourName": "precision-30", "precision": 30, "weight": 10},
        ],
        "processing": {
            "throttle": 1.0,
            "creditsRatio": 1.0,
            "intensityRatio": 1.0,
            "ceilings": {},
        },
        "validUntil": "2099-12-31T23:59:59Z",
    })
}

#[derive(Clone, Debug, PartialEq)]
pub struct FlavourRule {
    pub name: String,
    pub weight: i64,
    pub deadline_sec: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutingEvaluator {
    Router,
    Consumer,
}

/// Read-side view over a schedule document. Accessors are tolerant: the
/// document may be a computed decision, an operator CR status, or an
/// arbitrary manual override payload.
#[derive(Clone, Debug)]
pub struct TrafficSchedule {
    raw: Value,
}

impl TrafficSchedule {
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    pub fn fallback() -> Self {
        Self::new(default_schedule())
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn flavour_rules(&self) -> Vec<FlavourRule> {
        let Some(rules) = self.raw.get("flavourRules").and_then(Value::as_array) else {
            return Vec::new();
        };
        rules
            .iter()
            .filter_map(|rule| {
                let name = rule.get("flavourName").and_then(Value::as_str)?;
                Some(FlavourRule {
                    name: name.to_string(),
                    weight: rule.get("weight").and_then(Value::as_i64).unwrap_or(0),
                    deadline_sec: rule
                        .get("deadlineSec")
                        .and_then(Value::as_u64)
                        .unwrap_or(60),
                })
            })
            .collect()
    }

    /// Flavours the consumer should keep workers for. Prefers an explicit
    /// `flavours` list (CR form), then enabled `strategies`, then the rules.
    pub fn flavour_names(&self) -> Vec<String> {
        if let Some(entries) = self.raw.get("flavours").and_then(Value::as_array) {
            let names: Vec<String> = entries.iter().filter_map(flavour_entry_name).collect();
            if !names.is_empty() {
                return names;
            }
        }

        if let Some(strategies) = self.raw.get("strategies").and_then(Value::as_array) {
            let names: Vec<String> = strategies
                .iter()
                .filter(|s| s.get("enabled").and_then(Value::as_bool).unwrap_or(true))
                .filter_map(|s| s.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect();
            if !names.is_empty() {
                return names;
            }
        }

        self.flavour_rules().into_iter().map(|r| r.name).collect()
    }

    /// Weights used for a consumer-side re-pick.
    pub fn consumer_weights(&self) -> BTreeMap<String, i64> {
        if let Some(entries) = self.raw.get("flavours").and_then(Value::as_array) {
            let weights: BTreeMap<String, i64> = entries
                .iter()
                .filter_map(|entry| {
                    let name = flavour_entry_name(entry)?;
                    let weight = entry.get("weight").and_then(Value::as_i64)?;
                    Some((name, weight))
                })
                .collect();
            if !weights.is_empty() {
                return weights;
            }
        }

        self.flavour_rules()
            .into_iter()
            .map(|r| (r.name, r.weight))
            .collect()
    }

    /// Throttle factor read from `processingThrottle`, then
    /// `processing.throttle`, defaulting to 1.0 and clamped to `[0, 1]`.
    pub fn throttle_factor(&self) -> f64 {
        let raw = self
            .raw
            .get("processingThrottle")
            .or_else(|| self.raw.get("processing").and_then(|p| p.get("throttle")));
        let factor = match raw {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(1.0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(1.0),
            _ => 1.0,
        };
        factor.clamp(0.0, 1.0)
    }

    /// Absent or unknown evaluators mean the router already picked.
    pub fn routing_evaluator(&self) -> RoutingEvaluator {
        match self.raw.get("routingEvaluator").and_then(Value::as_str) {
            Some(v) if v.eq_ignore_ascii_case("consumer") => RoutingEvaluator::Consumer,
            _ => RoutingEvaluator::Router,
        }
    }

    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        let raw = self.raw.get("validUntil").and_then(Value::as_str)?;
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%SZ")
            .ok()
            .map(|naive| naive.and_utc())
            .or_else(|| {
                DateTime::parse_from_rfc3339(raw)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.valid_until().is_some_and(|until| until <= now)
    }
}

fn flavour_entry_name(entry: &Value) -> Option<String> {
    if let Some(name) = entry.as_str() {
        return Some(name.to_string());
    }
    if let Some(name) = entry.get("name").and_then(Value::as_str) {
        return Some(name.to_string());
    }
    entry
        .get("precision")
        .and_then(Value::as_i64)
        .map(|p| format!("precision-{p}"))
}

pub struct ScheduleManager {
    http: reqwest::Client,
    url: Option<String>,
    poll_interval: Duration,
    current: RwLock<Arc<TrafficSchedule>>,
}

impl ScheduleManager {
    pub fn new(url: Option<String>, poll_interval: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            http,
            url: url.filter(|u| !u.is_empty()),
            poll_interval,
            current: RwLock::new(Arc::new(TrafficSchedule::fallback())),
        }
    }

    /// `SCHEDULE_URL` wins when set; otherwise the URL is composed from the
    /// decision engine's service address and the `TS_NAMESPACE`/`TS_NAME`
    /// session key.
    pub fn from_env() -> Self {
        let url = common::env::var_opt("SCHEDULE_URL").unwrap_or_else(|| {
            let base = common::env::var_str("DECISION_ENGINE_URL", "http://decision-engine");
            let base = base.trim_end_matches('/');
            let namespace = common::env::var_str("TS_NAMESPACE", "default");
            let name = common::env::var_str("TS_NAME", "traffic-schedule");
            format!("{base}/schedule/{namespace}/{name}")
        });
        let poll = common::env::var_f64("SCHEDULE_POLL_SECONDS", 10.0).max(1.0);
        Self::new(Some(url), Duration::from_secs_f64(poll))
    }

    /// A manager pinned to a fixed document; used in tests.
    pub fn with_static(schedule: TrafficSchedule) -> Self {
        let manager = Self::new(None, Duration::from_secs(3600));
        manager.install(schedule);
        manager
    }

    pub fn snapshot(&self) -> Arc<TrafficSchedule> {
        self.current.read().clone()
    }

    pub fn install(&self, schedule: TrafficSchedule) {
        let ttl = schedule
            .valid_until()
            .map(|until| (until - Utc::now()).num_seconds().max(0))
            .unwrap_or(0);
        metrics::SCHEDULE_TTL.set(ttl as f64);
        *self.current.write() = Arc::new(schedule);
    }

    pub async fn load_once(&self) {
        let Some(url) = self.url.clone() else {
            return;
        };
        match self.fetch(&url).await {
            Ok(schedule) => {
                info!(url = %url, "schedule loaded");
                self.install(schedule);
            }
            Err(e) => warn!(url = %url, error = %e, "initial schedule load failed"),
        }
    }

    /// Polls the schedule endpoint until the process exits. Fetch errors
    /// keep the previous snapshot.
    pub async fn watch_forever(self: Arc<Self>) {
        let Some(url) = self.url.clone() else {
            return;
        };
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match self.fetch(&url).await {
                Ok(schedule) => {
                    debug!("schedule refreshed");
                    self.install(schedule);
                }
                Err(e) => warn!(error = %e, "schedule refresh failed; keeping last"),
            }
        }
    }

    /// Reverts to the default schedule when the current one expires.
    pub async fn expiry_guard(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let current = self.snapshot();
            if current.is_expired(Utc::now()) {
                warn!("schedule expired; reverting to default");
                self.install(TrafficSchedule::fallback());
            }
        }
    }

    async fn fetch(&self, url: &str) -> anyhow::Result<TrafficSchedule> {
        let response = self.http.get(url).send().await?;
        // 202 means the engine has not computed anything yet
        if response.status() == reqwest::StatusCode::ACCEPTED {
            anyhow::bail!("schedule pending");
        }
        let body: Value = response.error_for_status()?.json().await?;
        Ok(TrafficSchedule::new(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_parse_with_deadline_defaults() {
        let schedule = TrafficSchedule::fallback();
        let rules = schedule.flavour_rules();
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].name, "precision-100");
        assert_eq!(rules[0].weight, 60);
        assert_eq!(rules[0].deadline_sec, 60);
    }

    #[test]
    fn throttle_prefers_top_level_key() {
        let top = TrafficSchedule::new(json!({
            "processingThrottle": 0.4,
            "processing": {"throttle": 0.9},
        }));
        assert_eq!(top.throttle_factor(), 0.4);

        let nested = TrafficSchedule::new(json!({"processing": {"throttle": 0.9}}));
        assert_eq!(nested.throttle_factor(), 0.9);

        let missing = TrafficSchedule::new(json!({}));
        assert_eq!(missing.throttle_factor(), 1.0);

        let out_of_range = TrafficSchedule::new(json!({"processingThrottle": 7.5}));
        assert_eq!(out_of_range.throttle_factor(), 1.0);
    }

    #[test]
    fn evaluator_defaults_to_router() {
        assert_eq!(
            TrafficSchedule::new(json!({})).routing_evaluator(),
            RoutingEvaluator::Router
        );
        assert_eq!(
            TrafficSchedule::new(json!({"routingEvaluator": "Consumer"})).routing_evaluator(),
            RoutingEvaluator::Consumer
        );
        assert_eq!(
            TrafficSchedule::new(json!({"routingEvaluator": "something-else"}))
                .routing_evaluator(),
            RoutingEvaluator::Router
        );
    }

    #[test]
    fn flavour_names_fall_back_through_the_shapes() {
        let cr_form = TrafficSchedule::new(json!({
            "flavours": [{"precision": 100, "weight": 70}, {"precision": 50, "weight": 30}],
            "flavourRules": [{"flavourName": "ignored", "weight": 1}],
        }));
        assert_eq!(cr_form.flavour_names(), ["precision-100", "precision-50"]);

        let decision_form = TrafficSchedule::new(json!({
            "strategies": [
                {"name": "precision-100", "enabled": true},
                {"name": "precision-30", "enabled": false},
            ],
        }));
        assert_eq!(decision_form.flavour_names(), ["precision-100"]);

        let rules_only = TrafficSchedule::fallback();
        assert_eq!(rules_only.flavour_names().len(), 3);
    }

    #[test]
    fn consumer_weights_use_precision_entries() {
        let schedule = TrafficSchedule::new(json!({
            "flavours": [
                {"precision": 100, "weight": 70},
                {"precision": 50, "weight": 30},
            ],
        }));
        let weights = schedule.consumer_weights();
        assert_eq!(weights["precision-100"], 70);
        assert_eq!(weights["precision-50"], 30);
    }

    #[test]
    fn expiry_detection_handles_both_outcomes() {
        let expired = TrafficSchedule::new(json!({"validUntil": "2020-01-01T00:00:00Z"}));
        assert!(expired.is_expired(Utc::now()));

        let fresh = TrafficSchedule::fallback();
        assert!(!fresh.is_expired(Utc::now()));

        let unparsable = TrafficSchedule::new(json!({"validUntil": "whenever"}));
        assert!(!unparsable.is_expired(Utc::now()));
    }

    #[test]
    fn manager_snapshot_swaps_atomically() {
        let manager = ScheduleManager::with_static(TrafficSchedule::fallback());
        let before = manager.snapshot();
        manager.install(TrafficSchedule::new(json!({
            "flavourRules": [{"flavourName": "precision-100", "weight": 100}],
        })));
        let after = manager.snapshot();

        assert_eq!(before.flavour_rules().len(), 3);
        assert_eq!(after.flavour_rules().len(), 1);
    }
}
