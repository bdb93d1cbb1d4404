//! Runtime configuration knobs loaded from the environment.

use serde_json::{Value, json};

#[derive(Clone, Debug, PartialEq)]
pub struct SchedulerConfig {
    /// Tolerated average relative error.
    pub target_error: f64,
    pub credit_min: f64,
    pub credit_max: f64,
    /// Number of delta samples kept for the velocity window.
    pub smoothing_window: usize,
    pub policy_name: String,
    /// Seconds each published schedule stays valid.
    pub valid_for: u64,
    /// Seconds between flavour discovery refreshes.
    pub discovery_interval: u64,
    /// `national`, `region:<id>` or `postcode:<pc>`.
    pub carbon_target: String,
    pub carbon_timeout: f64,
    pub carbon_cache_ttl: f64,
    /// Floor for the processing throttle; 1.0 disables throttling.
    pub throttle_min: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            target_error: 0.05,
            credit_min: -0.5,
            credit_max: 0.5,
            smoothing_window: 300,
            policy_name: "credit-greedy".to_string(),
            valid_for: 60,
            discovery_interval: 60,
            carbon_target: "national".to_string(),
            carbon_timeout: 2.0,
            carbon_cache_ttl: 300.0,
            throttle_min: 0.2,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            target_error: common::env::var_f64("TARGET_ERROR", defaults.target_error),
            credit_min: common::env::var_f64("CREDIT_MIN", defaults.credit_min),
            credit_max: common::env::var_f64("CREDIT_MAX", defaults.credit_max),
            smoothing_window: common::env::var_usize("CREDIT_WINDOW", defaults.smoothing_window),
            policy_name: common::env::var_str("SCHEDULER_POLICY", &defaults.policy_name),
            valid_for: common::env::var_u64("SCHEDULE_VALID_FOR", defaults.valid_for),
            discovery_interval: common::env::var_u64(
                "STRATEGY_DISCOVERY_INTERVAL",
                defaults.discovery_interval,
            ),
            carbon_target: common::env::var_str("CARBON_API_TARGET", &defaults.carbon_target),
            carbon_timeout: common::env::var_f64("CARBON_API_TIMEOUT", defaults.carbon_timeout),
            carbon_cache_ttl: common::env::var_f64("CARBON_API_CACHE_TTL", defaults.carbon_cache_ttl),
            throttle_min: common::env::var_f64("THROTTLE_MIN", defaults.throttle_min),
        }
    }

    /// Applies recognised camelCase override keys in place. Unknown keys and
    /// null values are ignored.
    pub fn apply_overrides(&mut self, overrides: &Value) {
        let Some(map) = overrides.as_object() else {
            return;
        };

        if let Some(v) = number(map.get("targetError")) {
            self.target_error = v;
        }
        if let Some(v) = number(map.get("creditMin")) {
            self.credit_min = v;
        }
        if let Some(v) = number(map.get("creditMax")) {
            self.credit_max = v;
        }
        if let Some(v) = number(map.get("creditWindow")) {
            self.smoothing_window = v.max(1.0) as usize;
        }
        if let Some(v) = map.get("policy").and_then(Value::as_str) {
            if !v.is_empty() {
                self.policy_name = v.to_string();
            }
        }
        if let Some(v) = number(map.get("validFor")) {
            self.valid_for = v.max(0.0) as u64;
        }
        if let Some(v) = number(map.get("discoveryInterval")) {
            self.discovery_interval = v.max(0.0) as u64;
        }
        if let Some(v) = map.get("carbonTarget").and_then(Value::as_str) {
            if !v.is_empty() {
                self.carbon_target = v.to_string();
            }
        }
        if let Some(v) = number(map.get("carbonTimeout")) {
            self.carbon_timeout = v;
        }
        if let Some(v) = number(map.get("carbonCacheTTL")) {
            self.carbon_cache_ttl = v;
        }
        if let Some(v) = number(map.get("throttleMin")) {
            self.throttle_min = v;
        }
    }

    pub fn as_json(&self) -> Value {
        json!({
            "targetError": self.target_error,
            "creditMin": self.credit_min,
            "creditMax": self.credit_max,
            "creditWindow": self.smoothing_window,
            "policy": self.policy_name,
            "validFor": self.valid_for,
            "discoveryInterval": self.discovery_interval,
            "carbonTarget": self.carbon_target,
            "carbonTimeout": self.carbon_timeout,
            "carbonCacheTTL": self.carbon_cache_ttl,
            "throttleMin": self.throttle_min,
        })
    }
}

/// Numbers may arrive as JSON numbers or numeric strings.
fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_only_recognised_keys() {
        let mut cfg = SchedulerConfig::default();
        cfg.apply_overrides(&json!({
            "targetError": 0.1,
            "policy": "forecast-aware",
            "creditWindow": 4,
            "throttleMin": 1.0,
            "bogusKey": 42,
        }));

        assert_eq!(cfg.target_error, 0.1);
        assert_eq!(cfg.policy_name, "forecast-aware");
        assert_eq!(cfg.smoothing_window, 4);
        assert_eq!(cfg.throttle_min, 1.0);
        // untouched
        assert_eq!(cfg.credit_min, -0.5);
    }

    #[test]
    fn overrides_accept_numeric_strings_and_skip_nulls() {
        let mut cfg = SchedulerConfig::default();
        cfg.apply_overrides(&json!({
            "creditMax": "0.8",
            "validFor": Value::Null,
        }));
        assert_eq!(cfg.credit_max, 0.8);
        assert_eq!(cfg.valid_for, 60);
    }

    #[test]
    fn non_object_payload_is_ignored() {
        let mut cfg = SchedulerConfig::default();
        cfg.apply_overrides(&json!([1, 2, 3]));
        assert_eq!(cfg, SchedulerConfig::default());
    }
}
