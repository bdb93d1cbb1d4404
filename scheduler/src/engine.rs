//! One-tick orchestration: registry snapshot → forecast → policy →
//! ledger advance → scaling directive → published decision.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::SchedulerConfig;
use crate::decision::ScheduleDecision;
use crate::error::EngineError;
use crate::forecast::{
    CarbonForecastProvider, DemandEstimator, ForecastManager, ForecastSource,
};
use crate::ledger::CreditLedger;
use crate::metrics;
use crate::models::{FlavourProfile, ForecastSnapshot, PolicyResult};
use crate::policy::{SchedulerPolicy, build_policy};
use crate::registry::{FlavourRegistry, flavours_from_env, merge_with_fallback};
use crate::scaling::{ComponentBounds, ScalingDirective};

pub struct SchedulerEngine {
    namespace: String,
    name: String,
    config: SchedulerConfig,
    ledger: CreditLedger,
    registry: FlavourRegistry,
    fallback_flavours: Vec<FlavourProfile>,
    forecast: ForecastManager,
    policy: Box<dyn SchedulerPolicy>,
    component_bounds: ComponentBounds,
}

impl SchedulerEngine {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        config: SchedulerConfig,
        component_bounds: ComponentBounds,
        flavours: Vec<FlavourProfile>,
        forecast: ForecastManager,
    ) -> Self {
        let ledger = CreditLedger::new(
            config.target_error,
            config.credit_min,
            config.credit_max,
            config.smoothing_window,
        );
        let policy = build_policy(&config.policy_name);
        Self {
            namespace: namespace.into(),
            name: name.into(),
            registry: FlavourRegistry::new(flavours.clone()),
            fallback_flavours: flavours,
            ledger,
            policy,
            forecast,
            config,
            component_bounds,
        }
    }

    /// Builds an engine from the environment: config (plus optional
    /// overrides), the `SCHEDULER_STRATEGIES` flavour set, and a live carbon
    /// provider.
    pub fn from_env(
        namespace: impl Into<String>,
        name: impl Into<String>,
        overrides: Option<&Value>,
        component_bounds: ComponentBounds,
    ) -> Self {
        let mut config = SchedulerConfig::from_env();
        if let Some(overrides) = overrides {
            config.apply_overrides(overrides);
        }
        let carbon: Arc<dyn ForecastSource> =
            Arc::new(CarbonForecastProvider::from_config(&config));
        let forecast = ForecastManager::new(carbon, Arc::new(DemandEstimator::default()));
        let flavours = flavours_from_env();
        Self::new(namespace, name, config, component_bounds, flavours, forecast)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn demand(&self) -> &Arc<DemandEstimator> {
        self.forecast.demand()
    }

    /// Swaps the active policy; the ledger restarts from zero so the new
    /// policy is not steered by credit earned under the old one.
    pub fn reload_policy(&mut self, name: &str) {
        self.policy = build_policy(name);
        self.config.policy_name = name.to_string();
        self.ledger.reset();
    }

    /// Overlays freshly discovered flavours on the fallback set; an empty
    /// discovery keeps the fallbacks.
    pub fn refresh_flavours(&self, discovered: Vec<FlavourProfile>) {
        let merged = if discovered.is_empty() {
            self.fallback_flavours.clone()
        } else {
            merge_with_fallback(&discovered, &self.fallback_flavours)
        };
        self.registry.replace(merged);
    }

    /// Feeds a completed request back into policies that track emissions.
    pub fn observe_request(&mut self, flavour_name: &str) {
        let profile = self
            .registry
            .list()
            .into_iter()
            .find(|f| f.name == flavour_name);
        if let Some(profile) = profile {
            self.policy.observe(&profile);
        }
    }

    /// Runs the scheduler once and produces the next decision.
    #[instrument(skip(self), fields(namespace = %self.namespace, schedule = %self.name))]
    pub async fn evaluate(&mut self) -> Result<ScheduleDecision, EngineError> {
        let flavours = self.registry.list();
        if flavours.is_empty() {
            return Err(EngineError::NoStrategies);
        }

        let forecast = self.forecast.snapshot().await;
        let result = self
            .policy
            .evaluate(&self.ledger, &flavours, Some(&forecast))?;

        let credit_balance = self.ledger.update(result.avg_precision);
        let credit_velocity = self.ledger.velocity();

        let scaling = ScalingDirective::from_state(
            credit_balance,
            &self.config,
            &forecast,
            &self.component_bounds,
        );

        let decision = ScheduleDecision::from_policy(
            &result,
            &flavours,
            &self.config,
            credit_balance,
            credit_velocity,
            scaling,
        );

        debug!(
            policy = %self.config.policy_name,
            balance = credit_balance,
            avg_precision = result.avg_precision,
            throttle = decision.scaling.throttle,
            "schedule evaluated"
        );

        self.update_metrics(&decision, &result, &forecast);
        Ok(decision)
    }

    fn update_metrics(
        &self,
        decision: &ScheduleDecision,
        result: &PolicyResult,
        forecast: &ForecastSnapshot,
    ) {
        let ns = self.namespace.as_str();
        let name = self.name.as_str();
        let policy = self.config.policy_name.as_str();

        for (flavour, weight) in &decision.flavour_weights {
            metrics::FLAVOUR_WEIGHT
                .with_label_values(&[ns, name, flavour])
                .set(*weight as f64);
        }
        metrics::VALID_UNTIL
            .with_label_values(&[ns, name])
            .set(decision.valid_until.timestamp() as f64);

        metrics::CREDIT_BALANCE
            .with_label_values(&[ns, name, policy])
            .set(decision.credits.balance);
        metrics::CREDIT_VELOCITY
            .with_label_values(&[ns, name, policy])
            .set(decision.credits.velocity);
        metrics::AVG_PRECISION
            .with_label_values(&[ns, name, policy])
            .set(result.avg_precision);
        metrics::PROCESSING_THROTTLE
            .with_label_values(&[ns, name, policy])
            .set(decision.scaling.throttle);

        for component in self
            .component_bounds
            .keys()
            .chain(decision.scaling.ceilings.keys())
        {
            let value = decision
                .scaling
                .ceilings
                .get(component)
                .copied()
                .unwrap_or(0);
            metrics::REPLICA_CEILING
                .with_label_values(&[ns, name, component])
                .set(value as f64);
        }

        for (strategy, weight) in &result.weights {
            metrics::POLICY_CHOICE
                .with_label_values(&[ns, name, policy, strategy])
                .inc_by(*weight);
        }

        if let Some(now) = forecast.intensity_now {
            metrics::FORECAST_INTENSITY
                .with_label_values(&[ns, name, policy, "now"])
                .set(now);
        }
        if let Some(next) = forecast.intensity_next {
            metrics::FORECAST_INTENSITY
                .with_label_values(&[ns, name, policy, "next"])
                .set(next);
        }
    }

    /// Best-effort gauge updates for a manually pinned schedule. The payload
    /// is operator-supplied and never validated; anything unreadable is
    /// skipped.
    pub fn publish_manual_metrics(&self, payload: &Value) {
        let ns = self.namespace.as_str();
        let name = self.name.as_str();
        let policy = self.config.policy_name.as_str();

        if let Some(weights) = payload.get("flavourWeights").and_then(Value::as_object) {
            for (flavour, weight) in weights {
                if let Some(weight) = weight.as_f64() {
                    metrics::FLAVOUR_WEIGHT
                        .with_label_values(&[ns, name, flavour])
                        .set(weight);
                }
            }
        }

        if let Some(raw) = payload.get("validUntil").and_then(Value::as_str) {
            if let Some(ts) = parse_valid_until(raw) {
                metrics::VALID_UNTIL
                    .with_label_values(&[ns, name])
                    .set(ts.timestamp() as f64);
            }
        }

        let processing = payload.get("processing");
        let throttle = processing
            .and_then(|p| p.get("throttle"))
            .and_then(Value::as_f64)
            .unwrap_or(1.0)
            .clamp(0.0, 1.0);
        metrics::PROCESSING_THROTTLE
            .with_label_values(&[ns, name, policy])
            .set(throttle);

        if let Some(ceilings) = processing
            .and_then(|p| p.get("ceilings"))
            .and_then(Value::as_object)
        {
            for (component, raw) in ceilings {
                if let Some(value) = raw.as_f64() {
                    metrics::REPLICA_CEILING
                        .with_label_values(&[ns, name, component])
                        .set(value);
                }
            }
        }
    }
}

fn parse_valid_until(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%SZ")
        .ok()
        .map(|naive| naive.and_utc())
}
