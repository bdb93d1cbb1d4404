//! Prometheus series published by the decision engine. Names and label sets
//! are contractual; dashboards and the benchmark harness scrape them.

use once_cell::sync::Lazy;
use prometheus::{
    CounterVec, GaugeVec, register_counter_vec, register_gauge_vec,
};

pub static FLAVOUR_WEIGHT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "schedule_flavour_weight",
        "Weight per flavour",
        &["namespace", "schedule", "flavour"]
    )
    .expect("register schedule_flavour_weight")
});

pub static VALID_UNTIL: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "schedule_valid_until",
        "UNIX epoch of validUntil",
        &["namespace", "schedule"]
    )
    .expect("register schedule_valid_until")
});

pub static CREDIT_BALANCE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "scheduler_credit_balance",
        "Current credit balance",
        &["namespace", "schedule", "policy"]
    )
    .expect("register scheduler_credit_balance")
});

pub static CREDIT_VELOCITY: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "scheduler_credit_velocity",
        "Average credit delta",
        &["namespace", "schedule", "policy"]
    )
    .expect("register scheduler_credit_velocity")
});

pub static AVG_PRECISION: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "scheduler_avg_precision",
        "Average precision seen",
        &["namespace", "schedule", "policy"]
    )
    .expect("register scheduler_avg_precision")
});

pub static PROCESSING_THROTTLE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "scheduler_processing_throttle",
        "Throttle factor applied to downstream processing",
        &["namespace", "schedule", "policy"]
    )
    .expect("register scheduler_processing_throttle")
});

pub static REPLICA_CEILING: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "scheduler_effective_replica_ceiling",
        "Effective replica ceiling per component",
        &["namespace", "schedule", "component"]
    )
    .expect("register scheduler_effective_replica_ceiling")
});

pub static POLICY_CHOICE: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "scheduler_policy_choice_total",
        "Policy selections per strategy",
        &["namespace", "schedule", "policy", "strategy"]
    )
    .expect("register scheduler_policy_choice_total")
});

pub static FORECAST_INTENSITY: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "scheduler_forecast_intensity",
        "Carbon intensity forecast",
        &["namespace", "schedule", "policy", "horizon"]
    )
    .expect("register scheduler_forecast_intensity")
});
