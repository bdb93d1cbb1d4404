//! Scheduling policies.
//!
//! Every policy exposes one operation: `evaluate(ledger, flavours,
//! forecast) -> PolicyResult`. Disabled flavours are dropped, empty input is
//! an error, and weights are normalised to sum 1 before return. Policies
//! never mutate their flavour inputs.

mod baselines;
mod credit_greedy;
mod forecast_aware;
mod forecast_aware_global;
mod precision_tier;

use std::collections::BTreeMap;

pub use baselines::{P100Policy, RandomPolicy, RoundRobinPolicy};
pub use credit_greedy::CreditGreedyPolicy;
pub use forecast_aware::ForecastAwarePolicy;
pub use forecast_aware_global::{ForecastAwareGlobalNoThrottlePolicy, ForecastAwareGlobalPolicy};
pub use precision_tier::PrecisionTierPolicy;

use crate::error::PolicyError;
use crate::ledger::CreditLedger;
use crate::models::{FlavourProfile, ForecastSnapshot, PolicyResult, sort_by_precision};

pub trait SchedulerPolicy: Send {
    fn name(&self) -> &'static str;

    fn evaluate(
        &mut self,
        ledger: &CreditLedger,
        flavours: &[FlavourProfile],
        forecast: Option<&ForecastSnapshot>,
    ) -> Result<PolicyResult, PolicyError>;

    /// Called after each completed request with the flavour that served it.
    /// Only stateful policies care.
    fn observe(&mut self, _flavour: &FlavourProfile) {}

    /// Clears any per-session accumulator state.
    fn reset(&mut self) {}
}

/// Builds the policy registered under `name`; unknown names fall back to
/// credit-greedy with a warning.
pub fn build_policy(name: &str) -> Box<dyn SchedulerPolicy> {
    match name {
        "credit-greedy" => Box::new(CreditGreedyPolicy),
        "forecast-aware" => Box::new(ForecastAwarePolicy),
        "forecast-aware-global" => Box::new(ForecastAwareGlobalPolicy::default()),
        "forecast-aware-global-no-throttle" => {
            Box::new(ForecastAwareGlobalNoThrottlePolicy::default())
        }
        "precision-tier" => Box::new(PrecisionTierPolicy),
        "round-robin" => Box::new(RoundRobinPolicy),
        "random" => Box::new(RandomPolicy),
        "p100" => Box::new(P100Policy),
        other => {
            tracing::warn!(policy = other, "unknown policy, falling back to credit-greedy");
            Box::new(CreditGreedyPolicy)
        }
    }
}

/// Drops disabled flavours and sorts by precision descending (name ascending
/// on ties). Empty output is an evaluation error.
pub(crate) fn enabled_sorted(
    flavours: &[FlavourProfile],
) -> Result<Vec<FlavourProfile>, PolicyError> {
    let mut list: Vec<FlavourProfile> =
        flavours.iter().filter(|f| f.enabled).cloned().collect();
    if list.is_empty() {
        return Err(PolicyError::NoFlavoursEnabled);
    }
    sort_by_precision(&mut list);
    Ok(list)
}

/// Rescales weights in place so they sum to 1.
pub(crate) fn normalise(weights: &mut BTreeMap<String, f64>) {
    let total: f64 = weights.values().sum();
    let total = if total == 0.0 { 1.0 } else { total };
    for w in weights.values_mut() {
        *w /= total;
    }
}

pub(crate) fn precision_of(flavours: &[FlavourProfile], name: &str) -> f64 {
    flavours
        .iter()
        .find(|f| f.name == name)
        .map(|f| f.precision)
        .unwrap_or(1.0)
}

pub(crate) fn weighted_avg_precision(
    flavours: &[FlavourProfile],
    weights: &BTreeMap<String, f64>,
) -> f64 {
    weights
        .iter()
        .map(|(name, w)| w * precision_of(flavours, name))
        .sum()
}

/// Carbon score of a non-baseline flavour: emission gain over the baseline
/// per unit of expected error. Flavours that are not actually greener score
/// epsilon.
pub(crate) fn carbon_score(baseline: &FlavourProfile, flavour: &FlavourProfile) -> f64 {
    let intensity_gain = baseline.carbon_intensity - flavour.carbon_intensity;
    let error_penalty = flavour.expected_error().max(1e-6);
    let score = if intensity_gain > 0.0 {
        intensity_gain.max(1e-6)
    } else {
        1e-6
    };
    (score / error_penalty).max(1e-6)
}

/// Name holding the largest weight; ties resolve to the earliest flavour in
/// the sorted order.
pub(crate) fn heaviest_name(
    weights: &BTreeMap<String, f64>,
    sorted_flavours: &[FlavourProfile],
) -> Option<String> {
    let known = sorted_flavours
        .iter()
        .map(|f| &f.name)
        .filter(|name| weights.contains_key(*name));
    let unknown = weights
        .keys()
        .filter(|name| !sorted_flavours.iter().any(|f| &f.name == *name));

    let mut best: Option<(&String, f64)> = None;
    for name in known.chain(unknown) {
        let w = weights[name];
        if best.is_none_or(|(_, bw)| w > bw) {
            best = Some((name, w));
        }
    }
    best.map(|(name, _)| name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flavours() -> Vec<FlavourProfile> {
        vec![
            FlavourProfile::new("precision-30", 0.3, 0.3),
            FlavourProfile::new("precision-100", 1.0, 1.0),
            FlavourProfile::new("precision-50", 0.5, 0.5),
        ]
    }

    #[test]
    fn enabled_sorted_filters_and_orders() {
        let mut input = flavours();
        input[0].enabled = false;
        let sorted = enabled_sorted(&input).unwrap();
        let names: Vec<_> = sorted.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["precision-100", "precision-50"]);
    }

    #[test]
    fn all_disabled_is_an_error() {
        let mut input = flavours();
        for f in &mut input {
            f.enabled = false;
        }
        assert!(matches!(
            enabled_sorted(&input),
            Err(PolicyError::NoFlavoursEnabled)
        ));
    }

    #[test]
    fn build_policy_falls_back_on_unknown_name() {
        let mut policy = build_policy("does-not-exist");
        assert_eq!(policy.name(), "credit-greedy");

        let ledger = CreditLedger::new(0.05, -0.5, 0.5, 4);
        assert!(policy.evaluate(&ledger, &flavours(), None).is_ok());
    }

    #[test]
    fn every_registered_name_resolves_to_itself() {
        for name in [
            "credit-greedy",
            "forecast-aware",
            "forecast-aware-global",
            "forecast-aware-global-no-throttle",
            "precision-tier",
            "round-robin",
            "random",
            "p100",
        ] {
            assert_eq!(build_policy(name).name(), name);
        }
    }

    #[test]
    fn heaviest_name_breaks_ties_by_flavour_order() {
        let sorted = enabled_sorted(&flavours()).unwrap();
        let weights: BTreeMap<String, f64> = [
            ("precision-50".to_string(), 0.4),
            ("precision-100".to_string(), 0.4),
            ("precision-30".to_string(), 0.2),
        ]
        .into();
        assert_eq!(
            heaviest_name(&weights, &sorted).as_deref(),
            Some("precision-100")
        );
    }
}
