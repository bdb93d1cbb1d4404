//! Baseline policies used for benchmarking: round-robin, random, and p100.
//! None of them consult carbon intensity or the credit ledger.

use std::collections::BTreeMap;

use rand::Rng;

use super::{SchedulerPolicy, enabled_sorted, normalise, weighted_avg_precision};
use crate::error::PolicyError;
use crate::ledger::CreditLedger;
use crate::models::{Diagnostics, FlavourProfile, ForecastSnapshot, PolicyResult};

/// Equal weight to every enabled flavour.
pub struct RoundRobinPolicy;

impl SchedulerPolicy for RoundRobinPolicy {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn evaluate(
        &mut self,
        _ledger: &CreditLedger,
        flavours: &[FlavourProfile],
        _forecast: Option<&ForecastSnapshot>,
    ) -> Result<PolicyResult, PolicyError> {
        let sorted = enabled_sorted(flavours)?;

        let share = 1.0 / sorted.len() as f64;
        let weights: BTreeMap<String, f64> =
            sorted.iter().map(|f| (f.name.clone(), share)).collect();
        let avg_precision = sorted.iter().map(|f| f.precision).sum::<f64>() / sorted.len() as f64;

        let mut diagnostics = Diagnostics::default();
        diagnostics.insert("num_flavours", sorted.len() as f64);

        Ok(PolicyResult {
            weights,
            avg_precision,
            diagnostics,
        })
    }
}

/// Independent uniform weight per enabled flavour, normalised.
pub struct RandomPolicy;

impl SchedulerPolicy for RandomPolicy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn evaluate(
        &mut self,
        _ledger: &CreditLedger,
        flavours: &[FlavourProfile],
        _forecast: Option<&ForecastSnapshot>,
    ) -> Result<PolicyResult, PolicyError> {
        let sorted = enabled_sorted(flavours)?;

        let mut rng = rand::thread_rng();
        let mut weights: BTreeMap<String, f64> = sorted
            .iter()
            .map(|f| (f.name.clone(), rng.r#gen::<f64>()))
            .collect();
        normalise(&mut weights);

        let avg_precision = weighted_avg_precision(&sorted, &weights);

        Ok(PolicyResult {
            weights,
            avg_precision,
            diagnostics: Diagnostics::default(),
        })
    }
}

/// Everything on the highest-precision flavour.
pub struct P100Policy;

impl SchedulerPolicy for P100Policy {
    fn name(&self) -> &'static str {
        "p100"
    }

    fn evaluate(
        &mut self,
        _ledger: &CreditLedger,
        flavours: &[FlavourProfile],
        _forecast: Option<&ForecastSnapshot>,
    ) -> Result<PolicyResult, PolicyError> {
        let sorted = enabled_sorted(flavours)?;
        let best = &sorted[0];

        let mut weights = BTreeMap::new();
        weights.insert(best.name.clone(), 1.0);

        let mut diagnostics = Diagnostics::default();
        diagnostics.insert("selected_flavour", best.precision);

        Ok(PolicyResult {
            weights,
            avg_precision: best.precision,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flavours() -> Vec<FlavourProfile> {
        vec![
            FlavourProfile::new("precision-100", 1.0, 1.0),
            FlavourProfile::new("precision-50", 0.5, 0.5),
            FlavourProfile::new("precision-30", 0.3, 0.3),
        ]
    }

    fn ledger() -> CreditLedger {
        CreditLedger::new(0.05, -0.5, 0.5, 4)
    }

    #[test]
    fn round_robin_splits_evenly() {
        let result = RoundRobinPolicy.evaluate(&ledger(), &flavours(), None).unwrap();
        for weight in result.weights.values() {
            assert!((weight - 1.0 / 3.0).abs() < 1e-9);
        }
        assert!((result.avg_precision - 0.6).abs() < 1e-9);
    }

    #[test]
    fn random_weights_are_normalised() {
        let result = RandomPolicy.evaluate(&ledger(), &flavours(), None).unwrap();
        assert_eq!(result.weights.len(), 3);
        assert!((result.weights.values().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(result.avg_precision > 0.0 && result.avg_precision <= 1.0);
    }

    #[test]
    fn p100_takes_the_most_precise_flavour() {
        let result = P100Policy.evaluate(&ledger(), &flavours(), None).unwrap();
        assert_eq!(result.weights.len(), 1);
        assert_eq!(result.weights["precision-100"], 1.0);
        assert_eq!(result.avg_precision, 1.0);
    }

    #[test]
    fn disabled_flavours_are_invisible() {
        let mut input = flavours();
        input[0].enabled = false;
        let result = P100Policy.evaluate(&ledger(), &input, None).unwrap();
        assert_eq!(result.weights["precision-50"], 1.0);
    }
}
