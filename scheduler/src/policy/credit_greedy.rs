//! Credit-greedy: spend accumulated quality credit on greener flavours
//! while keeping the realised error near target.

use std::collections::BTreeMap;

use super::{
    SchedulerPolicy, carbon_score, enabled_sorted, normalise, weighted_avg_precision,
};
use crate::error::PolicyError;
use crate::ledger::CreditLedger;
use crate::models::{Diagnostics, FlavourProfile, ForecastSnapshot, PolicyResult};

/// Grid intensity (gCO2eq/kWh) treated as fully clean / fully dirty when
/// scaling the allowance. Documented defaults, not tunables.
const LOW_CARBON: f64 = 80.0;
const HIGH_CARBON: f64 = 280.0;

pub struct CreditGreedyPolicy;

impl CreditGreedyPolicy {
    pub(crate) fn evaluate_base(
        ledger: &CreditLedger,
        flavours: &[FlavourProfile],
        forecast: Option<&ForecastSnapshot>,
    ) -> Result<PolicyResult, PolicyError> {
        let sorted = enabled_sorted(flavours)?;
        let baseline = &sorted[0];

        // Credit dictates how much traffic may leave the baseline.
        let span = ledger.credit_max() - ledger.credit_min();
        let span = if span == 0.0 { 1.0 } else { span };
        let normalised_credit = (ledger.balance() - ledger.credit_min()) / span;
        let mut base_allowance = (1.0 - normalised_credit).clamp(0.0, 1.0);

        // Positive balance means we are already ahead on quality; dampen the
        // spend so one surplus window does not flip the mix.
        if ledger.balance() > 0.0 && ledger.credit_max() > 0.0 {
            let surplus_ratio = (ledger.balance() / ledger.credit_max()).min(1.0);
            base_allowance *= (1.0 - 0.5 * surplus_ratio).max(0.2);
        }

        // React to the current (not forecasted) carbon intensity: dirty grid
        // now means more low-precision traffic.
        let mut carbon_multiplier = 1.0;
        let mut carbon_ratio = None;
        if let Some(now) = forecast.and_then(|f| f.intensity_now) {
            let ratio = ((now - LOW_CARBON) / (HIGH_CARBON - LOW_CARBON)).clamp(0.0, 1.0);
            carbon_multiplier = 0.6 + 0.8 * ratio;
            carbon_ratio = Some(ratio);
        }

        let allowance = (base_allowance * carbon_multiplier).clamp(0.0, 0.95);

        let mut weights: BTreeMap<String, f64> = BTreeMap::new();
        weights.insert(baseline.name.clone(), (1.0 - allowance).max(0.0));

        let greener = &sorted[1..];
        if !greener.is_empty() {
            let scores: Vec<f64> = greener.iter().map(|f| carbon_score(baseline, f)).collect();
            let score_sum = scores.iter().sum::<f64>();
            let score_sum = if score_sum == 0.0 {
                scores.len() as f64
            } else {
                score_sum
            };
            for (flavour, score) in greener.iter().zip(&scores) {
                weights.insert(flavour.name.clone(), allowance * (score / score_sum));
            }
        }

        normalise(&mut weights);
        let avg_precision = weighted_avg_precision(&sorted, &weights);

        let mut diagnostics = Diagnostics::default();
        diagnostics.insert("credit_balance", ledger.balance());
        diagnostics.insert("base_allowance", base_allowance);
        diagnostics.insert("carbon_multiplier", carbon_multiplier);
        diagnostics.insert("allowance", allowance);
        diagnostics.insert("avg_precision", avg_precision);
        diagnostics.insert("normalised_credit", normalised_credit);
        diagnostics.insert_opt("carbon_now", forecast.and_then(|f| f.intensity_now));
        diagnostics.insert_opt("carbon_ratio", carbon_ratio);

        Ok(PolicyResult {
            weights,
            avg_precision,
            diagnostics,
        })
    }
}

impl SchedulerPolicy for CreditGreedyPolicy {
    fn name(&self) -> &'static str {
        "credit-greedy"
    }

    fn evaluate(
        &mut self,
        ledger: &CreditLedger,
        flavours: &[FlavourProfile],
        forecast: Option<&ForecastSnapshot>,
    ) -> Result<PolicyResult, PolicyError> {
        Self::evaluate_base(ledger, flavours, forecast)
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

    fn weight_sum(result: &PolicyResult) -> f64 {
        result.weights.values().sum()
    }

    #[test]
    fn positive_balance_dampens_spend() {
        // balance +0.5 in [-1, 1]: normalised 0.75, base allowance 0.25,
        // dampened by 0.75 -> 0.1875; no forecast keeps the multiplier at 1.
        let mut ledger = CreditLedger::new(0.5, -1.0, 1.0, 4);
        ledger.update(1.0); // delta 0.5 -> balance +0.5

        let mut policy = CreditGreedyPolicy;
        let result = policy.evaluate(&ledger, &flavours(), None).unwrap();

        let allowance = result.diagnostics.get("allowance").unwrap();
        assert!((allowance - 0.1875).abs() < 1e-9);
        assert!((result.weights["precision-100"] - 0.8125).abs() < 1e-9);
        assert!(result.weights["precision-50"] > 0.0);
        assert!(result.weights["precision-30"] > 0.0);
        assert!((weight_sum(&result) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn deep_debt_shifts_weight_to_greener_flavours() {
        let mut ledger = CreditLedger::new(0.05, -1.0, 1.0, 4);
        for _ in 0..4 {
            ledger.update(0.3); // large realised error -> debt
        }
        assert_eq!(ledger.balance(), -1.0);

        let mut policy = CreditGreedyPolicy;
        let result = policy.evaluate(&ledger, &flavours(), None).unwrap();

        // full allowance is capped at 0.95
        assert!((result.weights["precision-100"] - 0.05).abs() < 1e-9);
        assert!(result.weights["precision-50"] + result.weights["precision-30"] > 0.9);
    }

    #[test]
    fn dirty_grid_raises_the_allowance() {
        let ledger = CreditLedger::new(0.05, -1.0, 1.0, 4);
        let clean = ForecastSnapshot {
            intensity_now: Some(80.0),
            ..ForecastSnapshot::default()
        };
        let dirty = ForecastSnapshot {
            intensity_now: Some(280.0),
            ..ForecastSnapshot::default()
        };

        let mut policy = CreditGreedyPolicy;
        let clean_result = policy.evaluate(&ledger, &flavours(), Some(&clean)).unwrap();
        let dirty_result = policy.evaluate(&ledger, &flavours(), Some(&dirty)).unwrap();

        assert!(
            dirty_result.diagnostics.get("allowance").unwrap()
                > clean_result.diagnostics.get("allowance").unwrap()
        );
        assert_eq!(clean_result.diagnostics.get("carbon_ratio"), Some(0.0));
        assert_eq!(dirty_result.diagnostics.get("carbon_ratio"), Some(1.0));
    }

    #[test]
    fn single_flavour_takes_everything() {
        let ledger = CreditLedger::new(0.05, -1.0, 1.0, 4);
        let only = vec![FlavourProfile::new("precision-100", 1.0, 1.0)];
        let mut policy = CreditGreedyPolicy;
        let result = policy.evaluate(&ledger, &only, None).unwrap();
        assert_eq!(result.weights.len(), 1);
        assert!((result.weights["precision-100"] - 1.0).abs() < 1e-9);
    }
}
