//! Forecast-aware: credit-greedy adjusted by the short-term intensity trend.

use std::collections::BTreeMap;

use super::credit_greedy::CreditGreedyPolicy;
use super::{
    SchedulerPolicy, enabled_sorted, heaviest_name, normalise, weighted_avg_precision,
};
use crate::error::PolicyError;
use crate::ledger::CreditLedger;
use crate::models::{FlavourProfile, ForecastSnapshot, PolicyResult};

pub struct ForecastAwarePolicy;

impl SchedulerPolicy for ForecastAwarePolicy {
    fn name(&self) -> &'static str {
        "forecast-aware"
    }

    fn evaluate(
        &mut self,
        ledger: &CreditLedger,
        flavours: &[FlavourProfile],
        forecast: Option<&ForecastSnapshot>,
    ) -> Result<PolicyResult, PolicyError> {
        let base = CreditGreedyPolicy::evaluate_base(ledger, flavours, forecast)?;

        let Some((now, next)) = forecast.and_then(|f| Some((f.intensity_now?, f.intensity_next?)))
        else {
            return Ok(base);
        };

        let sorted = enabled_sorted(flavours)?;
        let trend = next - now;
        if trend == 0.0 {
            return Ok(base);
        }

        // Rising intensity pushes weight off the dominant flavour onto the
        // rest; falling intensity pulls it back.
        let delta = (trend.abs() / now.max(1e-6) * 0.5).min(0.3);
        let shift = if trend > 0.0 { delta } else { -delta };

        let heaviest = heaviest_name(&base.weights, &sorted);
        let mut weights: BTreeMap<String, f64> = base
            .weights
            .iter()
            .map(|(name, weight)| {
                let adjusted = if Some(name) == heaviest.as_ref() {
                    weight - shift
                } else {
                    weight + shift
                };
                (name.clone(), adjusted.clamp(0.0, 1.0))
            })
            .collect();
        normalise(&mut weights);

        let avg_precision = weighted_avg_precision(&sorted, &weights);
        let mut diagnostics = base.diagnostics;
        diagnostics.insert("trend", trend);
        diagnostics.insert("adjustment", shift);

        Ok(PolicyResult {
            weights,
            avg_precision,
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

    fn snapshot(now: f64, next: f64) -> ForecastSnapshot {
        ForecastSnapshot {
            intensity_now: Some(now),
            intensity_next: Some(next),
            ..ForecastSnapshot::default()
        }
    }

    #[test]
    fn missing_forecast_degrades_to_credit_greedy() {
        let ledger = CreditLedger::new(0.05, -1.0, 1.0, 4);
        let mut fa = ForecastAwarePolicy;
        let base = CreditGreedyPolicy::evaluate_base(&ledger, &flavours(), None).unwrap();
        let result = fa.evaluate(&ledger, &flavours(), None).unwrap();
        assert_eq!(result.weights, base.weights);
    }

    #[test]
    fn rising_trend_moves_weight_off_the_dominant_flavour() {
        let ledger = CreditLedger::new(0.05, -1.0, 1.0, 4);
        let mut fa = ForecastAwarePolicy;

        let flat = fa.evaluate(&ledger, &flavours(), Some(&snapshot(200.0, 200.0))).unwrap();
        let rising = fa.evaluate(&ledger, &flavours(), Some(&snapshot(200.0, 300.0))).unwrap();

        let dominant = "precision-100";
        assert!(rising.weights[dominant] < flat.weights[dominant]);
        assert!(rising.diagnostics.get("adjustment").unwrap() > 0.0);
        assert!((rising.weights.values().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn falling_trend_moves_weight_onto_the_dominant_flavour() {
        let ledger = CreditLedger::new(0.05, -1.0, 1.0, 4);
        let mut fa = ForecastAwarePolicy;

        let flat = fa.evaluate(&ledger, &flavours(), Some(&snapshot(200.0, 200.0))).unwrap();
        let falling = fa.evaluate(&ledger, &flavours(), Some(&snapshot(200.0, 100.0))).unwrap();

        let dominant = "precision-100";
        assert!(falling.weights[dominant] > flat.weights[dominant]);
        assert!(falling.diagnostics.get("adjustment").unwrap() < 0.0);
    }

    #[test]
    fn shift_is_capped_at_point_three() {
        let ledger = CreditLedger::new(0.05, -1.0, 1.0, 4);
        let mut fa = ForecastAwarePolicy;
        let result = fa.evaluate(&ledger, &flavours(), Some(&snapshot(10.0, 500.0))).unwrap();
        assert!((result.diagnostics.get("adjustment").unwrap() - 0.3).abs() < 1e-9);
    }
}
