//! Forecast-aware-global: credit-greedy plus four weighted signals:
//! short-term carbon trend, demand trend, the session's cumulative emissions
//! budget, and an extended look-ahead over the forecast schedule.

use std::collections::BTreeMap;

use super::credit_greedy::CreditGreedyPolicy;
use super::{
    SchedulerPolicy, carbon_score, enabled_sorted, normalise, weighted_avg_precision,
};
use crate::error::PolicyError;
use crate::ledger::CreditLedger;
use crate::models::{FlavourProfile, ForecastSnapshot, PolicyResult};

const CARBON_TREND_WEIGHT: f64 = 0.35;
const DEMAND_TREND_WEIGHT: f64 = 0.25;
const EMISSIONS_BUDGET_WEIGHT: f64 = 0.25;
const LOOKAHEAD_WEIGHT: f64 = 0.15;

/// Emissions tracking only kicks in once this many requests accumulated.
const EMISSIONS_MIN_SAMPLES: u64 = 10;

#[derive(Default)]
pub struct ForecastAwareGlobalPolicy {
    /// Sum of chosen flavours' dimensionless `carbon_intensity` values.
    cumulative_carbon: f64,
    request_count: u64,
}

impl ForecastAwareGlobalPolicy {
    fn evaluate_global(
        &self,
        ledger: &CreditLedger,
        flavours: &[FlavourProfile],
        forecast: Option<&ForecastSnapshot>,
    ) -> Result<PolicyResult, PolicyError> {
        let sorted = enabled_sorted(flavours)?;
        let base = CreditGreedyPolicy::evaluate_base(ledger, flavours, forecast)?;

        let Some(forecast) = forecast else {
            return Ok(base);
        };

        let carbon_adjustment = carbon_trend_adjustment(forecast);
        let demand_adjustment = demand_adjustment(forecast);
        let emissions_adjustment = self.emissions_budget_adjustment(forecast);
        let lookahead_adjustment = lookahead_adjustment(forecast);

        let total_adjustment = (CARBON_TREND_WEIGHT * carbon_adjustment
            + DEMAND_TREND_WEIGHT * demand_adjustment
            + EMISSIONS_BUDGET_WEIGHT * emissions_adjustment
            + LOOKAHEAD_WEIGHT * lookahead_adjustment)
            .clamp(-0.5, 0.5);

        let weights = apply_adjustment(&base.weights, total_adjustment, &sorted);
        let avg_precision = weighted_avg_precision(&sorted, &weights);

        let mut diagnostics = base.diagnostics;
        diagnostics.insert("carbon_adjustment", carbon_adjustment);
        diagnostics.insert("demand_adjustment", demand_adjustment);
        diagnostics.insert("emissions_adjustment", emissions_adjustment);
        diagnostics.insert("lookahead_adjustment", lookahead_adjustment);
        diagnostics.insert("total_adjustment", total_adjustment);
        diagnostics.insert("cumulative_carbon", self.cumulative_carbon);
        diagnostics.insert("request_count", self.request_count as f64);
        diagnostics.insert(
            "avg_carbon_per_request",
            if self.request_count > 0 {
                self.cumulative_carbon / self.request_count as f64
            } else {
                0.0
            },
        );

        tracing::debug!(
            total = total_adjustment,
            carbon = carbon_adjustment,
            demand = demand_adjustment,
            emissions = emissions_adjustment,
            lookahead = lookahead_adjustment,
            "global adjustment computed"
        );

        Ok(PolicyResult {
            weights,
            avg_precision,
            diagnostics,
        })
    }

    /// Compares the session's average emission per request against the
    /// current grid intensity; running dirty pushes toward greener flavours.
    fn emissions_budget_adjustment(&self, forecast: &ForecastSnapshot) -> f64 {
        if self.request_count < EMISSIONS_MIN_SAMPLES {
            return 0.0;
        }
        let Some(current) = forecast.intensity_now.filter(|v| *v > 0.0) else {
            return 0.0;
        };

        let avg_per_request = self.cumulative_carbon / self.request_count as f64;
        if avg_per_request > current * 1.2 {
            0.5
        } else if avg_per_request > current * 1.05 {
            0.2
        } else if avg_per_request < current * 0.8 {
            -0.3
        } else {
            0.0
        }
    }
}

impl SchedulerPolicy for ForecastAwareGlobalPolicy {
    fn name(&self) -> &'static str {
        "forecast-aware-global"
    }

    fn evaluate(
        &mut self,
        ledger: &CreditLedger,
        flavours: &[FlavourProfile],
        forecast: Option<&ForecastSnapshot>,
    ) -> Result<PolicyResult, PolicyError> {
        self.evaluate_global(ledger, flavours, forecast)
    }

    fn observe(&mut self, flavour: &FlavourProfile) {
        self.cumulative_carbon += flavour.carbon_intensity;
        self.request_count += 1;
    }

    fn reset(&mut self) {
        self.cumulative_carbon = 0.0;
        self.request_count = 0;
    }
}

/// Identical weighting to [`ForecastAwareGlobalPolicy`]; the distinct name
/// lets operators pin a `throttleMin = 1.0` configuration against it when
/// benchmarking the gains from throttling.
#[derive(Default)]
pub struct ForecastAwareGlobalNoThrottlePolicy {
    inner: ForecastAwareGlobalPolicy,
}

impl SchedulerPolicy for ForecastAwareGlobalNoThrottlePolicy {
    fn name(&self) -> &'static str {
        "forecast-aware-global-no-throttle"
    }

    fn evaluate(
        &mut self,
        ledger: &CreditLedger,
        flavours: &[FlavourProfile],
        forecast: Option<&ForecastSnapshot>,
    ) -> Result<PolicyResult, PolicyError> {
        self.inner.evaluate_global(ledger, flavours, forecast)
    }

    fn observe(&mut self, flavour: &FlavourProfile) {
        self.inner.observe(flavour);
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Thresholded step on the relative trend: rising intensity conserves
/// credit (negative), falling spends it (positive).
fn carbon_trend_adjustment(forecast: &ForecastSnapshot) -> f64 {
    let (Some(current), Some(next)) = (forecast.intensity_now, forecast.intensity_next) else {
        return 0.0;
    };
    if current <= 0.0 {
        return 0.0;
    }

    let trend = (next - current) / current;
    if trend > 0.2 {
        -0.8
    } else if trend > 0.05 {
        -0.4
    } else if trend < -0.2 {
        0.8
    } else if trend < -0.05 {
        0.4
    } else {
        trend * 2.0
    }
}

/// An expected demand spike conserves credit so the spike can be served at
/// high precision.
fn demand_adjustment(forecast: &ForecastSnapshot) -> f64 {
    let (Some(current), Some(next)) = (forecast.demand_now, forecast.demand_next) else {
        return 0.0;
    };
    if current <= 0.0 {
        return 0.0;
    }

    let ratio = next / current;
    if ratio > 1.5 {
        -0.6
    } else if ratio > 1.2 {
        -0.3
    } else if ratio < 0.7 {
        0.4
    } else if ratio < 0.85 {
        0.2
    } else {
        0.0
    }
}

/// Scans the next up-to-six schedule points for very clean or very dirty
/// periods ahead.
fn lookahead_adjustment(forecast: &ForecastSnapshot) -> f64 {
    let Some(current) = forecast.intensity_now.filter(|v| *v > 0.0) else {
        return 0.0;
    };
    let points = &forecast.schedule[..forecast.schedule.len().min(6)];
    if points.len() < 2 {
        return 0.0;
    }

    let valid: Vec<f64> = points
        .iter()
        .filter_map(|p| p.forecast.filter(|v| *v > 0.0))
        .collect();
    if valid.is_empty() {
        return 0.0;
    }

    let avg_future = valid.iter().sum::<f64>() / valid.len() as f64;
    let min_future = valid.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_future = valid.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    if min_future < current * 0.6 {
        return -0.5; // very clean period ahead, save credit for it
    }
    if max_future > current * 1.4 {
        return 0.6; // very dirty period ahead, spend while it's cleaner
    }

    let future_ratio = avg_future / current;
    if future_ratio > 1.3 {
        0.4
    } else if future_ratio > 1.1 {
        0.2
    } else if future_ratio < 0.8 {
        -0.3
    } else if future_ratio < 0.9 {
        -0.15
    } else {
        0.0
    }
}

/// Positive adjustment shifts mass toward greener flavours by shrinking the
/// baseline; negative reclaims mass from the others. A floor of 0.1 on the
/// baseline and 0.05 on every other flavour is preserved.
fn apply_adjustment(
    base_weights: &BTreeMap<String, f64>,
    adjustment: f64,
    sorted_flavours: &[FlavourProfile],
) -> BTreeMap<String, f64> {
    if adjustment.abs() < 0.01 || sorted_flavours.is_empty() {
        return base_weights.clone();
    }

    let baseline_name = &sorted_flavours[0].name;
    let mut weights = base_weights.clone();

    if adjustment > 0.0 {
        let baseline_weight = weights.get(baseline_name).copied().unwrap_or(0.0);
        let reduction = (baseline_weight * adjustment * 0.8).min(baseline_weight - 0.1);

        if reduction > 0.0 {
            weights.insert(baseline_name.clone(), (baseline_weight - reduction).max(0.1));

            let others: Vec<&FlavourProfile> = sorted_flavours
                .iter()
                .filter(|f| &f.name != baseline_name)
                .collect();
            if !others.is_empty() {
                let scores: Vec<f64> = others
                    .iter()
                    .map(|f| carbon_score(&sorted_flavours[0], f))
                    .collect();
                let score_sum = scores.iter().sum::<f64>();
                let score_sum = if score_sum == 0.0 {
                    scores.len() as f64
                } else {
                    score_sum
                };
                for (flavour, score) in others.iter().zip(&scores) {
                    let entry = weights.entry(flavour.name.clone()).or_insert(0.0);
                    *entry += reduction * (score / score_sum);
                }
            }
        }
    } else {
        let increase = adjustment.abs() * 0.5;
        let other_total: f64 = weights
            .iter()
            .filter(|(name, _)| *name != baseline_name)
            .map(|(_, w)| w)
            .sum();

        if other_total > 0.2 {
            let reduction_factor = (1.0 - increase / other_total).max(0.5);

            let mut reclaimed = 0.0;
            for (name, weight) in weights.iter_mut() {
                if name == baseline_name {
                    continue;
                }
                let old = *weight;
                *weight = (old * reduction_factor).max(0.05);
                reclaimed += old - *weight;
            }
            *weights.entry(baseline_name.clone()).or_insert(0.0) += reclaimed;
        }
    }

    normalise(&mut weights);
    weights
}
