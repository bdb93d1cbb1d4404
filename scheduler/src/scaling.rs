//! Processing throttle and replica-ceiling derivation.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::SchedulerConfig;
use crate::models::ForecastSnapshot;

/// Intensity window over which the throttle scales linearly from 1 to 0.
const INTENSITY_FLOOR: f64 = 150.0;
const INTENSITY_CEILING: f64 = 350.0;

/// Replica bounds for one downstream component. Entries without `max`
/// produce no ceiling.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ReplicaBounds {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

pub type ComponentBounds = BTreeMap<String, ReplicaBounds>;

/// Downstream autoscaling directive published with every schedule.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingDirective {
    pub throttle: f64,
    pub credits_ratio: f64,
    pub intensity_ratio: f64,
    pub ceilings: BTreeMap<String, i64>,
}

impl ScalingDirective {
    /// Derives the directive from the current ledger balance and forecast.
    ///
    /// `throttle = clamp(min(credits_ratio, intensity_ratio), throttle_min, 1)`;
    /// each ceiling is `round(max * throttle)` clamped to the component's
    /// `[min, max]`.
    pub fn from_state(
        credit_balance: f64,
        config: &SchedulerConfig,
        forecast: &ForecastSnapshot,
        component_bounds: &ComponentBounds,
    ) -> Self {
        let span = config.credit_max - config.credit_min;
        let credits_ratio = if span <= 0.0 {
            1.0
        } else {
            ((credit_balance - config.credit_min) / span).clamp(0.0, 1.0)
        };

        let peak = [forecast.intensity_now, forecast.intensity_next]
            .into_iter()
            .flatten()
            .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.max(v))));
        let intensity_ratio = match peak {
            Some(peak) if INTENSITY_CEILING > INTENSITY_FLOOR => {
                ((INTENSITY_CEILING - peak) / (INTENSITY_CEILING - INTENSITY_FLOOR)).clamp(0.0, 1.0)
            }
            _ => 1.0,
        };

        let throttle = credits_ratio
            .min(intensity_ratio)
            .clamp(config.throttle_min, 1.0);

        let mut ceilings = BTreeMap::new();
        for (component, bounds) in component_bounds {
            let Some(max) = bounds.max else {
                continue;
            };
            let mut scaled = (max as f64 * throttle).round() as i64;
            if let Some(min) = bounds.min {
                scaled = scaled.max(min);
            }
            scaled = scaled.max(0).min(max);
            ceilings.insert(component.clone(), scaled);
        }

        Self {
            throttle,
            credits_ratio,
            intensity_ratio,
            ceilings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(entries: &[(&str, Option<i64>, Option<i64>)]) -> ComponentBounds {
        entries
            .iter()
            .map(|(name, min, max)| {
                (
                    name.to_string(),
                    ReplicaBounds {
                        min: *min,
                        max: *max,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn mid_throttle_scales_ceilings() {
        // credits_ratio 0.5, no forecast -> intensity_ratio 1 -> throttle 0.5
        let cfg = SchedulerConfig {
            credit_min: -1.0,
            credit_max: 1.0,
            ..SchedulerConfig::default()
        };
        let forecast = ForecastSnapshot::default();
        let b = bounds(&[
            ("router", Some(1), Some(2)),
            ("consumer", Some(1), Some(6)),
            ("target", Some(0), Some(12)),
        ]);

        let directive = ScalingDirective::from_state(0.0, &cfg, &forecast, &b);
        assert_eq!(directive.throttle, 0.5);
        assert_eq!(directive.ceilings["router"], 1);
        assert_eq!(directive.ceilings["consumer"], 3);
        assert_eq!(directive.ceilings["target"], 6);
    }

    #[test]
    fn intensity_peak_limits_throttle() {
        let cfg = SchedulerConfig {
            credit_min: -1.0,
            credit_max: 1.0,
            ..SchedulerConfig::default()
        };
        let forecast = ForecastSnapshot {
            intensity_now: Some(200.0),
            intensity_next: Some(100.0),
            ..ForecastSnapshot::default()
        };

        // credits_ratio 1.0, intensity_ratio (350-200)/200 = 0.75
        let directive = ScalingDirective::from_state(1.0, &cfg, &forecast, &ComponentBounds::new());
        assert!((directive.intensity_ratio - 0.75).abs() < 1e-9);
        assert!((directive.throttle - 0.75).abs() < 1e-9);
    }

    #[test]
    fn throttle_never_drops_below_configured_floor() {
        let cfg = SchedulerConfig {
            credit_min: -1.0,
            credit_max: 1.0,
            throttle_min: 0.2,
            ..SchedulerConfig::default()
        };
        let forecast = ForecastSnapshot {
            intensity_now: Some(900.0),
            ..ForecastSnapshot::default()
        };

        let directive =
            ScalingDirective::from_state(-1.0, &cfg, &forecast, &ComponentBounds::new());
        assert_eq!(directive.throttle, 0.2);
        assert_eq!(directive.credits_ratio, 0.0);
        assert_eq!(directive.intensity_ratio, 0.0);
    }

    #[test]
    fn degenerate_credit_span_counts_as_full() {
        let cfg = SchedulerConfig {
            credit_min: 0.5,
            credit_max: 0.5,
            ..SchedulerConfig::default()
        };
        let directive = ScalingDirective::from_state(
            0.0,
            &cfg,
            &ForecastSnapshot::default(),
            &ComponentBounds::new(),
        );
        assert_eq!(directive.credits_ratio, 1.0);
        assert_eq!(directive.throttle, 1.0);
    }

    #[test]
    fn component_without_max_gets_no_ceiling() {
        let cfg = SchedulerConfig::default();
        let b = bounds(&[("router", Some(1), None)]);
        let directive =
            ScalingDirective::from_state(0.5, &cfg, &ForecastSnapshot::default(), &b);
        assert!(directive.ceilings.is_empty());
    }
}
