//! Assembly of the published schedule document.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Serializer};

use crate::config::SchedulerConfig;
use crate::models::{FlavourProfile, PolicyResult};
use crate::scaling::ScalingDirective;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlavourRule {
    pub flavour_name: String,
    /// Precision as an integer percentage.
    pub precision: i64,
    pub weight: i64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyMeta {
    pub name: String,
    pub precision: i64,
    pub weight: i64,
    pub carbon_intensity: f64,
    pub enabled: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct CreditStats {
    pub balance: f64,
    pub velocity: f64,
    pub target: f64,
    pub min: f64,
    pub max: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowance: Option<f64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PolicyName {
    pub name: String,
}

/// The schedule shared with the router, consumer, and operator status.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDecision {
    /// Integer weights summing to exactly 100.
    pub flavour_weights: BTreeMap<String, i64>,
    pub flavour_rules: Vec<FlavourRule>,
    pub strategies: Vec<StrategyMeta>,
    #[serde(serialize_with = "compact_utc")]
    pub valid_until: DateTime<Utc>,
    pub credits: CreditStats,
    pub policy: PolicyName,
    pub diagnostics: BTreeMap<String, f64>,
    pub avg_precision: f64,
    #[serde(rename = "processing")]
    pub scaling: ScalingDirective,
}

fn compact_utc<S: Serializer>(dt: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_str(&dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

impl ScheduleDecision {
    /// Assembles the decision from a policy result.
    ///
    /// Fractional weights are rescaled to integer percentages summing to
    /// exactly 100; the rounding remainder goes to the heaviest flavour
    /// (ties broken by precision-descending flavour order).
    pub fn from_policy(
        result: &PolicyResult,
        flavours: &[FlavourProfile],
        config: &SchedulerConfig,
        credit_balance: f64,
        credit_velocity: f64,
        scaling: ScalingDirective,
    ) -> Self {
        let valid_until = Utc::now() + Duration::seconds(config.valid_for as i64);

        let total: f64 = result.weights.values().sum();
        let total = if total == 0.0 { 1.0 } else { total };
        let mut scaled: BTreeMap<String, i64> = result
            .weights
            .iter()
            .map(|(name, w)| (name.clone(), ((w / total) * 100.0).round() as i64))
            .collect();

        let diff = 100 - scaled.values().sum::<i64>();
        if diff != 0 && !scaled.is_empty() {
            let key = argmax(&scaled, flavours);
            if let Some(weight) = scaled.get_mut(&key) {
                *weight += diff;
            }
        }

        let credits = CreditStats {
            balance: credit_balance,
            velocity: credit_velocity,
            target: config.target_error,
            min: config.credit_min,
            max: config.credit_max,
            allowance: result.diagnostics.get("allowance"),
        };

        let mut flavour_rules = Vec::with_capacity(flavours.len());
        let mut strategies = Vec::with_capacity(flavours.len());
        for flavour in flavours {
            let weight = scaled.get(&flavour.name).copied().unwrap_or(0);
            let precision_pct = (flavour.precision * 100.0).round() as i64;
            flavour_rules.push(FlavourRule {
                flavour_name: flavour.name.clone(),
                precision: precision_pct,
                weight,
            });
            strategies.push(StrategyMeta {
                name: flavour.name.clone(),
                precision: precision_pct,
                weight,
                carbon_intensity: flavour.carbon_intensity,
                enabled: flavour.enabled,
            });
        }

        Self {
            flavour_weights: scaled,
            flavour_rules,
            strategies,
            valid_until,
            credits,
            policy: PolicyName {
                name: config.policy_name.clone(),
            },
            diagnostics: result.diagnostics.0.clone(),
            avg_precision: result.avg_precision,
            scaling,
        }
    }

    pub fn as_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("schedule decision serialises")
    }
}

/// Heaviest weight wins; ties resolve to the earliest entry in flavour
/// order (precision descending, then name).
fn argmax(weights: &BTreeMap<String, i64>, flavours: &[FlavourProfile]) -> String {
    let known = flavours
        .iter()
        .map(|f| &f.name)
        .filter(|name| weights.contains_key(*name));
    let unknown = weights
        .keys()
        .filter(|name| !flavours.iter().any(|f| &f.name == *name));

    let mut best: Option<(&String, i64)> = None;
    for name in known.chain(unknown) {
        let w = weights[name];
        if best.is_none_or(|(_, bw)| w > bw) {
            best = Some((name, w));
        }
    }
    best.map(|(name, _)| name.clone()).unwrap_or_default()
}
