//! Data model shared across the decision core.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Returns a stable flavour name for a precision ratio, e.g. `precision-85`.
pub fn precision_key(precision: f64) -> String {
    let clamped = precision.clamp(0.0, 1.0);
    format!("precision-{}", (clamped * 100.0).round() as i64)
}

/// A runnable precision variant of the target service.
#[derive(Clone, Debug, PartialEq)]
pub struct FlavourProfile {
    pub name: String,
    /// Accuracy relative to the baseline flavour, in `[0, 1]`.
    pub precision: f64,
    /// Relative emission per request (dimensionless delta vs. baseline).
    pub carbon_intensity: f64,
    pub enabled: bool,
    pub annotations: BTreeMap<String, String>,
}

impl FlavourProfile {
    pub fn new(name: impl Into<String>, precision: f64, carbon_intensity: f64) -> Self {
        Self {
            name: name.into(),
            precision,
            carbon_intensity,
            enabled: true,
            annotations: BTreeMap::new(),
        }
    }

    /// Expected relative error contributed by this flavour.
    pub fn expected_error(&self) -> f64 {
        (1.0 - self.precision).max(0.0)
    }
}

/// Orders flavours by precision descending, name ascending on ties.
pub fn sort_by_precision(flavours: &mut [FlavourProfile]) {
    flavours.sort_by(|a, b| {
        b.precision
            .partial_cmp(&a.precision)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Carbon forecast for one half-open `[start, end)` interval.
#[derive(Clone, Debug, PartialEq)]
pub struct ForecastPoint {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub forecast: Option<f64>,
    pub index: Option<String>,
}

/// Carbon intensity and demand picture at one decision tick.
#[derive(Clone, Debug)]
pub struct ForecastSnapshot {
    pub intensity_now: Option<f64>,
    pub intensity_next: Option<f64>,
    pub index_now: Option<String>,
    pub index_next: Option<String>,
    pub demand_now: Option<f64>,
    pub demand_next: Option<f64>,
    pub generated_at: DateTime<Utc>,
    /// Future points sorted ascending by `start`.
    pub schedule: Vec<ForecastPoint>,
}

impl Default for ForecastSnapshot {
    fn default() -> Self {
        Self {
            intensity_now: None,
            intensity_next: None,
            index_now: None,
            index_next: None,
            demand_now: None,
            demand_next: None,
            generated_at: Utc::now(),
            schedule: Vec::new(),
        }
    }
}

/// Named-scalar bag published alongside every decision.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics(pub BTreeMap<String, f64>);

impl Diagnostics {
    pub fn insert(&mut self, key: &str, value: f64) {
        self.0.insert(key.to_string(), value);
    }

    pub fn insert_opt(&mut self, key: &str, value: Option<f64>) {
        if let Some(v) = value {
            self.0.insert(key.to_string(), v);
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }
}

/// Outcome of one policy evaluation.
#[derive(Clone, Debug)]
pub struct PolicyResult {
    /// Fractional weights per flavour name, normalised to sum 1.
    pub weights: BTreeMap<String, f64>,
    pub avg_precision: f64,
    pub diagnostics: Diagnostics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_key_rounds_and_clamps() {
        assert_eq!(precision_key(1.0), "precision-100");
        assert_eq!(precision_key(0.846), "precision-85");
        assert_eq!(precision_key(-0.2), "precision-0");
        assert_eq!(precision_key(1.7), "precision-100");
    }

    #[test]
    fn expected_error_never_negative() {
        let f = FlavourProfile::new("precision-100", 1.2, 1.0);
        assert_eq!(f.expected_error(), 0.0);
    }

    #[test]
    fn sort_is_precision_desc_then_name() {
        let mut flavours = vec![
            FlavourProfile::new("b", 0.5, 0.5),
            FlavourProfile::new("a", 0.5, 0.4),
            FlavourProfile::new("c", 1.0, 1.0),
        ];
        sort_by_precision(&mut flavours);
        let names: Vec<_> = flavours.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["c", "a", "b"]);
    }
}
