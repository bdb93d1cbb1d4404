//! In-memory registry of flavour profiles for one schedule session.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use crate::models::{FlavourProfile, precision_key, sort_by_precision};

/// Keyed by flavour name; `replace` swaps the whole set atomically.
pub struct FlavourRegistry {
    inner: Mutex<BTreeMap<String, FlavourProfile>>,
}

impl FlavourRegistry {
    pub fn new(flavours: impl IntoIterator<Item = FlavourProfile>) -> Self {
        Self {
            inner: Mutex::new(
                flavours
                    .into_iter()
                    .map(|f| (f.name.clone(), f))
                    .collect(),
            ),
        }
    }

    /// All known profiles, precision descending.
    pub fn list(&self) -> Vec<FlavourProfile> {
        let mut flavours: Vec<FlavourProfile> = self.inner.lock().values().cloned().collect();
        sort_by_precision(&mut flavours);
        flavours
    }

    pub fn replace(&self, flavours: impl IntoIterator<Item = FlavourProfile>) {
        *self.inner.lock() = flavours
            .into_iter()
            .map(|f| (f.name.clone(), f))
            .collect();
    }

    pub fn upsert(&self, flavour: FlavourProfile) {
        self.inner.lock().insert(flavour.name.clone(), flavour);
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Overlays discovered profiles on the fallback set; discovered entries win
/// on name clashes. Output is precision-descending.
pub fn merge_with_fallback(
    primary: &[FlavourProfile],
    fallback: &[FlavourProfile],
) -> Vec<FlavourProfile> {
    let mut merged: BTreeMap<String, FlavourProfile> = fallback
        .iter()
        .map(|f| (f.name.clone(), f.clone()))
        .collect();
    for flavour in primary {
        merged.insert(flavour.name.clone(), flavour.clone());
    }
    let mut out: Vec<FlavourProfile> = merged.into_values().collect();
    sort_by_precision(&mut out);
    out
}

/// Flavour set from the `SCHEDULER_STRATEGIES` JSON list, falling back to
/// the built-in trio when the variable is unset or malformed.
pub fn flavours_from_env() -> Vec<FlavourProfile> {
    let Some(raw) = common::env::var_opt("SCHEDULER_STRATEGIES") else {
        return default_flavours();
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Array(entries)) => {
            let parsed: Vec<FlavourProfile> =
                entries.iter().filter_map(parse_flavour_entry).collect();
            if parsed.is_empty() {
                warn!("SCHEDULER_STRATEGIES contained no usable entries");
                default_flavours()
            } else {
                parsed
            }
        }
        Ok(_) => {
            warn!("SCHEDULER_STRATEGIES is not a JSON list");
            default_flavours()
        }
        Err(e) => {
            warn!(error = %e, "invalid SCHEDULER_STRATEGIES env var");
            default_flavours()
        }
    }
}

pub fn default_flavours() -> Vec<FlavourProfile> {
    vec![
        FlavourProfile::new(precision_key(1.0), 1.0, 1.0),
        FlavourProfile::new(precision_key(0.85), 0.85, 0.7),
        FlavourProfile::new(precision_key(0.7), 0.7, 0.4),
    ]
}

fn parse_flavour_entry(entry: &Value) -> Option<FlavourProfile> {
    let map = entry.as_object()?;

    let mut precision = map.get("precision").and_then(Value::as_f64).unwrap_or(1.0);
    // Operators write precision either as a ratio or as a percentage.
    if precision > 1.0 {
        precision /= 100.0;
    }
    let precision = precision.clamp(0.0, 1.0);

    let carbon_intensity = map
        .get("carbon_intensity")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let name = match map.get("name").and_then(Value::as_str) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => precision_key(precision),
    };

    let mut flavour = FlavourProfile::new(name, precision, carbon_intensity);
    flavour.enabled = map.get("enabled").and_then(Value::as_bool).unwrap_or(true);
    Some(flavour)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replace_swaps_the_whole_set() {
        let registry = FlavourRegistry::new(default_flavours());
        registry.replace(vec![FlavourProfile::new("precision-40", 0.4, 0.2)]);
        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "precision-40");
    }

    #[test]
    fn list_orders_by_precision_desc() {
        let registry = FlavourRegistry::new(vec![
            FlavourProfile::new("precision-30", 0.3, 0.3),
            FlavourProfile::new("precision-100", 1.0, 1.0),
        ]);
        let names: Vec<_> = registry.list().into_iter().map(|f| f.name).collect();
        assert_eq!(names, ["precision-100", "precision-30"]);
    }

    #[test]
    fn merge_prefers_discovered_profiles() {
        let fallback = default_flavours();
        let discovered = vec![FlavourProfile::new("precision-100", 1.0, 0.9)];
        let merged = merge_with_fallback(&discovered, &fallback);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].carbon_intensity, 0.9);
    }

    #[test]
    fn entry_parsing_normalises_percent_precision() {
        let flavour = parse_flavour_entry(&json!({
            "precision": 85,
            "carbon_intensity": 0.7,
        }))
        .unwrap();
        assert_eq!(flavour.name, "precision-85");
        assert_eq!(flavour.precision, 0.85);

        let named = parse_flavour_entry(&json!({
            "name": "fast-lane",
            "precision": 0.5,
            "enabled": false,
        }))
        .unwrap();
        assert_eq!(named.name, "fast-lane");
        assert!(!named.enabled);
    }
}
