//! Parsing of operator payloads into scheduler overrides and replica bounds.

use serde_json::{Map, Value};

use scheduler::scaling::{ComponentBounds, ReplicaBounds};

const SCHEDULER_CONFIG_KEYS: &[&str] = &[
    "targetError",
    "creditMin",
    "creditMax",
    "creditWindow",
    "policy",
    "validFor",
    "discoveryInterval",
    "carbonTarget",
    "carbonTimeout",
    "carbonCacheTTL",
    "throttleMin",
];

/// Splits a configuration payload into recognised scheduler overrides and
/// per-component replica bounds. Scheduler keys may sit at the top level or
/// under a `scheduler` object; everything unrecognised is dropped.
pub fn partition_payload(payload: Option<&Value>) -> (Value, ComponentBounds) {
    let Some(map) = payload.and_then(Value::as_object) else {
        return (Value::Object(Map::new()), ComponentBounds::new());
    };

    let config_section = match map.get("scheduler").and_then(Value::as_object) {
        Some(section) => section,
        None => map,
    };

    let mut overrides = Map::new();
    for key in SCHEDULER_CONFIG_KEYS {
        if let Some(value) = config_section.get(*key) {
            if !value.is_null() {
                overrides.insert((*key).to_string(), value.clone());
            }
        }
    }

    let bounds = component_bounds(map.get("components"));
    (Value::Object(overrides), bounds)
}

fn component_bounds(data: Option<&Value>) -> ComponentBounds {
    let mut bounds = ComponentBounds::new();
    let Some(map) = data.and_then(Value::as_object) else {
        return bounds;
    };

    for (component, settings) in map {
        let Some(settings) = settings.as_object() else {
            continue;
        };
        let entry = ReplicaBounds {
            min: as_int(settings.get("minReplicas")),
            max: as_int(settings.get("maxReplicas")),
        };
        if entry.min.is_some() || entry.max.is_some() {
            bounds.insert(component.clone(), entry);
        }
    }
    bounds
}

fn as_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn top_level_keys_are_partitioned() {
        let payload = json!({
            "targetError": 0.1,
            "policy": "p100",
            "unrelated": true,
            "components": {
                "router": {"minReplicas": 1, "maxReplicas": 2},
                "consumer": {"maxReplicas": 6},
            },
        });

        let (overrides, bounds) = partition_payload(Some(&payload));
        assert_eq!(overrides["targetError"], 0.1);
        assert_eq!(overrides["policy"], "p100");
        assert!(overrides.get("unrelated").is_none());

        assert_eq!(bounds["router"].min, Some(1));
        assert_eq!(bounds["router"].max, Some(2));
        assert_eq!(bounds["consumer"].min, None);
        assert_eq!(bounds["consumer"].max, Some(6));
    }

    #[test]
    fn nested_scheduler_section_wins() {
        let payload = json!({
            "scheduler": {"creditMax": 0.8},
            "creditMax": 0.2,
        });
        let (overrides, _) = partition_payload(Some(&payload));
        assert_eq!(overrides["creditMax"], 0.8);
    }

    #[test]
    fn null_values_and_garbage_components_are_dropped() {
        let payload = json!({
            "validFor": Value::Null,
            "components": {
                "router": "not-an-object",
                "target": {"maxReplicas": "12"},
            },
        });
        let (overrides, bounds) = partition_payload(Some(&payload));
        assert!(overrides.get("validFor").is_none());
        assert!(!bounds.contains_key("router"));
        assert_eq!(bounds["target"].max, Some(12));
    }

    #[test]
    fn non_object_payload_yields_empty_parts() {
        let (overrides, bounds) = partition_payload(Some(&json!("nope")));
        assert_eq!(overrides, json!({}));
        assert!(bounds.is_empty());
    }
}
