//! Weighted random selection over flavour names.

use std::collections::BTreeMap;

use rand::Rng;

/// Picks a key with probability proportional to its weight. Returns `None`
/// on an empty map or when every weight is zero.
pub fn weighted_choice(weights: &BTreeMap<String, i64>) -> Option<String> {
    let total: i64 = weights.values().filter(|w| **w > 0).sum();
    if total <= 0 {
        return None;
    }

    let mut roll = rand::thread_rng().gen_range(0..total);
    for (name, weight) in weights {
        if *weight <= 0 {
            continue;
        }
        if roll < *weight {
            return Some(name.clone());
        }
        roll -= weight;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_zero_weight_maps_yield_nothing() {
        assert_eq!(weighted_choice(&BTreeMap::new()), None);
        let zeros = BTreeMap::from([("a".to_string(), 0i64)]);
        assert_eq!(weighted_choice(&zeros), None);
    }

    #[test]
    fn single_bucket_always_wins() {
        let weights = BTreeMap::from([("only".to_string(), 7i64)]);
        for _ in 0..20 {
            assert_eq!(weighted_choice(&weights).as_deref(), Some("only"));
        }
    }

    #[test]
    fn zero_weight_entries_are_never_picked() {
        let weights = BTreeMap::from([
            ("dead".to_string(), 0i64),
            ("alive".to_string(), 3i64),
        ]);
        for _ in 0..50 {
            assert_eq!(weighted_choice(&weights).as_deref(), Some("alive"));
        }
    }

    #[test]
    fn every_positive_bucket_is_reachable() {
        let weights = BTreeMap::from([
            ("a".to_string(), 1i64),
            ("b".to_string(), 1i64),
        ]);
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..200 {
            seen.insert(weighted_choice(&weights).unwrap());
        }
        assert_eq!(seen.len(), 2);
    }
}
