//! Typed environment lookups with defaults.
//!
//! Every component is configured exclusively through the process
//! environment; a missing or unparsable value always falls back to the
//! documented default rather than aborting startup.

use std::str::FromStr;

pub fn var_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn var_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

pub fn var_parsed<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

pub fn var_f64(key: &str, default: f64) -> f64 {
    var_parsed(key, default)
}

pub fn var_u64(key: &str, default: u64) -> u64 {
    var_parsed(key, default)
}

pub fn var_usize(key: &str, default: usize) -> usize {
    var_parsed(key, default)
}

pub fn var_u16(key: &str, default: u16) -> u16 {
    var_parsed(key, default)
}

/// Accepts `true`/`false` in any casing; anything else is the default.
pub fn var_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" => true,
            "false" => false,
            _ => default,
        },
        Err(_) => default,
    }
}
