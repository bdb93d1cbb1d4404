//! Carbon-intensity forecast client.
//!
//! Consumes the half-hourly intensity endpoint (`fw48h`), keeping the parsed
//! schedule in a TTL cache. When the schedule endpoint yields nothing usable
//! and an explicit base URL was configured, a legacy `/forecast` shape is
//! tried; a snapshot with no intensities is returned on total failure so the
//! policies can fall back to credit-only behaviour.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::ForecastSource;
use crate::config::SchedulerConfig;
use crate::models::{ForecastPoint, ForecastSnapshot};

const DEFAULT_BASE: &str = "https://api.carbonintensity.org.uk";

/// Geographic scope of the intensity query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CarbonTarget {
    National,
    Region(String),
    Postcode(String),
}

impl CarbonTarget {
    pub fn parse(raw: &str) -> Self {
        let value = raw.trim();
        let lowered = value.to_ascii_lowercase();
        if let Some(id) = lowered.strip_prefix("region:") {
            return Self::Region(id.trim().to_string());
        }
        if lowered.starts_with("postcode:") {
            let pc = value.splitn(2, ':').nth(1).unwrap_or_default();
            return Self::Postcode(pc.trim().to_ascii_uppercase());
        }
        Self::National
    }

    fn schedule_path(&self, start: DateTime<Utc>) -> String {
        let period = start.format("%Y-%m-%dT%H:%MZ");
        match self {
            Self::National => format!("/intensity/{period}/fw48h"),
            Self::Region(id) => format!("/regional/intensity/{period}/fw48h/regionid/{id}"),
            Self::Postcode(pc) => format!("/regional/intensity/{period}/fw48h/postcode/{pc}"),
        }
    }
}

#[derive(Deserialize)]
struct ScheduleEnvelope {
    #[serde(default)]
    data: Vec<RawPoint>,
}

#[derive(Deserialize)]
struct RawPoint {
    from: Option<String>,
    to: Option<String>,
    intensity: Option<RawIntensity>,
}

#[derive(Deserialize)]
struct RawIntensity {
    forecast: Option<f64>,
    actual: Option<f64>,
    index: Option<String>,
}

pub struct CarbonForecastProvider {
    http: reqwest::Client,
    base_url: Option<String>,
    /// Whether the base URL came from explicit configuration; only then is
    /// the legacy `/forecast` shape worth probing.
    configured: bool,
    cache_ttl: Duration,
    target: CarbonTarget,
    cache: Mutex<Option<(Instant, Vec<ForecastPoint>)>>,
}

impl CarbonForecastProvider {
    pub fn new(
        base_url: Option<String>,
        timeout: Duration,
        cache_ttl: Duration,
        target: CarbonTarget,
    ) -> Self {
        let configured = base_url.as_deref().is_some_and(|b| !b.is_empty());
        let base_url = if configured {
            base_url.map(|b| b.trim_end_matches('/').to_string())
        } else {
            Some(DEFAULT_BASE.to_string())
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url,
            configured,
            cache_ttl,
            target,
            cache: Mutex::new(None),
        }
    }

    /// Builds the provider from scheduler config plus the `CARBON_API_URL`
    /// environment variable.
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(
            common::env::var_opt("CARBON_API_URL"),
            Duration::from_secs_f64(config.carbon_timeout.max(0.1)),
            Duration::from_secs_f64(config.carbon_cache_ttl.max(0.0)),
            CarbonTarget::parse(&config.carbon_target),
        )
    }

    /// A provider that performs no I/O and always yields an empty snapshot.
    pub fn disabled() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: None,
            configured: false,
            cache_ttl: Duration::from_secs(0),
            target: CarbonTarget::National,
            cache: Mutex::new(None),
        }
    }

    async fn load_schedule(&self) -> Vec<ForecastPoint> {
        if let Some((fetched_at, points)) = self.cache.lock().clone() {
            if fetched_at.elapsed() < self.cache_ttl {
                return points;
            }
        }

        let Some(base) = self.base_url.as_deref() else {
            return Vec::new();
        };

        let start = floor_minute(Utc::now());
        let url = format!("{base}{}", self.target.schedule_path(start));

        let envelope: ScheduleEnvelope = match self.http.get(&url).send().await {
            Ok(resp) => match resp.error_for_status() {
                Ok(resp) => match resp.json().await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(error = %e, url = %url, "carbon schedule body unreadable");
                        return Vec::new();
                    }
                },
                Err(e) => {
                    warn!(error = %e, url = %url, "carbon schedule request rejected");
                    return Vec::new();
                }
            },
            Err(e) => {
                warn!(error = %e, url = %url, "carbon schedule request failed");
                return Vec::new();
            }
        };

        let schedule = normalise_schedule(envelope.data);
        if schedule.is_empty() {
            return Vec::new();
        }

        info!(
            now = ?schedule[0].forecast,
            next = ?schedule.get(1).and_then(|p| p.forecast),
            points = schedule.len(),
            "carbon intensity schedule fetched"
        );

        *self.cache.lock() = Some((Instant::now(), schedule.clone()));
        schedule
    }

    async fn fetch_legacy(&self) -> Option<ForecastSnapshot> {
        let base = self.base_url.as_deref()?;
        let url = if base.ends_with("/forecast") {
            base.to_string()
        } else {
            format!("{base}/forecast")
        };

        let payload: Value = self
            .http
            .get(&url)
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?
            .json()
            .await
            .ok()?;

        let now = value_f64(payload.get("current")).or_else(|| value_f64(payload.get("intensity_now")));
        let next = value_f64(payload.get("next")).or_else(|| value_f64(payload.get("intensity_next")));
        if now.is_none() && next.is_none() {
            return None;
        }

        debug!(?now, ?next, "legacy forecast endpoint used");
        Some(ForecastSnapshot {
            intensity_now: now,
            intensity_next: next,
            ..ForecastSnapshot::default()
        })
    }
}

#[async_trait]
impl ForecastSource for CarbonForecastProvider {
    async fn fetch(&self) -> ForecastSnapshot {
        if self.base_url.is_none() {
            return ForecastSnapshot::default();
        }

        let schedule = self.load_schedule().await;
        if !schedule.is_empty() {
            let head = &schedule[0];
            let second = schedule.get(1).unwrap_or(head);
            return ForecastSnapshot {
                intensity_now: head.forecast,
                intensity_next: second.forecast,
                index_now: head.index.clone(),
                index_next: second.index.clone(),
                schedule,
                ..ForecastSnapshot::default()
            };
        }

        if self.configured {
            if let Some(snapshot) = self.fetch_legacy().await {
                return snapshot;
            }
        }

        ForecastSnapshot::default()
    }
}

/// Keeps points still relevant (ending less than 30 minutes ago) and sorts
/// them ascending by start.
fn normalise_schedule(entries: Vec<RawPoint>) -> Vec<ForecastPoint> {
    let window_start = Utc::now() - chrono::Duration::minutes(30);

    let mut horizon: Vec<ForecastPoint> = entries
        .into_iter()
        .filter_map(|entry| {
            let start = parse_time(entry.from.as_deref()?)?;
            let end = parse_time(entry.to.as_deref()?)?;
            if end < window_start {
                return None;
            }
            let (forecast, index) = match entry.intensity {
                Some(i) => (i.forecast.or(i.actual), i.index),
                None => (None, None),
            };
            Some(ForecastPoint {
                start,
                end,
                forecast,
                index,
            })
        })
        .collect();

    horizon.sort_by_key(|p| p.start);
    horizon
}

/// The intensity API emits minute-precision timestamps (`2025-01-01T10:30Z`);
/// second-precision and full RFC 3339 forms are accepted as well.
fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    for format in ["%Y-%m-%dT%H:%MZ", "%Y-%m-%dT%H:%M:%SZ"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn floor_minute(moment: DateTime<Utc>) -> DateTime<Utc> {
    moment
        .with_second(0)
        .and_then(|m| m.with_nanosecond(0))
        .unwrap_or(moment)
}

fn value_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
