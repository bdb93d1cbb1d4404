//! Prometheus series for the buffering layer. Names and label sets are
//! contractual.

use once_cell::sync::Lazy;
use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramVec, register_counter_vec, register_gauge,
    register_gauge_vec, register_histogram_vec,
};

pub static HTTP_REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "router_http_requests_total",
        "HTTP requests",
        &["method", "status", "qtype", "flavour", "forced"]
    )
    .expect("register router_http_requests_total")
});

pub static HTTP_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "router_request_duration_seconds",
        "End-to-end latency",
        &["qtype", "flavour"]
    )
    .expect("register router_request_duration_seconds")
});

pub static PUBLISHED_MESSAGES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "router_messages_published_total",
        "Messages published",
        &["queue"]
    )
    .expect("register router_messages_published_total")
});

pub static SCHEDULE_TTL: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "router_schedule_valid_seconds",
        "Seconds until schedule expiry"
    )
    .expect("register router_schedule_valid_seconds")
});

pub static MSG_CONSUMED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "consumer_messages_total",
        "AMQP messages consumed",
        &["queue_type", "flavour"]
    )
    .expect("register consumer_messages_total")
});

pub static FORWARD_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "consumer_forward_seconds",
        "Time spent forwarding the HTTP request",
        &["flavour"]
    )
    .expect("register consumer_forward_seconds")
});

pub static THROTTLE_FACTOR: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "consumer_processing_throttle_factor",
        "Throttle factor read from the schedule",
        &["scope"]
    )
    .expect("register consumer_processing_throttle_factor")
});

pub static THROTTLE_LIMIT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "consumer_processing_inflight_limit",
        "Current in-flight cap enforced by the consumer-side throttle",
        &["scope"]
    )
    .expect("register consumer_processing_inflight_limit")
});

pub static THROTTLE_INFLIGHT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "consumer_processing_inflight_active",
        "Active in-flight forwards tracked by the consumer-side throttle",
        &["scope"]
    )
    .expect("register consumer_processing_inflight_active")
});

/// Label value for the `forced` dimension; the capitalised form is what the
/// existing dashboards expect.
pub fn forced_label(forced: bool) -> &'static str {
    if forced { "True" } else { "False" }
}
