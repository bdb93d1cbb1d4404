//! Retrying HTTP forwarder towards the target service.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;
use tracing::{debug, warn};

use crate::envelope::{ReplyEnvelope, RequestEnvelope};

pub const MAX_RETRIES: u32 = 5;
pub const BACKOFF_FIRST_DELAY: Duration = Duration::from_secs(1);
pub const BACKOFF_FACTOR: u32 = 2;
pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(10);

const RETRYABLE_STATUS: [u16; 4] = [500, 502, 503, 504];

#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("retries exhausted: {0}")]
    RetriesExhausted(String),

    #[error("request could not be built: {0}")]
    BadRequest(String),
}

pub fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(FORWARD_TIMEOUT)
        .pool_max_idle_per_host(32)
        .build()
        .unwrap_or_default()
}

fn retryable_status(status: u16) -> bool {
    RETRYABLE_STATUS.contains(&status)
}

fn retryable_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout()
}

/// Forwards the embedded request to `<base_url><path>` with the original
/// method, query, headers, and body, adding `x-carbonrouter: <precision>`.
/// Retries up to [`MAX_RETRIES`] times with doubling backoff on retryable
/// statuses and connect/timeout failures.
pub async fn send_with_retry(
    client: &reqwest::Client,
    base_url: &str,
    envelope: &RequestEnvelope,
    precision_value: &str,
) -> Result<ReplyEnvelope, ForwardError> {
    let method = reqwest::Method::from_bytes(envelope.method.as_bytes())
        .map_err(|e| ForwardError::BadRequest(e.to_string()))?;

    let mut url = format!("{}{}", base_url, envelope.path);
    if !envelope.query.is_empty() {
        url.push('?');
        url.push_str(&envelope.query);
    }

    let headers = forward_headers(&envelope.headers, precision_value);

    let mut delay = BACKOFF_FIRST_DELAY;
    let mut last_error = String::new();

    for attempt in 1..=MAX_RETRIES {
        let outcome = client
            .request(method.clone(), &url)
            .headers(headers.clone())
            .body(envelope.body.clone())
            .send()
            .await;

        match outcome {
            Ok(response) if !retryable_status(response.status().as_u16()) => {
                let status = response.status().as_u16();
                let reply_headers: BTreeMap<String, String> = response
                    .headers()
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|v| (name.as_str().to_string(), v.to_string()))
                    })
                    .collect();
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| ForwardError::RetriesExhausted(e.to_string()))?;
                return Ok(ReplyEnvelope {
                    status,
                    headers: reply_headers,
                    body: body.to_vec(),
                });
            }
            Ok(response) => {
                last_error = format!("status {}", response.status().as_u16());
            }
            Err(e) if retryable_error(&e) => {
                last_error = e.to_string();
            }
            Err(e) => {
                return Err(ForwardError::RetriesExhausted(e.to_string()));
            }
        }

        if attempt < MAX_RETRIES {
            debug!(attempt, error = %last_error, delay_s = delay.as_secs(), "forward retry");
            tokio::time::sleep(delay).await;
            delay *= BACKOFF_FACTOR;
        }
    }

    warn!(error = %last_error, "forward retries exhausted");
    Err(ForwardError::RetriesExhausted(last_error))
}

/// Copies the carried headers, dropping hop-by-hop fields the client stack
/// recomputes, and stamps the effective precision.
fn forward_headers(carried: &BTreeMap<String, String>, precision_value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in carried {
        if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            headers.insert(name, value);
        }
    }
    if let Ok(value) = HeaderValue::try_from(precision_value) {
        headers.insert(HeaderName::from_static("x-carbonrouter"), value);
    }
    headers
}

/// Value carried in `x-carbonrouter`: the trailing integer of a
/// `precision-<int>` name, or the full name when it has another shape.
pub fn precision_header_value(flavour: &str) -> &str {
    match flavour.rsplit_once('-') {
        Some((_, digits)) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            digits
        }
        _ => flavour,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_value_extracts_the_trailing_integer() {
        assert_eq!(precision_header_value("precision-100"), "100");
        assert_eq!(precision_header_value("precision-30"), "30");
        assert_eq!(precision_header_value("fast-lane"), "fast-lane");
        assert_eq!(precision_header_value("plain"), "plain");
        assert_eq!(precision_header_value("precision-"), "precision-");
    }

    #[test]
    fn retryable_classification() {
        for status in [500u16, 502, 503, 504] {
            assert!(retryable_status(status));
        }
        for status in [200u16, 201, 400, 404, 422] {
            assert!(!retryable_status(status));
        }
    }

    #[test]
    fn forward_headers_strip_hop_by_hop_and_stamp_precision() {
        let carried = BTreeMap::from([
            ("host".to_string(), "router".to_string()),
            ("content-length".to_string(), "12".to_string()),
            ("x-urgent".to_string(), "true".to_string()),
        ]);
        let headers = forward_headers(&carried, "50");
        assert!(headers.get("host").is_none());
        assert!(headers.get("content-length").is_none());
        assert_eq!(headers.get("x-urgent").unwrap(), "true");
        assert_eq!(headers.get("x-carbonrouter").unwrap(), "50");
    }
}
