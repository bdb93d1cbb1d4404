//! Transport-neutral request/reply envelopes carried over the broker.
//!
//! Bodies are base64 on the wire so arbitrary bytes survive the JSON
//! encoding; everything else is preserved verbatim.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("envelope decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
}

impl RequestEnvelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("request envelope serialises")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(data)?)
    }
}

impl ReplyEnvelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("reply envelope serialises")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(data)?)
    }

    /// The reply shape published when forwarding gave up.
    pub fn error(message: &str) -> Self {
        let body = serde_json::json!({"error": message});
        Self {
            status: 500,
            headers: BTreeMap::from([(
                "content-type".to_string(),
                "application/json".to_string(),
            )]),
            body: serde_json::to_vec(&body).expect("error body serialises"),
        }
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(de)?;
        STANDARD
            .decode(raw.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trip_is_byte_exact() {
        let envelope = RequestEnvelope {
            method: "POST".to_string(),
            path: "/v1/infer".to_string(),
            query: "mode=fast&retry=1".to_string(),
            headers: BTreeMap::from([
                ("content-type".to_string(), "application/octet-stream".to_string()),
                ("x-urgent".to_string(), "true".to_string()),
            ]),
            body: vec![0x00, 0xff, 0x7f, 0x80, 0x0a],
        };

        let decoded = RequestEnvelope::from_bytes(&envelope.to_bytes()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn reply_round_trip_preserves_binary_body() {
        let reply = ReplyEnvelope {
            status: 200,
            headers: BTreeMap::from([("content-type".to_string(), "image/png".to_string())]),
            body: (0..=255u8).collect(),
        };
        let decoded = ReplyEnvelope::from_bytes(&reply.to_bytes()).unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn body_is_base64_on_the_wire() {
        let envelope = RequestEnvelope {
            method: "GET".to_string(),
            path: "/".to_string(),
            query: String::new(),
            headers: BTreeMap::new(),
            body: b"hello".to_vec(),
        };
        let wire: serde_json::Value = serde_json::from_slice(&envelope.to_bytes()).unwrap();
        assert_eq!(wire["body"], "aGVsbG8=");
    }

    #[test]
    fn error_reply_carries_the_message() {
        let reply = ReplyEnvelope::error("connect timeout");
        assert_eq!(reply.status, 500);
        let body: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(body["error"], "connect timeout");
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(RequestEnvelope::from_bytes(b"not json").is_err());
    }
}
