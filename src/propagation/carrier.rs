//! Transport-agnostic trace carrier.
//!
//! A carrier is a flat string map. Any hop can move it through whatever its
//! transport supports: HTTP headers, a queue message attribute (as JSON), a
//! job parameter, or a field of the workflow state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::propagation::ids::{InvalidId, SpanId, TraceId};

/// Carrier key holding `version-traceid-spanid-flags`.
pub const TRACEPARENT: &str = "traceparent";

/// Carrier key holding opaque vendor correlation state.
pub const TRACESTATE: &str = "tracestate";

const SUPPORTED_VERSION: &str = "00";
const FLAG_SAMPLED: u8 = 0x01;

/// Errors raised while decoding an inbound carrier.
#[derive(Debug, Error)]
pub enum PropagationError {
    /// The carrier has no `traceparent` entry.
    #[error("carrier has no traceparent")]
    Missing,

    /// The `traceparent` entry does not have the expected layout.
    #[error("malformed traceparent '{0}'")]
    Malformed(String),

    /// The trace or span id inside `traceparent` is invalid.
    #[error(transparent)]
    InvalidId(#[from] InvalidId),

    /// A serialized carrier (e.g. a message attribute) is not a JSON string map.
    #[error("carrier is not a JSON string map: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl PropagationError {
    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            PropagationError::Missing => "missing",
            PropagationError::Malformed(_) => "malformed",
            PropagationError::InvalidId(_) => "invalid_id",
            PropagationError::Encoding(_) => "encoding",
        }
    }
}

/// Serialized trace context, carried from one hop to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Carrier(BTreeMap<String, String>);

impl Carrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a carrier from header-like pairs, keeping only trace context keys.
    ///
    /// Keys are matched case-insensitively and stored lowercase. Returns `None`
    /// when no trace context key is present.
    pub fn from_headers<'a, I>(headers: I) -> Option<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut carrier = Self::new();
        for (name, value) in headers {
            let name = name.to_ascii_lowercase();
            if name == TRACEPARENT || name == TRACESTATE {
                carrier.insert(name, value);
            }
        }
        (!carrier.is_empty()).then_some(carrier)
    }

    /// Parse a carrier that was serialized to a JSON string.
    pub fn from_json(raw: &str) -> Result<Self, PropagationError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Keep the string entries of a JSON object; anything else yields an empty carrier.
    ///
    /// An empty carrier decodes as `Missing`, so a mis-shaped carrier costs the
    /// trace link and nothing more.
    pub fn from_value_lenient(value: &serde_json::Value) -> Self {
        let mut carrier = Self::new();
        if let Some(entries) = value.as_object() {
            for (key, value) in entries {
                if let Some(value) = value.as_str() {
                    carrier.insert(key.as_str(), value);
                }
            }
        }
        carrier
    }

    pub fn to_json(&self) -> String {
        // A map of strings always serializes.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Decode the trace context held by this carrier.
    pub fn decode(&self) -> Result<CarriedContext, PropagationError> {
        let traceparent = self.get(TRACEPARENT).ok_or(PropagationError::Missing)?;
        let malformed = || PropagationError::Malformed(traceparent.to_string());

        let parts: Vec<&str> = traceparent.trim().split('-').collect();
        let [version, trace_id, span_id, flags] = parts.as_slice() else {
            return Err(malformed());
        };

        if *version != SUPPORTED_VERSION || flags.len() != 2 {
            return Err(malformed());
        }
        let flags = u8::from_str_radix(flags, 16).map_err(|_| malformed())?;

        Ok(CarriedContext {
            trace_id: trace_id.parse()?,
            span_id: span_id.parse()?,
            sampled: flags & FLAG_SAMPLED != 0,
            tracestate: self
                .get(TRACESTATE)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string),
        })
    }
}

/// Trace context decoded from a carrier (or about to be encoded into one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarriedContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub sampled: bool,
    pub tracestate: Option<String>,
}

impl CarriedContext {
    /// A fresh, sampled context with no vendor state.
    pub fn originate() -> Self {
        Self {
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            sampled: true,
            tracestate: None,
        }
    }

    pub fn traceparent(&self) -> String {
        let flags = if self.sampled { FLAG_SAMPLED } else { 0 };
        format!(
            "{}-{}-{}-{:02x}",
            SUPPORTED_VERSION, self.trace_id, self.span_id, flags
        )
    }

    pub fn encode(&self) -> Carrier {
        let mut carrier = Carrier::new();
        carrier.insert(TRACEPARENT, self.traceparent());
        if let Some(state) = &self.tracestate {
            carrier.insert(TRACESTATE, state.clone());
        }
        carrier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    fn carrier_with(traceparent: &str) -> Carrier {
        let mut carrier = Carrier::new();
        carrier.insert(TRACEPARENT, traceparent);
        carrier
    }

    #[test]
    fn test_decode_valid_traceparent() {
        let ctx = carrier_with(VALID).decode().unwrap();
        assert_eq!(ctx.trace_id.to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(ctx.span_id.to_string(), "00f067aa0ba902b7");
        assert!(ctx.sampled);
        assert_eq!(ctx.tracestate, None);
    }

    #[test]
    fn test_encode_decode_preserves_everything() {
        let mut ctx = CarriedContext::originate();
        ctx.tracestate = Some("vendor=abc,other=1".to_string());
        ctx.sampled = false;

        let decoded = Carrier::from_json(&ctx.encode().to_json())
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(decoded, ctx);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(matches!(Carrier::new().decode(), Err(PropagationError::Missing)));
        assert!(matches!(
            carrier_with("garbage").decode(),
            Err(PropagationError::Malformed(_))
        ));
        assert!(matches!(
            carrier_with("ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01").decode(),
            Err(PropagationError::Malformed(_))
        ));
        assert!(matches!(
            carrier_with("00-00000000000000000000000000000000-00f067aa0ba902b7-01").decode(),
            Err(PropagationError::InvalidId(_))
        ));
        assert!(matches!(
            carrier_with("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-zz").decode(),
            Err(PropagationError::Malformed(_))
        ));
    }

    #[test]
    fn test_from_headers_filters_and_lowercases() {
        let headers = [
            ("Content-Type", "application/json"),
            ("TraceParent", VALID),
            ("x-request-id", "abc"),
        ];
        let carrier = Carrier::from_headers(headers).unwrap();
        assert_eq!(carrier.iter().count(), 1);
        assert_eq!(carrier.get(TRACEPARENT), Some(VALID));

        assert!(Carrier::from_headers([("accept", "*/*")]).is_none());
    }

    #[test]
    fn test_from_json_rejects_non_map() {
        let err = Carrier::from_json("[1,2]").unwrap_err();
        assert_eq!(err.reason(), "encoding");
    }

    #[test]
    fn test_lenient_value_keeps_string_entries() {
        let carrier = Carrier::from_value_lenient(&serde_json::json!({
            "traceparent": VALID,
            "tracestate": 5,
        }));
        assert_eq!(carrier.get(TRACEPARENT), Some(VALID));
        assert_eq!(carrier.get(TRACESTATE), None);

        let carrier = Carrier::from_value_lenient(&serde_json::json!({ "traceparent": 5 }));
        assert!(carrier.is_empty());
        assert_eq!(carrier.decode().unwrap_err().reason(), "missing");

        assert!(Carrier::from_value_lenient(&serde_json::json!("x")).is_empty());
    }
}
