//! Trace and span identifiers.

use rand::Rng;
use std::fmt;
use std::str::FromStr;

/// Error returned when an identifier is not valid lowercase hex of the right width.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} '{value}'")]
pub struct InvalidId {
    pub kind: &'static str,
    pub value: String,
}

/// 128-bit trace identifier, stable for one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(u128);

impl TraceId {
    /// Generate a random, non-zero trace id.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let value: u128 = rng.gen();
            if value != 0 {
                return Self(value);
            }
        }
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for TraceId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex(s, 32, "trace id").map(Self)
    }
}

/// 64-bit span identifier, regenerated by every stage invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(u64);

impl SpanId {
    /// Generate a random, non-zero span id.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let value: u64 = rng.gen();
            if value != 0 {
                return Self(value);
            }
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for SpanId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v = parse_hex(s, 16, "span id")?;
        u64::try_from(v).map(Self).map_err(|_| InvalidId {
            kind: "span id",
            value: s.to_string(),
        })
    }
}

/// Parse exactly `width` lowercase hex digits; all-zero is rejected.
fn parse_hex(s: &str, width: usize, kind: &'static str) -> Result<u128, InvalidId> {
    let invalid = || InvalidId {
        kind,
        value: s.to_string(),
    };

    if s.len() != width || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(invalid());
    }

    match u128::from_str_radix(s, 16) {
        Ok(0) | Err(_) => Err(invalid()),
        Ok(value) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_fixed_width() {
        let trace = TraceId(0xab);
        assert_eq!(trace.to_string().len(), 32);
        assert!(trace.to_string().ends_with("ab"));

        let span = SpanId(1);
        assert_eq!(span.to_string(), "0000000000000001");
    }

    #[test]
    fn test_parse_roundtrip() {
        let trace = TraceId::random();
        assert_eq!(trace.to_string().parse::<TraceId>().unwrap(), trace);

        let span = SpanId::random();
        assert_eq!(span.to_string().parse::<SpanId>().unwrap(), span);
    }

    #[test]
    fn test_rejects_bad_ids() {
        assert!("".parse::<TraceId>().is_err());
        assert!("00000000000000000000000000000000".parse::<TraceId>().is_err());
        assert!("4BF92F3577B34DA6A3CE929D0E0E4736".parse::<TraceId>().is_err());
        assert!("+bf92f3577b34da6a3ce929d0e0e4736".parse::<TraceId>().is_err());
        assert!("00f067aa0ba902b".parse::<SpanId>().is_err());
        assert!("0000000000000000".parse::<SpanId>().is_err());
    }

    #[test]
    fn test_random_ids_differ() {
        assert_ne!(SpanId::random(), SpanId::random());
        assert_ne!(TraceId::random(), TraceId::random());
    }
}
