//! Batch encoders.
//!
//! - [`LineProtocolEncoder`]: InfluxDB-style line protocol
//! - [`EventEncoder`]: one JSON event per line for event-stream backends
//! - [`TextEncoder`]: `host service metric state` lines
//!
//! Encoders are pure: no I/O and no error path. Samples whose value cannot be
//! represented (NaN, infinity) are skipped.

mod event;
mod line_protocol;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use event::{DEFAULT_TTL, EventEncoder, TextEncoder};
pub use line_protocol::{DecodeError, LineProtocolEncoder, decode_line};

use crate::sample::Batch;

/// Name used for anything that sanitizes to nothing.
pub const UNNAMED: &str = "unnamed";

/// Encoder variant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum EncoderKind {
    LineProtocol,
    Event,
    Text,
}

/// Converts a batch into a transport payload.
pub trait Encoder: Send + Sync + 'static {
    fn kind(&self) -> EncoderKind;

    fn encode(&self, batch: &Batch) -> Vec<u8>;
}

/// Create an encoder. `ttl` applies to event-style encoders only.
pub fn build(kind: EncoderKind, ttl: Duration) -> Arc<dyn Encoder> {
    match kind {
        EncoderKind::LineProtocol => Arc::new(LineProtocolEncoder),
        EncoderKind::Event => Arc::new(EventEncoder::new(ttl)),
        EncoderKind::Text => Arc::new(TextEncoder),
    }
}

/// Restrict a metric or tag name to `[A-Za-z0-9_.]`.
///
/// Every other character becomes `_`; an empty name becomes [`UNNAMED`].
/// Idempotent.
pub fn sanitize(name: &str) -> String {
    if name.is_empty() {
        return UNNAMED.to_string();
    }
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("cpu"), "cpu");
        assert_eq!(sanitize("disk.usage"), "disk.usage");
        assert_eq!(sanitize("network bytes sent"), "network_bytes_sent");
        assert_eq!(sanitize("mem%"), "mem_");
        assert_eq!(sanitize("température"), "temp_rature");
        assert_eq!(sanitize(""), UNNAMED);
    }

    #[test]
    fn test_encoder_kind_from_str() {
        assert_eq!(EncoderKind::from_str("line_protocol").unwrap(), EncoderKind::LineProtocol);
        assert_eq!(EncoderKind::from_str("EVENT").unwrap(), EncoderKind::Event);
        assert_eq!(EncoderKind::Text.to_string(), "text");
        assert!(EncoderKind::from_str("msgpack").is_err());
    }

    #[test]
    fn test_build_matches_kind() {
        for kind in [EncoderKind::LineProtocol, EncoderKind::Event, EncoderKind::Text] {
            assert_eq!(build(kind, DEFAULT_TTL).kind(), kind);
        }
    }

    proptest! {
        #[test]
        fn prop_sanitize_idempotent(s in ".*") {
            let once = sanitize(&s);
            prop_assert_eq!(sanitize(&once), once.clone());
            prop_assert!(!once.is_empty());
            prop_assert!(once.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.'));
        }
    }
}
