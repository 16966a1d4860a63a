//! Payload sinks.
//!
//! - [`HttpSink`]: POST to an InfluxDB-style `/write` endpoint
//! - [`TcpSink`]: newline-delimited events over a fresh TCP connection
//! - [`UdpSink`]: fire-and-forget datagrams
//!
//! Sinks never retry; the delivery pipeline owns retry and circuit breaking.

mod http;
mod tcp;
mod udp;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

pub use http::{HttpSink, HttpSinkConfig};
pub use tcp::{TcpSink, TcpSinkConfig};
pub use udp::{DEFAULT_MAX_DATAGRAM, UdpSink, UdpSinkConfig};

/// Sink variant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SinkKind {
    Http,
    Tcp,
    Udp,
}

/// Why a send failed.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Connection, DNS or write failure.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The backend answered but refused the payload.
    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The backend did not answer within the deadline.
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

/// Delivers an encoded payload.
#[async_trait::async_trait]
pub trait Sink: Send + Sync + 'static {
    /// Unique identifier for this sink.
    fn name(&self) -> &str;

    fn kind(&self) -> SinkKind;

    /// Deliver one payload. Implementations bound their own I/O with a
    /// deadline and do not retry.
    async fn send(&self, payload: &[u8]) -> Result<(), SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_error_display() {
        assert_eq!(
            SinkError::Rejected {
                status: 400,
                body: "bad line".to_string()
            }
            .to_string(),
            "rejected with status 400: bad line"
        );
        assert_eq!(
            SinkError::Timeout(Duration::from_millis(1500)).to_string(),
            "timed out after 1500ms"
        );
    }

    #[test]
    fn test_sink_kind_serde() {
        let kind: SinkKind = serde_yaml::from_str("udp").unwrap();
        assert_eq!(kind, SinkKind::Udp);
        assert_eq!(SinkKind::Http.as_ref(), "http");
    }
}
