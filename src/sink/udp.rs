//! UDP datagram sink.
//!
//! Fire-and-forget: a send succeeds once every datagram is handed to the OS.
//! Payloads larger than one datagram are split on line boundaries.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;

use super::{Sink, SinkError, SinkKind};
use crate::config::{ConfigError, validate_address};
use crate::encoder::{DEFAULT_TTL, EncoderKind};

/// Default largest datagram, below a typical Ethernet MTU.
pub const DEFAULT_MAX_DATAGRAM: usize = 1400;

/// Default resolve/send timeout (2 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_encoder() -> EncoderKind {
    EncoderKind::Text
}

fn default_ttl() -> Duration {
    DEFAULT_TTL
}

fn default_max_datagram() -> usize {
    DEFAULT_MAX_DATAGRAM
}

/// Configuration for a UDP listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpSinkConfig {
    /// Unique name for this sink.
    pub name: String,
    /// `host:port` of the listener.
    pub address: String,
    /// Resolve and send timeout (default: 2s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Payload encoding (default: text).
    #[serde(default = "default_encoder")]
    pub encoder: EncoderKind,
    /// Event TTL for the event encoder (default: 120s).
    #[serde(default = "default_ttl", with = "humantime_serde")]
    pub ttl: Duration,
    /// Largest datagram in bytes (default: 1400).
    #[serde(default = "default_max_datagram")]
    pub max_datagram: usize,
}

impl UdpSinkConfig {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            timeout: DEFAULT_TIMEOUT,
            encoder: default_encoder(),
            ttl: DEFAULT_TTL,
            max_datagram: DEFAULT_MAX_DATAGRAM,
        }
    }

    pub fn with_max_datagram(mut self, max_datagram: usize) -> Self {
        self.max_datagram = max_datagram;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        validate_address(&self.name, &self.address)?;
        if self.max_datagram == 0 {
            return Err(ConfigError::ValidationError(format!(
                "sink '{}': max_datagram must be positive",
                self.name
            )));
        }
        Ok(())
    }
}

/// Split `payload` into chunks of at most `max` bytes without breaking lines.
///
/// A single line longer than `max` becomes its own oversized chunk.
pub(crate) fn split_datagrams(payload: &[u8], max: usize) -> Vec<&[u8]> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut end = 0;

    for line in payload.split_inclusive(|b| *b == b'\n') {
        if end > start && end - start + line.len() > max {
            chunks.push(&payload[start..end]);
            start = end;
        }
        end += line.len();
    }
    if end > start {
        chunks.push(&payload[start..end]);
    }
    chunks
}

/// UDP datagram sink.
#[derive(Debug)]
pub struct UdpSink {
    name: String,
    address: String,
    timeout: Duration,
    max_datagram: usize,
}

impl UdpSink {
    pub fn new(config: &UdpSinkConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            name: config.name.clone(),
            address: config.address.clone(),
            timeout: config.timeout,
            max_datagram: config.max_datagram,
        })
    }

    async fn resolve(&self) -> Result<SocketAddr, SinkError> {
        tokio::net::lookup_host(&self.address)
            .await
            .map_err(|e| SinkError::Unreachable(format!("resolve {}: {e}", self.address)))?
            .next()
            .ok_or_else(|| SinkError::Unreachable(format!("no address for {}", self.address)))
    }

    async fn transmit(&self, payload: &[u8]) -> Result<usize, SinkError> {
        let target = self.resolve().await?;
        let local: SocketAddr = if target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| SinkError::Unreachable(format!("bind {local}: {e}")))?;

        let datagrams = split_datagrams(payload, self.max_datagram);
        for datagram in &datagrams {
            socket
                .send_to(datagram, target)
                .await
                .map_err(|e| SinkError::Unreachable(format!("send to {target}: {e}")))?;
        }
        Ok(datagrams.len())
    }
}

#[async_trait::async_trait]
impl Sink for UdpSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Udp
    }

    async fn send(&self, payload: &[u8]) -> Result<(), SinkError> {
        let datagrams = tokio::time::timeout(self.timeout, self.transmit(payload))
            .await
            .map_err(|_| SinkError::Timeout(self.timeout))??;
        tracing::debug!(sink = %self.name, datagrams, bytes = payload.len(), "Datagrams sent");
        Ok(())
    }
}
