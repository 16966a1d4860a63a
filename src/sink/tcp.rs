//! TCP event-stream sink.
//!
//! Opens a connection per payload, writes it newline terminated and closes
//! the write half, matching listeners that read until end of stream.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::{Sink, SinkError, SinkKind};
use crate::config::{ConfigError, validate_address};
use crate::encoder::{DEFAULT_TTL, EncoderKind};

/// Default connect/write timeout (5 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_encoder() -> EncoderKind {
    EncoderKind::Event
}

fn default_ttl() -> Duration {
    DEFAULT_TTL
}

/// Configuration for a TCP event listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpSinkConfig {
    /// Unique name for this sink.
    pub name: String,
    /// `host:port` of the listener.
    pub address: String,
    /// Connect and write timeout (default: 5s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Payload encoding (default: event).
    #[serde(default = "default_encoder")]
    pub encoder: EncoderKind,
    /// Event TTL (default: 120s).
    #[serde(default = "default_ttl", with = "humantime_serde")]
    pub ttl: Duration,
}

impl TcpSinkConfig {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            timeout: DEFAULT_TIMEOUT,
            encoder: default_encoder(),
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_encoder(mut self, encoder: EncoderKind) -> Self {
        self.encoder = encoder;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        validate_address(&self.name, &self.address)
    }
}

/// TCP event-stream sink.
#[derive(Debug)]
pub struct TcpSink {
    name: String,
    address: String,
    timeout: Duration,
}

impl TcpSink {
    pub fn new(config: &TcpSinkConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            name: config.name.clone(),
            address: config.address.clone(),
            timeout: config.timeout,
        })
    }

    async fn write(&self, payload: &[u8]) -> Result<(), SinkError> {
        let mut stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| SinkError::Unreachable(format!("connect {}: {e}", self.address)))?;

        let write = async {
            stream.write_all(payload).await?;
            if payload.last() != Some(&b'\n') {
                stream.write_all(b"\n").await?;
            }
            stream.shutdown().await
        };
        write
            .await
            .map_err(|e| SinkError::Unreachable(format!("write {}: {e}", self.address)))
    }
}

#[async_trait::async_trait]
impl Sink for TcpSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Tcp
    }

    async fn send(&self, payload: &[u8]) -> Result<(), SinkError> {
        tokio::time::timeout(self.timeout, self.write(payload))
            .await
            .map_err(|_| SinkError::Timeout(self.timeout))??;
        tracing::debug!(sink = %self.name, bytes = payload.len(), "Payload written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn bind() -> Option<TcpListener> {
        match TcpListener::bind("127.0.0.1:0").await {
            Ok(l) => Some(l),
            // Some sandboxed environments disallow binding; skip the test.
            Err(e) if e.kind() == ErrorKind::PermissionDenied => None,
            Err(e) => panic!("Failed to bind test listener: {e}"),
        }
    }

    #[test]
    fn test_tcp_sink_config_validation() {
        assert!(TcpSinkConfig::new("riemann", "localhost:5555").validate().is_ok());
        assert!(TcpSinkConfig::new("riemann", "127.0.0.1:5555").validate().is_ok());
        assert!(TcpSinkConfig::new("riemann", "localhost").validate().is_err());
        assert!(TcpSinkConfig::new("riemann", "localhost:0").validate().is_err());
    }

    #[tokio::test]
    async fn test_writes_newline_terminated_payload() {
        let Some(listener) = bind().await else { return };
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut received = Vec::new();
            for _ in 0..2 {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut buf = String::new();
                stream.read_to_string(&mut buf).await.unwrap();
                received.push(buf);
            }
            received
        });

        let sink = TcpSink::new(&TcpSinkConfig::new("riemann", addr.to_string())).unwrap();
        sink.send(b"{\"service\":\"cpu\"}\n").await.unwrap();
        sink.send(b"{\"service\":\"load\"}").await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received[0], "{\"service\":\"cpu\"}\n");
        assert_eq!(received[1], "{\"service\":\"load\"}\n");
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        let Some(listener) = bind().await else { return };
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sink = TcpSink::new(&TcpSinkConfig::new("riemann", addr.to_string())).unwrap();
        let err = sink.send(b"x\n").await.unwrap_err();
        assert!(matches!(err, SinkError::Unreachable(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_unroutable_address_times_out() {
        let config = TcpSinkConfig::new("riemann", "10.255.255.1:5555")
            .with_timeout(Duration::from_millis(100));
        let sink = TcpSink::new(&config).unwrap();
        let err = sink.send(b"x\n").await.unwrap_err();
        // Some networks reject instead of dropping the SYN.
        assert!(
            matches!(err, SinkError::Timeout(_) | SinkError::Unreachable(_)),
            "got {err:?}"
        );
    }
}
