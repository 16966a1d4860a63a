//! Sink configuration structures.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::encoder::{self, Encoder};
use crate::sink::{HttpSink, HttpSinkConfig, Sink, TcpSink, TcpSinkConfig, UdpSink, UdpSinkConfig};

use super::validation::ConfigError;

/// A constructed sink together with the encoder its payloads use.
pub type SinkPair = (Arc<dyn Sink>, Arc<dyn Encoder>);

/// Sinks configuration grouped by kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SinksConfig {
    /// InfluxDB-style write endpoints.
    #[serde(default)]
    pub http: Vec<HttpSinkConfig>,

    /// TCP event listeners.
    #[serde(default)]
    pub tcp: Vec<TcpSinkConfig>,

    /// UDP listeners.
    #[serde(default)]
    pub udp: Vec<UdpSinkConfig>,
}

impl SinksConfig {
    pub fn len(&self) -> usize {
        self.http.len() + self.tcp.len() + self.udp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validate all sink configurations.
    ///
    /// Names must be non-empty and unique across every kind.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen_names = HashSet::new();
        let names = self
            .http
            .iter()
            .map(|c| ("http", c.name.as_str()))
            .chain(self.tcp.iter().map(|c| ("tcp", c.name.as_str())))
            .chain(self.udp.iter().map(|c| ("udp", c.name.as_str())));

        for (kind, name) in names {
            if name.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{kind} sink name cannot be empty"
                )));
            }
            if !seen_names.insert(name) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate sink name: '{name}'"
                )));
            }
        }

        for http in &self.http {
            http.validate()?;
        }
        for tcp in &self.tcp {
            tcp.validate()?;
        }
        for udp in &self.udp {
            udp.validate()?;
        }
        Ok(())
    }

    /// Build every sink with its configured encoder.
    ///
    /// # Errors
    /// Returns `ConfigError` if a sink cannot be constructed.
    pub fn build(&self) -> Result<Vec<SinkPair>, ConfigError> {
        let mut sinks: Vec<SinkPair> = Vec::with_capacity(self.len());

        for http in &self.http {
            sinks.push((
                Arc::new(HttpSink::new(http)?),
                encoder::build(http.encoder, http.ttl),
            ));
        }
        for tcp in &self.tcp {
            sinks.push((
                Arc::new(TcpSink::new(tcp)?),
                encoder::build(tcp.encoder, tcp.ttl),
            ));
        }
        for udp in &self.udp {
            sinks.push((
                Arc::new(UdpSink::new(udp)?),
                encoder::build(udp.encoder, udp.ttl),
            ));
        }
        Ok(sinks)
    }
}
