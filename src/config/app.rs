//! Application configuration structures.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collector::{DEFAULT_ERROR_DELAY, self_report};
use crate::pipeline::PipelineConfig;
use crate::sample::Tags;

use super::collector::CollectorsConfig;
use super::sink::SinksConfig;
use super::validation::ConfigError;

// =============================================================================
// Constants
// =============================================================================

/// Config file used when neither `--config` nor `VIGIL_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "configs/vigil.yaml";

/// Host tag used when the system host name cannot be read.
const FALLBACK_HOSTNAME: &str = "localhost";

fn default_error_delay() -> Duration {
    DEFAULT_ERROR_DELAY
}

fn default_self_report_interval() -> Option<Duration> {
    Some(self_report::DEFAULT_INTERVAL)
}

// =============================================================================
// Agent Configuration
// =============================================================================

/// Agent identity and scheduling behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Value of the `host` tag (default: system host name).
    #[serde(default)]
    pub hostname: Option<String>,

    /// Tags added to every sample that does not carry them.
    #[serde(default)]
    pub tags: Tags,

    /// Pause after a collector panic (default: 30s).
    #[serde(default = "default_error_delay", with = "humantime_serde")]
    pub error_delay: Duration,

    /// Interval of the pipeline self-report collector (default: 60s).
    /// `0s` turns the self-report off.
    #[serde(default = "default_self_report_interval", with = "humantime_serde")]
    pub self_report_interval: Option<Duration>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            tags: Tags::new(),
            error_delay: DEFAULT_ERROR_DELAY,
            self_report_interval: default_self_report_interval(),
        }
    }
}

impl AgentConfig {
    /// Configured host name, falling back to the system's.
    pub fn hostname(&self) -> String {
        self.hostname
            .clone()
            .filter(|h| !h.trim().is_empty())
            .or_else(sysinfo::System::host_name)
            .unwrap_or_else(|| FALLBACK_HOSTNAME.to_string())
    }

    /// Agent tags plus `host`, unless the tags already name one.
    pub fn global_tags(&self) -> Tags {
        let mut tags = self.tags.clone();
        tags.entry("host".to_string())
            .or_insert_with(|| self.hostname());
        tags
    }

    /// Self-report interval, or `None` when the self-report is turned off.
    pub fn self_report_interval(&self) -> Option<Duration> {
        self.self_report_interval.filter(|d| !d.is_zero())
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
///
/// Loaded once at startup and read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Agent identity.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Delivery pipeline tuning.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Collector configurations grouped by kind.
    #[serde(default)]
    pub collectors: CollectorsConfig,

    /// Path to a directory with additional collector config files.
    #[serde(default)]
    pub collector_path: Option<String>,

    /// Sink configurations grouped by kind.
    #[serde(default)]
    pub sinks: SinksConfig,
}

impl AppConfig {
    /// Parse and validate configuration from YAML text.
    ///
    /// # Errors
    /// Returns `ConfigError` if the text cannot be parsed or validated.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    ///
    /// If `collector_path` is specified, every YAML file in that directory is
    /// merged into the collectors before validation.
    ///
    /// # Errors
    /// Returns `ConfigError` if a file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Self = serde_yaml::from_str(&content)?;

        if let Some(ref collector_dir) = config.collector_path {
            let additional = CollectorsConfig::load_from_dir(collector_dir)?;
            config.collectors = config.collectors.merge(additional);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.error_delay.is_zero() {
            return Err(ConfigError::ValidationError(
                "agent error_delay must be positive".to_string(),
            ));
        }

        self.pipeline.validate()?;
        self.collectors.validate()?;

        if self.sinks.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one sink must be configured".to_string(),
            ));
        }
        self.sinks.validate()?;

        Ok(())
    }
}
