//! Configuration module for the vigil agent.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Agent identity (hostname, global tags, error delay, self-report)
//! - Delivery pipeline tuning (attempts, queue capacity, backoff)
//! - Collectors grouped by kind, optionally extended from a directory
//! - Sinks grouped by kind

mod app;
mod collector;
mod sink;
mod validation;

pub use app::{AgentConfig, AppConfig};
pub use collector::CollectorsConfig;
pub use sink::{SinkPair, SinksConfig};
pub use validation::{ConfigError, expand_env_vars, validate_address};

// Re-export constants
pub use app::DEFAULT_CONFIG_PATH;
