//! Collector configuration structures.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::collector::{
    Collector, ContainerCollector, ContainerConfig, GpuCollector, GpuConfig, HostCollector,
    HostConfig, ServiceCollector, ServiceConfig, self_report,
};

use super::validation::ConfigError;

/// Collectors configuration grouped by kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorsConfig {
    /// Host resource collectors.
    #[serde(default)]
    pub host: Vec<HostConfig>,

    /// Service health probes.
    #[serde(default)]
    pub service: Vec<ServiceConfig>,

    /// Container runtime collectors.
    #[serde(default)]
    pub container: Vec<ContainerConfig>,

    /// GPU collectors.
    #[serde(default)]
    pub gpu: Vec<GpuConfig>,
}

impl CollectorsConfig {
    /// Merge another CollectorsConfig into this one.
    #[must_use]
    pub fn merge(mut self, other: CollectorsConfig) -> Self {
        self.host.extend(other.host);
        self.service.extend(other.service);
        self.container.extend(other.container);
        self.gpu.extend(other.gpu);
        self
    }

    /// Total number of configured collectors, enabled or not.
    pub fn len(&self) -> usize {
        self.host.len() + self.service.len() + self.container.len() + self.gpu.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validate all collector configurations.
    ///
    /// Names must be non-empty and unique across every kind. The pipeline
    /// self-report collector's name is reserved.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen_names = HashSet::new();
        let mut check_name = |kind: &str, name: &str| {
            if name.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{kind} collector name cannot be empty"
                )));
            }
            if name == self_report::NAME {
                return Err(ConfigError::ValidationError(format!(
                    "{kind} collector name '{name}' is reserved"
                )));
            }
            if !seen_names.insert(name.to_string()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate collector name: '{name}'"
                )));
            }
            Ok(())
        };
        let scoped = |kind: &str, name: &str, e: ConfigError| match e {
            ConfigError::ValidationError(msg) => {
                ConfigError::ValidationError(format!("{kind} collector '{name}': {msg}"))
            }
            other => other,
        };

        for host in &self.host {
            check_name("host", &host.name)?;
            host.schedule().map_err(|e| scoped("host", &host.name, e))?;
        }

        for service in &self.service {
            check_name("service", &service.name)?;
            service.validate()?;
        }

        for container in &self.container {
            check_name("container", &container.name)?;
            if container.program.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "container collector '{}': program cannot be empty",
                    container.name
                )));
            }
            container
                .schedule()
                .map_err(|e| scoped("container", &container.name, e))?;
        }

        for gpu in &self.gpu {
            check_name("gpu", &gpu.name)?;
            if gpu.program.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "gpu collector '{}': program cannot be empty",
                    gpu.name
                )));
            }
            gpu.schedule().map_err(|e| scoped("gpu", &gpu.name, e))?;
        }

        Ok(())
    }

    /// Build every enabled collector.
    ///
    /// # Errors
    /// Returns `ConfigError` if a collector cannot be constructed.
    pub fn build(&self) -> Result<Vec<Arc<dyn Collector>>, ConfigError> {
        let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();

        for host in self.host.iter().filter(|c| c.enabled) {
            collectors.push(Arc::new(HostCollector::new(host.clone())?));
        }
        for service in self.service.iter().filter(|c| c.enabled) {
            collectors.push(Arc::new(ServiceCollector::new(service.clone())?));
        }
        for container in self.container.iter().filter(|c| c.enabled) {
            collectors.push(Arc::new(ContainerCollector::new(container.clone())?));
        }
        for gpu in self.gpu.iter().filter(|c| c.enabled) {
            collectors.push(Arc::new(GpuCollector::new(gpu.clone())?));
        }

        let skipped = self.len() - collectors.len();
        if skipped > 0 {
            tracing::info!(skipped, "Disabled collectors skipped");
        }
        Ok(collectors)
    }

    /// Load collector configurations from all YAML files in a directory.
    pub fn load_from_dir(dir_path: &str) -> Result<Self, ConfigError> {
        let dir = Path::new(dir_path);
        if !dir.exists() {
            return Err(ConfigError::ValidationError(format!(
                "collector_path '{}' does not exist",
                dir_path
            )));
        }
        if !dir.is_dir() {
            return Err(ConfigError::ValidationError(format!(
                "collector_path '{}' is not a directory",
                dir_path
            )));
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if path.is_file() && (ext == "yaml" || ext == "yml") {
                paths.push(path);
            }
        }
        // Directory order is unspecified; keep merges reproducible.
        paths.sort();

        let mut merged = Self::default();
        for path in paths {
            tracing::debug!(path = %path.display(), "Loading collector config");
            let content = std::fs::read_to_string(&path)?;
            let file_config: Self = serde_yaml::from_str(&content).map_err(|e| {
                ConfigError::ValidationError(format!("failed to parse '{}': {}", path.display(), e))
            })?;
            merged = merged.merge(file_config);
        }

        Ok(merged)
    }
}
