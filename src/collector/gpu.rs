//! NVIDIA GPU collector backed by `nvidia-smi`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collector::command::run_command;
use crate::collector::{CollectError, Collector, CollectorKind, Schedule, Tick};
use crate::config::ConfigError;
use crate::sample::{Batch, Sample, Tags};

/// Default collection interval (30 seconds).
const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Default command timeout (10 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_PROGRAM: &str = "nvidia-smi";

const QUERY: &str = "--query-gpu=index,utilization.gpu,memory.used,memory.total,temperature.gpu";

const MIB: f64 = 1024.0 * 1024.0;

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_program() -> String {
    DEFAULT_PROGRAM.to_string()
}

/// Configuration for the GPU collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuConfig {
    /// Unique name for this collector instance.
    pub name: String,
    /// Enable this collector (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Custom `nvidia-smi` path (default: looked up on `PATH`).
    #[serde(default = "default_program")]
    pub program: String,
    /// Collection interval (mutually exclusive with cron).
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    /// Cron schedule expression (mutually exclusive with interval).
    #[serde(default)]
    pub cron: Option<String>,
    /// Command timeout (default: 10s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Static tags added to every sample.
    #[serde(default)]
    pub tags: Tags,
}

impl GpuConfig {
    /// Create a new GPU collector configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            program: default_program(),
            interval: Some(DEFAULT_INTERVAL),
            cron: None,
            timeout: DEFAULT_TIMEOUT,
            tags: Tags::new(),
        }
    }

    /// Resolve the configured schedule.
    pub fn schedule(&self) -> Result<Schedule, ConfigError> {
        Schedule::from_parts(self.interval, self.cron.as_deref(), DEFAULT_INTERVAL)
    }

    /// Set a custom `nvidia-smi` path.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Set the collection interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self.cron = None;
        self
    }

    fn args() -> Vec<String> {
        vec![
            QUERY.to_string(),
            "--format=csv,noheader,nounits".to_string(),
        ]
    }
}

/// Metrics of one GPU. Fields reported as `[N/A]` are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuReading {
    pub index: u32,
    /// Utilization percentage (0-100).
    pub utilization: Option<f64>,
    pub memory_used_mib: Option<f64>,
    pub memory_total_mib: Option<f64>,
    pub temperature: Option<f64>,
}

/// Parse `nvidia-smi` CSV output (no header, no units).
///
/// Returns the parsed readings and the lines that could not be parsed.
pub fn parse_gpu_csv(output: &str) -> (Vec<GpuReading>, Vec<String>) {
    let mut readings = Vec::new();
    let mut rejected = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_gpu_line(line) {
            Some(reading) => readings.push(reading),
            None => rejected.push(line.to_string()),
        }
    }

    (readings, rejected)
}

fn parse_gpu_line(line: &str) -> Option<GpuReading> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    let [index, utilization, used, total, temperature] = parts.as_slice() else {
        return None;
    };

    Some(GpuReading {
        index: index.parse().ok()?,
        utilization: field(utilization)?,
        memory_used_mib: field(used)?,
        memory_total_mib: field(total)?,
        temperature: field(temperature)?,
    })
}

/// `Some(None)` for a not-available field, `None` for garbage.
fn field(raw: &str) -> Option<Option<f64>> {
    if raw == "[N/A]" || raw == "N/A" || raw == "[Not Supported]" {
        return Some(None);
    }
    raw.parse::<f64>().ok().filter(|v| v.is_finite()).map(Some)
}

/// NVIDIA GPU collector.
#[derive(Debug)]
pub struct GpuCollector {
    config: GpuConfig,
    schedule: Schedule,
}

impl GpuCollector {
    /// Create a new GPU collector.
    pub fn new(config: GpuConfig) -> Result<Self, ConfigError> {
        let schedule = config.schedule()?;
        Ok(Self { config, schedule })
    }

    fn samples(&self, readings: &[GpuReading], timestamp: i64) -> Batch {
        let mut batch = Batch::new();

        for gpu in readings {
            let index = gpu.index.to_string();
            let sample = |name: &str, value: f64| {
                Sample::new(name, value, timestamp)
                    .with_tags(&self.config.tags)
                    .with_tag("gpu", index.as_str())
            };

            if let Some(utilization) = gpu.utilization {
                batch.push(sample("gpu.utilization", utilization / 100.0));
            }
            if let Some(used) = gpu.memory_used_mib {
                batch.push(sample("gpu.memory.used", used * MIB));
            }
            if let Some(total) = gpu.memory_total_mib {
                batch.push(sample("gpu.memory.total", total * MIB));
            }
            if let (Some(used), Some(total)) = (gpu.memory_used_mib, gpu.memory_total_mib) {
                if total > 0.0 {
                    batch.push(sample("gpu.memory", used / total));
                }
            }
            if let Some(temperature) = gpu.temperature {
                batch.push(sample("gpu.temperature", temperature));
            }
        }

        batch
    }

    fn sentinel(&self, count: usize, timestamp: i64) -> Sample {
        Sample::sentinel("gpu.error", count as f64, timestamp).with_tags(&self.config.tags)
    }
}

#[async_trait::async_trait]
impl Collector for GpuCollector {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> CollectorKind {
        CollectorKind::Gpu
    }

    fn schedule(&self) -> Schedule {
        self.schedule.clone()
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    async fn poll(&self, tick: &Tick) -> Result<Batch, CollectError> {
        let ts = tick.timestamp();
        let output = run_command(&self.config.program, &GpuConfig::args(), self.config.timeout)
            .await
            .map_err(|e| e.with_partial(Batch::from(vec![self.sentinel(1, ts)])))?;

        if !output.success() {
            return Err(CollectError::unavailable(format!(
                "'{}' exited with {:?}: {}",
                self.config.program,
                output.code,
                output.stderr_summary()
            ))
            .with_partial(Batch::from(vec![self.sentinel(1, ts)])));
        }

        let (readings, rejected) = parse_gpu_csv(&output.stdout);
        let mut batch = self.samples(&readings, ts);

        if !rejected.is_empty() {
            batch.push(self.sentinel(rejected.len(), ts));
            return Err(CollectError::parse_failure(format!(
                "{} unparseable line(s), first: '{}'",
                rejected.len(),
                rejected[0]
            ))
            .with_partial(batch));
        }

        tracing::debug!(name = %self.config.name, gpus = readings.len(), "GPU metrics collected");
        Ok(batch)
    }
}
