//! Container statistics collector.
//!
//! Runs `docker stats --no-stream` once per tick and reports CPU and memory
//! per container. Rows are tab separated:
//!
//! ```text
//! NAME        CPU %   MEM USAGE / LIMIT       MEM %
//! graphrag    12.50%  1.5GiB / 7.7GiB         19.48%
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collector::command::run_command;
use crate::collector::{CollectError, Collector, CollectorKind, Schedule, Tick};
use crate::config::ConfigError;
use crate::sample::{Batch, Sample, Tags};

/// Default collection interval (30 seconds).
const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Default command timeout (15 seconds). `docker stats` samples for ~2s.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

const DEFAULT_PROGRAM: &str = "docker";

const STATS_FORMAT: &str = "{{.Name}}\t{{.CPUPerc}}\t{{.MemUsage}}\t{{.MemPerc}}";

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_program() -> String {
    DEFAULT_PROGRAM.to_string()
}

/// Configuration for the container collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Unique name for this collector instance.
    pub name: String,
    /// Enable this collector (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Container runtime binary (default: `docker`).
    #[serde(default = "default_program")]
    pub program: String,
    /// Case-insensitive substrings; a container is reported if its name
    /// contains any of them. Empty reports every container.
    #[serde(default)]
    pub filter: Vec<String>,
    /// Collection interval (mutually exclusive with cron).
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    /// Cron schedule expression (mutually exclusive with interval).
    #[serde(default)]
    pub cron: Option<String>,
    /// Command timeout (default: 15s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Static tags added to every sample.
    #[serde(default)]
    pub tags: Tags,
}

impl ContainerConfig {
    /// Create a new container collector configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            program: default_program(),
            filter: Vec::new(),
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

    /// Set the runtime binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Set the name filter.
    pub fn with_filter(mut self, filter: Vec<String>) -> Self {
        self.filter = filter;
        self
    }

    /// Set the collection interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self.cron = None;
        self
    }

    /// Set the command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn args() -> Vec<String> {
        vec![
            "stats".to_string(),
            "--no-stream".to_string(),
            "--format".to_string(),
            STATS_FORMAT.to_string(),
        ]
    }
}

/// One parsed `docker stats` row.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerStats {
    pub name: String,
    /// CPU usage as a fraction of one core; may exceed 1 on multi-core hosts.
    pub cpu: f64,
    pub memory_used: u64,
    pub memory_limit: u64,
    /// Memory usage as a fraction of the limit.
    pub memory: f64,
}

/// Parsed rows plus descriptions of rows that could not be parsed.
#[derive(Debug, Default)]
pub struct StatsOutput {
    pub rows: Vec<ContainerStats>,
    pub rejected: Vec<String>,
}

/// Parse `docker stats` output.
///
/// Blank lines, header rows and rows of a container that is starting or
/// stopping (`--` placeholders) are skipped.
pub fn parse_stats(stdout: &str) -> StatsOutput {
    let mut out = StatsOutput::default();

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        let first = fields[0].to_ascii_uppercase();
        if first == "NAME" || first == "CONTAINER" || first.starts_with("CONTAINER ") {
            continue;
        }
        if fields.iter().skip(1).any(|f| *f == "--") {
            continue;
        }

        match parse_row(&fields) {
            Some(row) => out.rows.push(row),
            None => out.rejected.push(line.to_string()),
        }
    }

    out
}

fn parse_row(fields: &[&str]) -> Option<ContainerStats> {
    let [name, cpu, usage, mem] = fields else {
        return None;
    };
    if name.is_empty() {
        return None;
    }
    let (used, limit) = usage.split_once('/')?;

    Some(ContainerStats {
        name: (*name).to_string(),
        cpu: parse_percent(cpu)?,
        memory_used: parse_size(used)?,
        memory_limit: parse_size(limit)?,
        memory: parse_percent(mem)?,
    })
}

/// Parse `"12.50%"` into `0.125`.
fn parse_percent(s: &str) -> Option<f64> {
    let value: f64 = s.trim().strip_suffix('%')?.trim().parse().ok()?;
    value.is_finite().then_some(value / 100.0)
}

/// Parse a docker size such as `1.5GiB`, `512MB` or `0B` into bytes.
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let split = s.find(|c: char| c.is_ascii_alphabetic()).unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let number: f64 = number.trim().parse().ok()?;
    if !number.is_finite() || number < 0.0 {
        return None;
    }

    let multiplier: f64 = match unit.trim() {
        "" | "B" => 1.0,
        "kB" | "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some((number * multiplier).round() as u64)
}

/// Container statistics collector.
#[derive(Debug)]
pub struct ContainerCollector {
    config: ContainerConfig,
    schedule: Schedule,
    filter: Vec<String>,
}

impl ContainerCollector {
    /// Create a new container collector.
    pub fn new(config: ContainerConfig) -> Result<Self, ConfigError> {
        let schedule = config.schedule()?;
        let filter = config.filter.iter().map(|f| f.to_lowercase()).collect();
        Ok(Self {
            config,
            schedule,
            filter,
        })
    }

    fn wants(&self, name: &str) -> bool {
        if self.filter.is_empty() {
            return true;
        }
        let name = name.to_lowercase();
        self.filter.iter().any(|f| name.contains(f.as_str()))
    }

    fn samples(&self, rows: &[ContainerStats], timestamp: i64) -> Batch {
        let mut batch = Batch::new();
        let mut running = 0u32;

        for row in rows.iter().filter(|r| self.wants(&r.name)) {
            running += 1;
            let sample = |name: &str, value: f64| {
                Sample::new(name, value, timestamp)
                    .with_tags(&self.config.tags)
                    .with_tag("container", &row.name)
            };
            batch.push(sample("container.cpu", row.cpu));
            batch.push(sample("container.memory", row.memory));
            batch.push(sample("container.memory.used", row.memory_used as f64));
            batch.push(sample("container.memory.limit", row.memory_limit as f64));
        }

        let sample = Sample::new("container.running", f64::from(running), timestamp);
        batch.push(sample.with_tags(&self.config.tags));
        batch
    }

    fn sentinel(&self, count: usize, timestamp: i64) -> Sample {
        Sample::sentinel("container.error", count as f64, timestamp).with_tags(&self.config.tags)
    }
}

#[async_trait::async_trait]
impl Collector for ContainerCollector {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> CollectorKind {
        CollectorKind::Container
    }

    fn schedule(&self) -> Schedule {
        self.schedule.clone()
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    async fn poll(&self, tick: &Tick) -> Result<Batch, CollectError> {
        let ts = tick.timestamp();
        let args = ContainerConfig::args();
        let output = run_command(&self.config.program, &args, self.config.timeout)
            .await
            .map_err(|e| {
                let partial = Batch::from(vec![self.sentinel(1, ts)]);
                e.with_partial(partial)
            })?;

        if !output.success() {
            return Err(CollectError::unavailable(format!(
                "'{}' exited with {:?}: {}",
                self.config.program,
                output.code,
                output.stderr_summary()
            ))
            .with_partial(Batch::from(vec![self.sentinel(1, ts)])));
        }

        let parsed = parse_stats(&output.stdout);
        let mut batch = self.samples(&parsed.rows, ts);

        if !parsed.rejected.is_empty() {
            batch.push(self.sentinel(parsed.rejected.len(), ts));
            return Err(CollectError::parse_failure(format!(
                "{} unparseable row(s), first: '{}'",
                parsed.rejected.len(),
                parsed.rejected[0]
            ))
            .with_partial(batch));
        }

        tracing::debug!(
            name = %self.config.name,
            containers = parsed.rows.len(),
            samples = batch.len(),
            "Container stats collected"
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectErrorKind;
    use crate::sample::State;

    const OUTPUT: &str = "graphrag\t12.50%\t1.5GiB / 7.7GiB\t19.48%\n\
                          riemann\t0.30%\t256MiB / 7.7GiB\t3.25%\n\
                          \n\
                          postgres\t1.00%\t100MB / 2GB\t5.00%\n";

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("0B"), Some(0));
        assert_eq!(parse_size("512B"), Some(512));
        assert_eq!(parse_size("1.5kB"), Some(1500));
        assert_eq!(parse_size("2MiB"), Some(2 * 1024 * 1024));
        assert_eq!(parse_size(" 1GiB "), Some(1024 * 1024 * 1024));
        assert_eq!(parse_size("3GB"), Some(3_000_000_000));
        assert_eq!(parse_size("1TiB"), Some(1 << 40));
        assert_eq!(parse_size("12XB"), None);
        assert_eq!(parse_size("GiB"), None);
        assert_eq!(parse_size("-1MB"), None);
    }

    #[test]
    fn test_parse_stats_rows() {
        let parsed = parse_stats(OUTPUT);
        assert!(parsed.rejected.is_empty());
        assert_eq!(parsed.rows.len(), 3);

        let graphrag = &parsed.rows[0];
        assert_eq!(graphrag.name, "graphrag");
        assert!((graphrag.cpu - 0.125).abs() < 1e-12);
        assert_eq!(graphrag.memory_used, 1_610_612_736);
        assert!((graphrag.memory - 0.1948).abs() < 1e-12);
    }

    #[test]
    fn test_parse_stats_skips_header_and_placeholders() {
        let output = "NAME\tCPU %\tMEM USAGE / LIMIT\tMEM %\n\
                      starting\t--\t-- / --\t--\n\
                      riemann\t0.30%\t256MiB / 7.7GiB\t3.25%\n";
        let parsed = parse_stats(output);
        assert!(parsed.rejected.is_empty());
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].name, "riemann");
    }

    #[test]
    fn test_parse_stats_rejects_malformed_rows() {
        let output = "riemann\t0.30%\t256MiB / 7.7GiB\t3.25%\n\
                      broken\tlots\t1GiB / 2GiB\t50%\n\
                      short\t1%\n";
        let parsed = parse_stats(output);
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rejected.len(), 2);
    }

    #[test]
    fn test_filter_is_case_insensitive() {
        let filter = vec!["GraphRAG".to_string(), "riemann".to_string()];
        let collector =
            ContainerCollector::new(ContainerConfig::new("docker").with_filter(filter)).unwrap();
        let parsed = parse_stats(OUTPUT);
        let batch = collector.samples(&parsed.rows, 7);

        let names: Vec<_> = batch.iter().filter_map(|s| s.tag("container")).collect();
        assert!(names.contains(&"graphrag"));
        assert!(names.contains(&"riemann"));
        assert!(!names.contains(&"postgres"));

        let running = batch.iter().find(|s| s.name() == "container.running").unwrap();
        assert_eq!(running.value(), 2.0);
    }

    #[tokio::test]
    async fn test_missing_tool_is_unavailable_with_sentinel() {
        let collector = ContainerCollector::new(
            ContainerConfig::new("docker").with_program("/nonexistent/vigil-docker"),
        )
        .unwrap();
        let err = collector.poll(&Tick::new(0, 11)).await.unwrap_err();

        assert_eq!(err.kind, CollectErrorKind::Unavailable);
        let sentinel = &err.partial.samples()[0];
        assert_eq!(sentinel.name(), "container.error");
        assert_eq!(sentinel.state(), State::Critical);
        assert_eq!(sentinel.timestamp(), 11);
    }
}
