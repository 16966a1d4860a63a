//! Host resource collector.
//!
//! Reports CPU, memory, per-mount disk usage, core-normalized load averages
//! and network byte counters. Fractions are in `[0, 1]`; byte metrics are
//! absolute. Disk usage samples carry a state from [`classify`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, Networks, System};

use crate::collector::{CollectError, Collector, CollectorKind, Schedule, Tick};
use crate::config::ConfigError;
use crate::sample::{Batch, Sample, Tags, classify};

/// Default collection interval (30 seconds).
const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Default probe timeout (5 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_network() -> bool {
    true
}

/// Configuration for the host resource collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Unique name for this collector instance.
    pub name: String,
    /// Enable this collector (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Collection interval (mutually exclusive with cron).
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    /// Cron schedule expression (mutually exclusive with interval).
    #[serde(default)]
    pub cron: Option<String>,
    /// Probe timeout (default: 5s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Mount points to report; empty reports every mounted filesystem.
    #[serde(default)]
    pub mounts: Vec<String>,
    /// Report network byte counters (default: true).
    #[serde(default = "default_network")]
    pub network: bool,
    /// Static tags added to every sample.
    #[serde(default)]
    pub tags: Tags,
}

impl HostConfig {
    /// Create a new host collector configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            interval: Some(DEFAULT_INTERVAL),
            cron: None,
            timeout: DEFAULT_TIMEOUT,
            mounts: Vec::new(),
            network: true,
            tags: Tags::new(),
        }
    }

    /// Resolve the configured schedule.
    pub fn schedule(&self) -> Result<Schedule, ConfigError> {
        Schedule::from_parts(self.interval, self.cron.as_deref(), DEFAULT_INTERVAL)
    }

    /// Set the collection interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self.cron = None;
        self
    }

    /// Set the probe timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Restrict disk reporting to the given mount points.
    pub fn with_mounts(mut self, mounts: Vec<String>) -> Self {
        self.mounts = mounts;
        self
    }

    /// Set static tags.
    pub fn with_static_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }
}

/// Space usage of one mounted filesystem, in bytes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskUsage {
    pub mount: String,
    pub total: u64,
    pub available: u64,
}

/// Raw 1/5/15-minute load averages.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Cumulative network byte counters across all interfaces.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetworkTotals {
    pub sent: u64,
    pub received: u64,
}

/// Point-in-time view of host resources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostSnapshot {
    /// Average CPU usage across cores as a fraction.
    pub cpu_usage: f64,
    pub cpu_count: usize,
    pub memory_total: u64,
    pub memory_used: u64,
    pub memory_available: u64,
    pub load: LoadAverage,
    pub disks: Vec<DiskUsage>,
    pub network: Option<NetworkTotals>,
}

/// Source of host snapshots.
#[async_trait::async_trait]
pub trait HostProbe: Send + Sync + 'static {
    async fn snapshot(&self) -> Result<HostSnapshot, CollectError>;
}

/// [`HostProbe`] backed by `sysinfo`, run on the blocking pool.
#[derive(Clone)]
pub struct SysinfoProbe {
    system: Arc<Mutex<System>>,
    network: bool,
}

impl SysinfoProbe {
    pub fn new(network: bool) -> Self {
        let mut system = System::new();
        // CPU usage is computed between two refreshes; prime the first one.
        system.refresh_cpu_usage();
        Self {
            system: Arc::new(Mutex::new(system)),
            network,
        }
    }

    fn read(system: &Mutex<System>, network: bool) -> HostSnapshot {
        let mut system = system.lock();
        system.refresh_cpu_usage();
        system.refresh_memory();

        let load = System::load_average();
        let disks = Disks::new_with_refreshed_list()
            .iter()
            .map(|disk| DiskUsage {
                mount: disk.mount_point().to_string_lossy().into_owned(),
                total: disk.total_space(),
                available: disk.available_space(),
            })
            .collect();

        let network = network.then(|| {
            let networks = Networks::new_with_refreshed_list();
            networks
                .iter()
                .fold(NetworkTotals::default(), |acc, (_, data)| NetworkTotals {
                    sent: acc.sent.saturating_add(data.total_transmitted()),
                    received: acc.received.saturating_add(data.total_received()),
                })
        });

        HostSnapshot {
            cpu_usage: f64::from(system.global_cpu_usage()) / 100.0,
            cpu_count: system.cpus().len(),
            memory_total: system.total_memory(),
            memory_used: system.used_memory(),
            memory_available: system.available_memory(),
            load: LoadAverage {
                one: load.one,
                five: load.five,
                fifteen: load.fifteen,
            },
            disks,
            network,
        }
    }
}

impl std::fmt::Debug for SysinfoProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoProbe")
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl HostProbe for SysinfoProbe {
    async fn snapshot(&self) -> Result<HostSnapshot, CollectError> {
        let system = Arc::clone(&self.system);
        let network = self.network;
        tokio::task::spawn_blocking(move || Self::read(&system, network))
            .await
            .map_err(|e| CollectError::unavailable(format!("host probe task failed: {e}")))
    }
}

/// Host resource collector.
pub struct HostCollector {
    config: HostConfig,
    schedule: Schedule,
    probe: Box<dyn HostProbe>,
}

impl HostCollector {
    /// Create a host collector reading from `sysinfo`.
    pub fn new(config: HostConfig) -> Result<Self, ConfigError> {
        let probe = SysinfoProbe::new(config.network);
        Self::with_probe(config, probe)
    }

    /// Create a host collector with a custom probe.
    pub fn with_probe(config: HostConfig, probe: impl HostProbe) -> Result<Self, ConfigError> {
        let schedule = config.schedule()?;
        Ok(Self {
            config,
            schedule,
            probe: Box::new(probe),
        })
    }

    /// Map a snapshot to samples stamped with `timestamp`.
    fn samples(&self, snapshot: &HostSnapshot, timestamp: i64) -> Batch {
        let tags = &self.config.tags;
        let sample = |name: &str, value: f64| Sample::new(name, value, timestamp).with_tags(tags);
        let mut batch = Batch::new();

        batch.push(sample("cpu", snapshot.cpu_usage.clamp(0.0, 1.0)));

        if snapshot.memory_total > 0 {
            let used = snapshot.memory_used as f64 / snapshot.memory_total as f64;
            batch.push(sample("memory", used.clamp(0.0, 1.0)));
            batch.push(sample("memory.used", snapshot.memory_used as f64));
            batch.push(sample("memory.available", snapshot.memory_available as f64));
        }

        for disk in &snapshot.disks {
            if disk.total == 0 || !self.wants_mount(&disk.mount) {
                continue;
            }
            let used = disk.total.saturating_sub(disk.available);
            let usage = used as f64 / disk.total as f64;
            batch.push(
                sample("disk.usage", usage)
                    .with_tag("mount", &disk.mount)
                    .with_state(classify(usage)),
            );
            batch.push(sample("disk.free", disk.available as f64).with_tag("mount", &disk.mount));
            batch.push(sample("disk.used", used as f64).with_tag("mount", &disk.mount));
            batch.push(sample("disk.total", disk.total as f64).with_tag("mount", &disk.mount));
        }

        if snapshot.cpu_count > 0 {
            let cores = snapshot.cpu_count as f64;
            batch.push(sample("load", snapshot.load.one / cores));
            batch.push(sample("load.5min", snapshot.load.five / cores));
            batch.push(sample("load.15min", snapshot.load.fifteen / cores));
        }

        if let Some(network) = snapshot.network {
            batch.push(sample("network.bytes.sent", network.sent as f64));
            batch.push(sample("network.bytes.recv", network.received as f64));
        }

        batch
    }

    fn wants_mount(&self, mount: &str) -> bool {
        self.config.mounts.is_empty() || self.config.mounts.iter().any(|m| m == mount)
    }
}

impl std::fmt::Debug for HostCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCollector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Collector for HostCollector {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> CollectorKind {
        CollectorKind::Host
    }

    fn schedule(&self) -> Schedule {
        self.schedule.clone()
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    async fn poll(&self, tick: &Tick) -> Result<Batch, CollectError> {
        let snapshot = match tokio::time::timeout(self.config.timeout, self.probe.snapshot()).await
        {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => return Err(self.failed(e, tick)),
            Err(_) => {
                let e = CollectError::timeout(format!(
                    "host snapshot exceeded {}ms",
                    self.config.timeout.as_millis()
                ));
                return Err(self.failed(e, tick));
            }
        };

        let batch = self.samples(&snapshot, tick.timestamp());
        tracing::debug!(name = %self.config.name, samples = batch.len(), "Host snapshot collected");
        Ok(batch)
    }
}

impl HostCollector {
    fn failed(&self, err: CollectError, tick: &Tick) -> CollectError {
        let sentinel =
            Sample::sentinel("host.error", 1.0, tick.timestamp()).with_tags(&self.config.tags);
        err.with_partial(Batch::from(vec![sentinel]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectErrorKind;
    use crate::sample::State;

    struct FixedProbe(HostSnapshot);

    #[async_trait::async_trait]
    impl HostProbe for FixedProbe {
        async fn snapshot(&self) -> Result<HostSnapshot, CollectError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenProbe;

    #[async_trait::async_trait]
    impl HostProbe for BrokenProbe {
        async fn snapshot(&self) -> Result<HostSnapshot, CollectError> {
            Err(CollectError::unavailable("procfs not mounted"))
        }
    }

    fn snapshot() -> HostSnapshot {
        HostSnapshot {
            cpu_usage: 0.42,
            cpu_count: 4,
            memory_total: 1000,
            memory_used: 250,
            memory_available: 750,
            load: LoadAverage {
                one: 2.0,
                five: 1.0,
                fifteen: 4.0,
            },
            disks: vec![
                DiskUsage {
                    mount: "/".to_string(),
                    total: 100,
                    available: 15,
                },
                DiskUsage {
                    mount: "/data".to_string(),
                    total: 100,
                    available: 95,
                },
                DiskUsage {
                    mount: "/proc".to_string(),
                    total: 0,
                    available: 0,
                },
            ],
            network: Some(NetworkTotals {
                sent: 10,
                received: 20,
            }),
        }
    }

    fn find<'a>(batch: &'a Batch, name: &str, mount: Option<&str>) -> &'a Sample {
        batch
            .iter()
            .find(|s| s.name() == name && s.tag("mount") == mount)
            .unwrap_or_else(|| panic!("missing sample {name} {mount:?}"))
    }

    #[tokio::test]
    async fn test_host_samples_from_snapshot() {
        let collector =
            HostCollector::with_probe(HostConfig::new("host"), FixedProbe(snapshot())).unwrap();
        let batch = collector.poll(&Tick::new(0, 1_000)).await.unwrap();

        assert_eq!(find(&batch, "cpu", None).value(), 0.42);
        assert_eq!(find(&batch, "memory", None).value(), 0.25);
        assert_eq!(find(&batch, "load", None).value(), 0.5);
        assert_eq!(find(&batch, "load.5min", None).value(), 0.25);
        assert_eq!(find(&batch, "load.15min", None).value(), 1.0);
        assert_eq!(find(&batch, "network.bytes.recv", None).value(), 20.0);

        let root = find(&batch, "disk.usage", Some("/"));
        assert_eq!(root.value(), 0.85);
        assert_eq!(root.state(), State::Warning);
        assert_eq!(find(&batch, "disk.free", Some("/")).value(), 15.0);
        assert_eq!(find(&batch, "disk.usage", Some("/data")).state(), State::Ok);

        // Pseudo filesystems without capacity are skipped.
        assert!(batch.iter().all(|s| s.tag("mount") != Some("/proc")));
        // Every sample carries the tick timestamp.
        assert!(batch.iter().all(|s| s.timestamp() == 1_000));
    }

    #[tokio::test]
    async fn test_host_mount_filter_and_tags() {
        let mut tags = Tags::new();
        tags.insert("role".to_string(), "db".to_string());
        let config = HostConfig::new("host")
            .with_mounts(vec!["/data".to_string()])
            .with_static_tags(tags);
        let collector = HostCollector::with_probe(config, FixedProbe(snapshot())).unwrap();

        let batch = collector.poll(&Tick::new(0, 1)).await.unwrap();
        let mounts: Vec<_> = batch.iter().filter_map(|s| s.tag("mount")).collect();
        assert!(mounts.iter().all(|m| *m == "/data"));
        assert!(batch.iter().all(|s| s.tag("role") == Some("db")));
    }

    #[tokio::test]
    async fn test_host_probe_failure_reports_sentinel() {
        let collector = HostCollector::with_probe(HostConfig::new("host"), BrokenProbe).unwrap();
        let err = collector.poll(&Tick::new(3, 99)).await.unwrap_err();

        assert_eq!(err.kind, CollectErrorKind::Unavailable);
        assert_eq!(err.partial.len(), 1);
        let sentinel = &err.partial.samples()[0];
        assert_eq!(sentinel.name(), "host.error");
        assert_eq!(sentinel.state(), State::Critical);
        assert_eq!(sentinel.timestamp(), 99);
    }

    #[tokio::test]
    async fn test_sysinfo_probe_reads_host() {
        let probe = SysinfoProbe::new(false);
        let snapshot = probe.snapshot().await.unwrap();
        assert!(snapshot.cpu_usage >= 0.0);
        assert!(snapshot.network.is_none());
    }

    #[test]
    fn test_host_config_defaults() {
        let config = HostConfig::new("host");
        assert!(config.enabled);
        assert!(config.network);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert!(matches!(
            config.schedule().unwrap(),
            Schedule::Interval(d) if d == DEFAULT_INTERVAL
        ));
    }
}
