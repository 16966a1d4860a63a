//! Delivery pipeline.
//!
//! Each configured sink gets a lane: a bounded drop-oldest queue, a circuit
//! breaker and one worker task that encodes and sends queued batches with
//! retry/backoff.
//!
//! - [`DeliveryPipeline`]: owns the workers, built via [`PipelineBuilder`]
//! - [`PipelineHandle`]: cloneable submit/snapshot facade used by the scheduler
//!
//! Every submitted task ends in exactly one counter: delivered, dropped
//! (attempts exhausted, circuit open, shutdown) or evicted.

mod backoff;
mod breaker;
mod queue;
mod stats;
mod task;
mod worker;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub use backoff::Backoff;
pub use breaker::{Admission, CircuitBreaker, CircuitState};
pub use queue::{BoundedQueue, PushOutcome};
pub use stats::{PipelineSnapshot, SinkSnapshot, SinkStats};
pub use task::DeliveryTask;

use crate::config::ConfigError;
use crate::encoder::{Encoder, EncoderKind};
use crate::sample::Batch;
use crate::sink::{Sink, SinkError};
use worker::{RetryPolicy, SinkWorker};

// =============================================================================
// Constants
// =============================================================================

/// Default attempts per task.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default per-sink queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default upper bound for one send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time granted to workers to drain their queues on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Default consecutive failures that open a sink's circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_send_timeout() -> Duration {
    DEFAULT_SEND_TIMEOUT
}

fn default_shutdown_grace() -> Duration {
    DEFAULT_SHUTDOWN_GRACE
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_jitter() -> bool {
    true
}

fn default_retry_base() -> Duration {
    Duration::from_secs(1)
}

fn default_retry_cap() -> Duration {
    Duration::from_secs(30)
}

fn default_breaker_base() -> Duration {
    Duration::from_secs(10)
}

fn default_breaker_cap() -> Duration {
    Duration::from_secs(300)
}

// =============================================================================
// Configuration
// =============================================================================

/// Backoff between attempts of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_base", with = "humantime_serde")]
    pub base: Duration,
    #[serde(default = "default_retry_cap", with = "humantime_serde")]
    pub cap: Duration,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base: default_retry_base(),
            cap: default_retry_cap(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.base, self.cap).with_jitter(self.jitter)
    }
}

/// Per-sink circuit breaker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Cooldown after the circuit first opens; doubles on each failed probe.
    #[serde(default = "default_breaker_base", with = "humantime_serde")]
    pub base: Duration,
    #[serde(default = "default_breaker_cap", with = "humantime_serde")]
    pub cap: Duration,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            base: default_breaker_base(),
            cap: default_breaker_cap(),
            jitter: true,
        }
    }
}

impl BreakerConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.base, self.cap).with_jitter(self.jitter)
    }
}

/// Delivery pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_send_timeout", with = "humantime_serde")]
    pub send_timeout: Duration,
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Validate tuning values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` for zero counts or durations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline max_attempts must be positive".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline queue_capacity must be positive".to_string(),
            ));
        }
        if self.send_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "pipeline send_timeout must be positive".to_string(),
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline breaker failure_threshold must be positive".to_string(),
            ));
        }
        if self.retry.cap < self.retry.base || self.breaker.cap < self.breaker.base {
            return Err(ConfigError::ValidationError(
                "pipeline backoff cap must not be below base".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Terminal non-delivery outcome of a task.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The task was evicted from a full queue by a newer one.
    #[error("queue of sink '{sink}' full, evicted task {task_id}")]
    QueueFull { sink: String, task_id: u64 },

    /// The sink's circuit is open.
    #[error("circuit of sink '{sink}' is open")]
    CircuitOpen { sink: String },

    /// Every attempt failed.
    #[error("sink '{sink}' failed {attempts} attempt(s): {last_error}")]
    AttemptsExhausted {
        sink: String,
        attempts: u32,
        #[source]
        last_error: SinkError,
    },

    /// The pipeline stopped before the task could be delivered.
    #[error("pipeline is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Builder
// =============================================================================

struct Lane {
    name: String,
    encoder_kind: EncoderKind,
    queue: Arc<BoundedQueue<DeliveryTask>>,
    stats: Arc<SinkStats>,
}

struct Shared {
    lanes: Vec<Lane>,
    next_id: AtomicU64,
    collect_errors: AtomicU64,
}

/// Builder for constructing the delivery pipeline.
pub struct PipelineBuilder {
    config: PipelineConfig,
    sinks: Vec<(Arc<dyn Sink>, Arc<dyn Encoder>)>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            sinks: Vec::new(),
        }
    }

    /// Add a sink with the encoder used for its payloads.
    pub fn sink(mut self, sink: Arc<dyn Sink>, encoder: Arc<dyn Encoder>) -> Self {
        self.sinks.push((sink, encoder));
        self
    }

    /// Spawn one worker per sink and return the running pipeline.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` for invalid tuning, no sinks or
    /// duplicate sink names.
    pub fn build(self) -> Result<DeliveryPipeline, ConfigError> {
        self.config.validate()?;
        if self.sinks.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one sink is required".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for (sink, _) in &self.sinks {
            if !names.insert(sink.name().to_string()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate sink name: '{}'",
                    sink.name()
                )));
            }
        }

        let retry = RetryPolicy {
            max_attempts: self.config.max_attempts,
            send_timeout: self.config.send_timeout,
            backoff: self.config.retry.backoff(),
        };
        let cancel = CancellationToken::new();
        let mut workers = JoinSet::new();
        let mut lanes = Vec::with_capacity(self.sinks.len());

        for (sink, encoder) in self.sinks {
            let queue = Arc::new(BoundedQueue::new(self.config.queue_capacity));
            let stats = Arc::new(SinkStats::default());

            lanes.push(Lane {
                name: sink.name().to_string(),
                encoder_kind: encoder.kind(),
                queue: Arc::clone(&queue),
                stats: Arc::clone(&stats),
            });

            tracing::info!(
                sink = %sink.name(),
                kind = %sink.kind(),
                encoder = %encoder.kind(),
                "Sink registered"
            );

            let worker = SinkWorker {
                sink,
                encoder,
                queue,
                stats,
                breaker: CircuitBreaker::new(
                    self.config.breaker.failure_threshold,
                    self.config.breaker.backoff(),
                ),
                retry,
                cancel: cancel.clone(),
            };
            workers.spawn(worker.run());
        }

        Ok(DeliveryPipeline {
            handle: PipelineHandle {
                shared: Arc::new(Shared {
                    lanes,
                    next_id: AtomicU64::new(1),
                    collect_errors: AtomicU64::new(0),
                }),
            },
            workers,
            cancel,
            grace: self.config.shutdown_grace,
        })
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Running delivery pipeline.
pub struct DeliveryPipeline {
    handle: PipelineHandle,
    workers: JoinSet<()>,
    cancel: CancellationToken,
    grace: Duration,
}

impl DeliveryPipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Cloneable handle for submitting batches.
    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Stop accepting tasks and let workers drain their queues.
    ///
    /// Workers still busy when the grace period ends are cancelled; their
    /// in-flight and queued tasks are counted as dropped.
    pub async fn shutdown(mut self) -> PipelineSnapshot {
        for lane in &self.handle.shared.lanes {
            lane.queue.close();
        }

        let deadline = tokio::time::Instant::now() + self.grace;
        loop {
            match tokio::time::timeout_at(deadline, self.workers.join_next()).await {
                Ok(Some(Err(e))) => tracing::error!(error = %e, "Delivery worker failed"),
                Ok(Some(Ok(()))) => {}
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        grace = ?self.grace,
                        "Shutdown grace elapsed, cancelling delivery"
                    );
                    self.cancel.cancel();
                    while let Some(result) = self.workers.join_next().await {
                        if let Err(e) = result {
                            tracing::error!(error = %e, "Delivery worker failed");
                        }
                    }
                    break;
                }
            }
        }

        for lane in &self.handle.shared.lanes {
            let leftover = lane.queue.drain();
            if leftover.is_empty() {
                continue;
            }
            for _ in &leftover {
                SinkStats::incr(&lane.stats.dropped_shutdown);
            }
            tracing::warn!(
                sink = %lane.name,
                tasks = leftover.len(),
                error = %PipelineError::ShuttingDown,
                "Dropping queued tasks"
            );
        }

        let snapshot = self.handle.snapshot();
        tracing::info!(
            delivered = snapshot.delivered(),
            dropped = snapshot.drops(),
            evicted = snapshot.evictions(),
            "Delivery pipeline stopped"
        );
        snapshot
    }
}

impl std::fmt::Debug for DeliveryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryPipeline")
            .field("sinks", &self.handle.sink_names())
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

/// Cloneable facade over the pipeline's lanes.
#[derive(Clone)]
pub struct PipelineHandle {
    shared: Arc<Shared>,
}

impl PipelineHandle {
    /// Fan a batch out into one task per sink.
    ///
    /// Returns the number of tasks queued. Empty batches are ignored.
    pub fn submit(&self, batch: Batch) -> usize {
        if batch.is_empty() {
            return 0;
        }
        let batch = Arc::new(batch);
        let mut queued = 0;

        for lane in &self.shared.lanes {
            let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
            let task = DeliveryTask::new(id, Arc::clone(&batch), lane.encoder_kind, &lane.name);
            SinkStats::incr(&lane.stats.enqueued);

            match lane.queue.push(task) {
                PushOutcome::Queued => queued += 1,
                PushOutcome::Evicted(old) => {
                    queued += 1;
                    SinkStats::incr(&lane.stats.evictions);
                    let err = PipelineError::QueueFull {
                        sink: lane.name.clone(),
                        task_id: old.id,
                    };
                    tracing::warn!(error = %err, "Task evicted");
                }
                PushOutcome::Closed(task) => {
                    SinkStats::incr(&lane.stats.dropped_shutdown);
                    tracing::debug!(
                        sink = %lane.name,
                        task_id = task.id,
                        error = %PipelineError::ShuttingDown,
                        "Task rejected"
                    );
                }
            }
        }

        queued
    }

    /// Count a failed collector tick.
    pub fn record_collect_error(&self) {
        self.shared.collect_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.shared.lanes.iter().map(|l| l.name.clone()).collect()
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            sinks: self
                .shared
                .lanes
                .iter()
                .map(|lane| lane.stats.snapshot(&lane.name, lane.queue.len()))
                .collect(),
            collect_errors: self.shared.collect_errors.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("sinks", &self.sink_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::LineProtocolEncoder;
    use crate::sample::Sample;
    use crate::sink::SinkKind;
    use parking_lot::Mutex;

    /// Records payloads; fails while `failing` is set.
    #[derive(Default)]
    struct RecordingSink {
        name: String,
        failing: Mutex<bool>,
        payloads: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingSink {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                ..Default::default()
            })
        }
    }

    #[async_trait::async_trait]
    impl Sink for RecordingSink {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> SinkKind {
            SinkKind::Http
        }

        async fn send(&self, payload: &[u8]) -> Result<(), SinkError> {
            self.payloads.lock().push(payload.to_vec());
            if *self.failing.lock() {
                Err(SinkError::Unreachable("down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn batch(value: f64) -> Batch {
        Batch::from(vec![Sample::new("cpu", value, 1_000_000_000)])
    }

    fn config() -> PipelineConfig {
        PipelineConfig::default()
            .with_retry(RetryConfig {
                base: Duration::from_millis(100),
                cap: Duration::from_secs(1),
                jitter: false,
            })
            .with_breaker(BreakerConfig {
                jitter: false,
                ..BreakerConfig::default()
            })
    }

    #[test]
    fn test_pipeline_config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.base, Duration::from_secs(10));
        assert_eq!(config.breaker.cap, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pipeline_config_validation() {
        assert!(PipelineConfig::default().with_max_attempts(0).validate().is_err());
        assert!(PipelineConfig::default().with_queue_capacity(0).validate().is_err());
        let inverted = RetryConfig {
            base: Duration::from_secs(10),
            cap: Duration::from_secs(1),
            jitter: true,
        };
        assert!(PipelineConfig::default().with_retry(inverted).validate().is_err());
    }

    #[test]
    fn test_pipeline_config_yaml() {
        let yaml = "max_attempts: 4\n\
                    retry: { base: 2s }\n\
                    breaker: { failure_threshold: 2, cap: 1m }\n";
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.retry.base, Duration::from_secs(2));
        assert_eq!(config.retry.cap, Duration::from_secs(30));
        assert_eq!(config.breaker.failure_threshold, 2);
        assert_eq!(config.breaker.cap, Duration::from_secs(60));
        assert_eq!(config.breaker.base, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_build_rejects_duplicate_and_missing_sinks() {
        assert!(DeliveryPipeline::builder(config()).build().is_err());

        let encoder: Arc<dyn Encoder> = Arc::new(LineProtocolEncoder);
        let result = DeliveryPipeline::builder(config())
            .sink(RecordingSink::new("a"), Arc::clone(&encoder))
            .sink(RecordingSink::new("a"), encoder)
            .build();
        assert!(result.unwrap_err().to_string().contains("duplicate sink"));
    }

    #[tokio::test]
    async fn test_fan_out_and_drain_on_shutdown() {
        let first = RecordingSink::new("first");
        let second = RecordingSink::new("second");
        let pipeline = DeliveryPipeline::builder(config())
            .sink(first.clone(), Arc::new(LineProtocolEncoder))
            .sink(second.clone(), Arc::new(LineProtocolEncoder))
            .build()
            .unwrap();
        let handle = pipeline.handle();

        assert_eq!(handle.submit(batch(0.5)), 2);
        assert_eq!(handle.submit(Batch::new()), 0);
        assert_eq!(handle.submit(batch(0.6)), 2);

        let snapshot = pipeline.shutdown().await;
        assert_eq!(snapshot.delivered(), 4);
        assert_eq!(snapshot.drops(), 0);

        let payloads = first.payloads.lock();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0], b"cpu value=0.5 1000000000\n".to_vec());
        assert_eq!(second.payloads.lock().len(), 2);

        // Submissions after shutdown are counted, not queued.
        assert_eq!(handle.submit(batch(0.7)), 0);
        let after = handle.snapshot();
        assert_eq!(after.sink("first").unwrap().dropped_shutdown, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_exhausted() {
        let sink = RecordingSink::new("flaky");
        *sink.failing.lock() = true;
        let pipeline = DeliveryPipeline::builder(config())
            .sink(sink.clone(), Arc::new(LineProtocolEncoder))
            .build()
            .unwrap();

        pipeline.handle().submit(batch(0.1));
        tokio::time::sleep(Duration::from_secs(1)).await;

        let snapshot = pipeline.shutdown().await;
        let flaky = snapshot.sink("flaky").unwrap();
        assert_eq!(sink.payloads.lock().len(), 3);
        assert_eq!(flaky.dropped_exhausted, 1);
        assert_eq!(flaky.accounted(), flaky.enqueued);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_drops_stuck_tasks() {
        struct StuckSink;

        #[async_trait::async_trait]
        impl Sink for StuckSink {
            fn name(&self) -> &str {
                "stuck"
            }

            fn kind(&self) -> SinkKind {
                SinkKind::Tcp
            }

            async fn send(&self, _payload: &[u8]) -> Result<(), SinkError> {
                std::future::pending().await
            }
        }

        let pipeline = DeliveryPipeline::builder(
            config()
                .with_send_timeout(Duration::from_secs(60))
                .with_shutdown_grace(Duration::from_secs(1)),
        )
        .sink(Arc::new(StuckSink), Arc::new(LineProtocolEncoder))
        .build()
        .unwrap();
        let handle = pipeline.handle();
        handle.submit(batch(1.0));
        handle.submit(batch(2.0));
        tokio::task::yield_now().await;

        let snapshot = pipeline.shutdown().await;
        let stuck = snapshot.sink("stuck").unwrap();
        assert_eq!(stuck.dropped_shutdown, 2);
        assert_eq!(stuck.delivered, 0);
        assert_eq!(stuck.queue_depth, 0);
    }
}
