//! Collector scheduler: one task per collector, feeding the delivery pipeline.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::collector::{CollectError, Collector, CollectorKind, Schedule, Tick};
use crate::config::ConfigError;
use crate::pipeline::PipelineHandle;
use crate::sample::{Batch, Tags, now_ns};

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default pause after a collector panic (30 seconds).
pub const DEFAULT_ERROR_DELAY: Duration = Duration::from_secs(30);

/// Slack on top of a collector's own timeout before the tick is abandoned.
const POLL_GRACE: Duration = Duration::from_secs(1);

/// Metadata about a scheduled collector.
#[derive(Debug, Clone)]
pub struct JobInfo {
    /// Collector name.
    pub name: String,
    pub kind: CollectorKind,
    /// Schedule description.
    pub schedule: String,
}

/// Runs collectors on their schedules.
pub struct Scheduler {
    pipeline: PipelineHandle,
    global_tags: Arc<Tags>,
    error_delay: Duration,
    jobs: Vec<JobInfo>,
    names: HashSet<String>,
    tasks: JoinSet<()>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Create a scheduler submitting to `pipeline`.
    pub fn new(pipeline: PipelineHandle) -> Self {
        Self {
            pipeline,
            global_tags: Arc::new(Tags::new()),
            error_delay: DEFAULT_ERROR_DELAY,
            jobs: Vec::new(),
            names: HashSet::new(),
            tasks: JoinSet::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Tags merged into every sample that does not carry them already.
    pub fn with_global_tags(mut self, tags: Tags) -> Self {
        self.global_tags = Arc::new(tags);
        self
    }

    /// Pause after a collector panic before its next tick.
    pub fn with_error_delay(mut self, delay: Duration) -> Self {
        self.error_delay = delay;
        self
    }

    /// Register a collector and start its task.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if a collector with the same
    /// name is already scheduled.
    pub fn spawn(&mut self, collector: Arc<dyn Collector>) -> Result<(), ConfigError> {
        let name = collector.name().to_string();
        if !self.names.insert(name.clone()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate collector name: '{name}'"
            )));
        }

        let info = JobInfo {
            name: name.clone(),
            kind: collector.kind(),
            schedule: collector.schedule().to_string(),
        };
        tracing::info!(
            collector = %name,
            kind = %info.kind,
            schedule = %info.schedule,
            "Collector registered"
        );
        self.jobs.push(info);

        let unit = Unit {
            collector,
            pipeline: self.pipeline.clone(),
            global_tags: Arc::clone(&self.global_tags),
            error_delay: self.error_delay,
            cancel: self.cancel.child_token(),
        };
        self.tasks.spawn(unit.run());
        Ok(())
    }

    /// List all scheduled collectors.
    pub fn jobs(&self) -> &[JobInfo] {
        &self.jobs
    }

    /// Get the number of scheduled collectors.
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Gracefully shutdown with default timeout.
    pub async fn shutdown(self) {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await;
    }

    /// Stop every collector task, aborting those that do not stop in time.
    pub async fn shutdown_with_timeout(mut self, timeout: Duration) {
        let job_count = self.jobs.len();
        self.cancel.cancel();

        let drained = tokio::time::timeout(timeout, async {
            while let Some(result) = self.tasks.join_next().await {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Collector task failed");
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(job_count, "Collector scheduler shutdown timed out");
            self.tasks.shutdown().await;
        } else {
            tracing::info!(job_count, "Collector scheduler shutdown complete");
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("job_count", &self.jobs.len())
            .field("error_delay", &self.error_delay)
            .finish_non_exhaustive()
    }
}

/// Keeps a collector's tick timestamps non-decreasing across wall-clock steps.
#[derive(Debug, Default)]
struct TickClock {
    last: i64,
}

impl TickClock {
    fn read(&mut self, now: i64) -> i64 {
        self.last = self.last.max(now);
        self.last
    }
}

enum TickOutcome {
    Done,
    /// The collector panicked; wait before the next tick.
    Backoff,
    Cancelled,
}

/// The task driving one collector.
struct Unit {
    collector: Arc<dyn Collector>,
    pipeline: PipelineHandle,
    global_tags: Arc<Tags>,
    error_delay: Duration,
    cancel: CancellationToken,
}

impl Unit {
    async fn run(self) {
        let schedule = self.collector.schedule();
        let mut clock = TickClock::default();
        let mut sequence = 0u64;
        let start = Instant::now();
        let mut next = match schedule {
            Schedule::Interval(_) => start,
            Schedule::Cron(_) => schedule.next_fire(start, start),
        };

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep_until(next) => {}
            }

            let scheduled = next;
            let tick = Tick::new(sequence, clock.read(now_ns()));
            sequence += 1;

            next = match self.tick(tick).await {
                TickOutcome::Done => schedule.next_fire(scheduled, Instant::now()),
                TickOutcome::Backoff => Instant::now() + self.error_delay,
                TickOutcome::Cancelled => break,
            };
        }

        tracing::debug!(collector = %self.collector.name(), ticks = sequence, "Collector stopped");
    }

    async fn tick(&self, tick: Tick) -> TickOutcome {
        let name = self.collector.name();
        let limit = self.collector.timeout() + POLL_GRACE;
        let started = Instant::now();

        // Polling in a separate task turns a panic into a JoinError.
        let collector = Arc::clone(&self.collector);
        let mut handle = tokio::spawn(async move { collector.poll(&tick).await });

        let joined = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            joined = tokio::time::timeout(limit, &mut handle) => Some(joined),
        };
        let Some(joined) = joined else {
            handle.abort();
            return TickOutcome::Cancelled;
        };

        let result = match joined {
            Ok(Ok(result)) => result,
            Ok(Err(e)) if e.is_panic() => {
                tracing::error!(
                    collector = %name,
                    retry_in = ?self.error_delay,
                    "Collector panicked"
                );
                self.pipeline.record_collect_error();
                return TickOutcome::Backoff;
            }
            Ok(Err(e)) => {
                tracing::error!(collector = %name, error = %e, "Collector task failed");
                self.pipeline.record_collect_error();
                return TickOutcome::Done;
            }
            Err(_) => {
                handle.abort();
                Err(CollectError::timeout(format!(
                    "poll exceeded {}ms",
                    limit.as_millis()
                )))
            }
        };

        let batch = match result {
            Ok(batch) => {
                tracing::debug!(
                    collector = %name,
                    tick = tick.sequence(),
                    samples = batch.len(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Collection succeeded"
                );
                batch
            }
            Err(e) => {
                tracing::error!(
                    collector = %name,
                    tick = tick.sequence(),
                    kind = %e.kind,
                    error = %e.detail,
                    partial = e.partial.len(),
                    "Collection failed"
                );
                self.pipeline.record_collect_error();
                e.partial
            }
        };

        self.submit(batch);
        TickOutcome::Done
    }

    fn submit(&self, batch: Batch) {
        if batch.is_empty() {
            return;
        }
        let batch: Batch = batch
            .into_iter()
            .map(|sample| sample.with_default_tags(&self.global_tags))
            .collect();
        self.pipeline.submit(batch);
    }
}
