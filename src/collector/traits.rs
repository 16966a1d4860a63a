//! Core collector traits and types.

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;
use tokio::time::Instant;

use crate::config::ConfigError;
use crate::sample::Batch;

/// Minimum allowed interval (1 second).
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Collector variant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CollectorKind {
    Host,
    Service,
    Container,
    Gpu,
    SelfReport,
}

/// Why a collection failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum CollectErrorKind {
    /// The probe or external command did not finish within the timeout.
    Timeout,
    /// The target or the external tool is not available.
    Unavailable,
    /// The external tool produced output that could not be fully parsed.
    ParseFailure,
}

/// Error returned by [`Collector::poll`].
///
/// Carries a best-effort `partial` batch (parsed samples, sentinel metrics)
/// which the scheduler still delivers.
#[derive(Debug, Error)]
#[error("{kind}: {detail}")]
pub struct CollectError {
    pub kind: CollectErrorKind,
    pub detail: String,
    pub partial: Batch,
}

impl CollectError {
    pub fn new(kind: CollectErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            partial: Batch::new(),
        }
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(CollectErrorKind::Timeout, detail)
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::new(CollectErrorKind::Unavailable, detail)
    }

    pub fn parse_failure(detail: impl Into<String>) -> Self {
        Self::new(CollectErrorKind::ParseFailure, detail)
    }

    /// Attach the samples that could still be collected.
    #[must_use]
    pub fn with_partial(mut self, partial: Batch) -> Self {
        self.partial = partial;
        self
    }
}

/// Schedule for collector execution.
///
/// Supports both fixed interval and cron-based scheduling.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Fixed interval between collections.
    ///
    /// Interval is clamped to a minimum of 1 second.
    Interval(Duration),

    /// Cron expression for scheduled execution.
    ///
    /// Uses standard cron syntax: `sec min hour day month weekday` (6-field).
    /// Example: `"0 */5 * * * *"` = every 5 minutes at second 0
    Cron(cron::Schedule),
}

impl Schedule {
    /// Create an interval schedule.
    ///
    /// Interval is clamped to a minimum of 1 second.
    pub fn interval(duration: Duration) -> Self {
        if duration < MIN_INTERVAL {
            tracing::warn!(min_interval = ?MIN_INTERVAL,
                "Interval duration is less than minimum allowed. Using minimum duration."
            );
            Self::Interval(MIN_INTERVAL)
        } else {
            Self::Interval(duration)
        }
    }

    /// Create a cron schedule with immediate validation.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if the cron expression is invalid.
    pub fn cron(expr: impl AsRef<str>) -> Result<Self, ConfigError> {
        cron::Schedule::from_str(expr.as_ref())
            .map(Self::Cron)
            .map_err(|e| ConfigError::ValidationError(format!("invalid cron expression: {e}")))
    }

    /// Resolve a schedule from the `interval` / `cron` pair found in collector configs.
    pub fn from_parts(
        interval: Option<Duration>,
        cron: Option<&str>,
        default_interval: Duration,
    ) -> Result<Self, ConfigError> {
        match (interval, cron) {
            (Some(_), Some(_)) => Err(ConfigError::ValidationError(
                "cannot specify both interval and cron".to_string(),
            )),
            (_, Some(expr)) => Self::cron(expr),
            (interval, None) => Ok(Self::interval(interval.unwrap_or(default_interval))),
        }
    }

    /// Instant of the next run after a run scheduled at `previous`.
    ///
    /// Interval runs that fell behind are not replayed: the next run is
    /// pushed to one interval after `now`.
    pub fn next_fire(&self, previous: Instant, now: Instant) -> Instant {
        match self {
            Self::Interval(period) => {
                let next = previous + *period;
                if next <= now { now + *period } else { next }
            }
            Self::Cron(schedule) => {
                let wall_now = Utc::now();
                let delay = schedule
                    .upcoming(Utc)
                    .next()
                    .and_then(|at| (at - wall_now).to_std().ok())
                    .unwrap_or(MIN_INTERVAL);
                now + delay
            }
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interval(d) => write!(f, "every {:?}", d),
            Self::Cron(expr) => write!(f, "cron: {}", expr),
        }
    }
}

/// One scheduled invocation of a collector.
///
/// The scheduler reads the clock once per tick; every sample produced for the
/// tick carries [`Tick::timestamp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    sequence: u64,
    timestamp: i64,
}

impl Tick {
    pub fn new(sequence: u64, timestamp: i64) -> Self {
        Self {
            sequence,
            timestamp,
        }
    }

    /// Zero-based tick counter of the owning collector.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Tick start in nanoseconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// Core collector trait for implementing data collectors.
///
/// # Error Handling Philosophy
///
/// - **Probe failures** that are themselves observations (an HTTP endpoint
///   answering with an unexpected status) are returned as `Ok` samples with a
///   degraded [`State`](crate::State).
/// - **Collection failures** (timeouts, missing tools, unparseable output)
///   are returned as [`CollectError`] with whatever partial batch could be
///   assembled, so sentinel metrics still reach the backend.
///
/// Implementations wrapping processes or network calls enforce
/// [`Collector::timeout`] themselves.
#[async_trait::async_trait]
pub trait Collector: Send + Sync + 'static {
    /// Unique identifier for this collector instance.
    fn name(&self) -> &str;

    /// Collector variant.
    fn kind(&self) -> CollectorKind;

    /// Execution schedule (interval or cron).
    fn schedule(&self) -> Schedule;

    /// Upper bound for one `poll`.
    fn timeout(&self) -> Duration;

    /// Perform one collection cycle.
    async fn poll(&self, tick: &Tick) -> Result<Batch, CollectError>;
}
