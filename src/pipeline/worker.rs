//! Delivery worker: one per sink, drains its lane in FIFO order.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::PipelineError;
use super::backoff::Backoff;
use super::breaker::{Admission, CircuitBreaker};
use super::queue::BoundedQueue;
use super::stats::SinkStats;
use super::task::DeliveryTask;
use crate::encoder::Encoder;
use crate::sink::{Sink, SinkError};

/// Retry policy shared by all workers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_attempts: u32,
    pub send_timeout: Duration,
    pub backoff: Backoff,
}

pub(crate) struct SinkWorker {
    pub sink: Arc<dyn Sink>,
    pub encoder: Arc<dyn Encoder>,
    pub queue: Arc<BoundedQueue<DeliveryTask>>,
    pub stats: Arc<SinkStats>,
    pub breaker: CircuitBreaker,
    pub retry: RetryPolicy,
    pub cancel: CancellationToken,
}

enum Step {
    Next(DeliveryTask),
    Finished(u64, Result<(), PipelineError>),
    Cancelled(Option<u64>),
    Closed,
}

impl SinkWorker {
    pub async fn run(mut self) {
        let cancel = self.cancel.clone();
        let queue = Arc::clone(&self.queue);

        tracing::debug!(
            sink = %self.sink.name(),
            kind = %self.sink.kind(),
            "Delivery worker started"
        );

        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled(None),
                task = queue.pop() => task.map_or(Step::Closed, Step::Next),
            };
            let mut task = match step {
                Step::Next(task) => task,
                _ => break,
            };

            let id = task.id;
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled(Some(id)),
                result = self.deliver(&mut task) => Step::Finished(id, result),
            };

            match step {
                Step::Finished(id, result) => self.record(id, result),
                Step::Cancelled(Some(id)) => {
                    SinkStats::incr(&self.stats.dropped_shutdown);
                    tracing::warn!(
                        sink = %self.sink.name(),
                        task_id = id,
                        error = %PipelineError::ShuttingDown,
                        "Dropping in-flight task"
                    );
                    break;
                }
                _ => break,
            }
        }

        tracing::debug!(sink = %self.sink.name(), "Delivery worker stopped");
    }

    /// Attempt one task until it is delivered or reaches a terminal failure.
    async fn deliver(&mut self, task: &mut DeliveryTask) -> Result<(), PipelineError> {
        let sink_name = self.sink.name().to_string();

        match self.breaker.admit(Instant::now()) {
            Admission::Allowed => {}
            Admission::Probe => {
                tracing::info!(
                    sink = %sink_name,
                    task_id = task.id,
                    "Circuit half-open, sending probe"
                );
            }
            Admission::Rejected => return Err(PipelineError::CircuitOpen { sink: sink_name }),
        }

        let payload = self.encoder.encode(&task.batch);
        if payload.is_empty() {
            tracing::debug!(sink = %sink_name, task_id = task.id, "Nothing to send");
            self.breaker.record_success();
            return Ok(());
        }

        loop {
            task.attempt_count += 1;
            let send_timeout = self.retry.send_timeout;
            let result = match tokio::time::timeout(send_timeout, self.sink.send(&payload)).await {
                Ok(result) => result,
                Err(_) => Err(SinkError::Timeout(send_timeout)),
            };

            let error = match result {
                Ok(()) => {
                    if self.breaker.record_success() {
                        tracing::info!(sink = %sink_name, "Circuit closed");
                    }
                    return Ok(());
                }
                Err(e) => e,
            };

            tracing::warn!(
                sink = %sink_name,
                task_id = task.id,
                attempt = task.attempt_count,
                error = %error,
                "Send failed"
            );

            if self.breaker.record_failure(Instant::now()) {
                tracing::warn!(sink = %sink_name, state = ?self.breaker.state(), "Circuit opened");
                return Err(PipelineError::CircuitOpen { sink: sink_name });
            }
            if task.attempt_count >= self.retry.max_attempts {
                return Err(PipelineError::AttemptsExhausted {
                    sink: sink_name,
                    attempts: task.attempt_count,
                    last_error: error,
                });
            }

            tokio::time::sleep(self.retry.backoff.delay(task.attempt_count - 1)).await;
        }
    }

    fn record(&self, task_id: u64, result: Result<(), PipelineError>) {
        self.stats
            .circuit_open
            .store(!self.breaker.is_closed(), Ordering::Relaxed);

        match result {
            Ok(()) => {
                SinkStats::incr(&self.stats.delivered);
                tracing::debug!(sink = %self.sink.name(), task_id, "Delivered");
            }
            Err(e @ PipelineError::CircuitOpen { .. }) => {
                SinkStats::incr(&self.stats.dropped_circuit_open);
                tracing::debug!(task_id, error = %e, "Task dropped");
            }
            Err(e @ PipelineError::AttemptsExhausted { .. }) => {
                SinkStats::incr(&self.stats.dropped_exhausted);
                tracing::warn!(task_id, error = %e, "Task dropped");
            }
            Err(e) => {
                SinkStats::incr(&self.stats.dropped_shutdown);
                tracing::warn!(task_id, error = %e, "Task dropped");
            }
        }
    }
}
