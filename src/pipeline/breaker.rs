//! Per-sink circuit breaker.
//!
//! `Closed(failures) -> Open(until) -> HalfOpen -> Closed`. Owned and mutated
//! only by the sink's delivery worker, so no locking is involved.

use tokio::time::Instant;

use super::backoff::Backoff;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed { failures: u32 },
    Open { until: Instant },
    /// One probe task is in flight.
    HalfOpen,
}

/// Decision for the next task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Cooldown elapsed; this task is the single half-open probe.
    Probe,
    Rejected,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    backoff: Backoff,
    state: CircuitState,
    reopen_count: u32,
}

impl CircuitBreaker {
    /// `threshold` consecutive failures open the circuit; each reopen after a
    /// failed probe waits longer according to `backoff`.
    pub fn new(threshold: u32, backoff: Backoff) -> Self {
        Self {
            threshold: threshold.max(1),
            backoff,
            state: CircuitState::Closed { failures: 0 },
            reopen_count: 0,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, CircuitState::Closed { .. })
    }

    pub fn admit(&mut self, now: Instant) -> Admission {
        match self.state {
            CircuitState::Closed { .. } => Admission::Allowed,
            CircuitState::Open { until } if now >= until => {
                self.state = CircuitState::HalfOpen;
                Admission::Probe
            }
            CircuitState::Open { .. } | CircuitState::HalfOpen => Admission::Rejected,
        }
    }

    /// Returns `true` if this success closed a previously open circuit.
    pub fn record_success(&mut self) -> bool {
        let recovered = !self.is_closed();
        self.state = CircuitState::Closed { failures: 0 };
        self.reopen_count = 0;
        recovered
    }

    /// Returns `true` if this failure opened the circuit.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed { failures } => {
                let failures = failures.saturating_add(1);
                if failures >= self.threshold {
                    self.open(now);
                    true
                } else {
                    self.state = CircuitState::Closed { failures };
                    false
                }
            }
            CircuitState::HalfOpen => {
                self.reopen_count = self.reopen_count.saturating_add(1);
                self.open(now);
                true
            }
            CircuitState::Open { .. } => false,
        }
    }

    fn open(&mut self, now: Instant) {
        let cooldown = self.backoff.delay(self.reopen_count);
        self.state = CircuitState::Open {
            until: now + cooldown,
        };
    }
}
