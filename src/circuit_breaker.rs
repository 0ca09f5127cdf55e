// =============================================================================
// circuit_breaker.rs — STOP ASKING A BACKEND THAT IS NOT ANSWERING
// =============================================================================
//
// Guards the daemon's periodic refetch. After N consecutive failures the
// breaker opens and refetches are skipped for a cooldown. Once the cooldown
// passes, probes are let through (half-open); enough successes close it again
// and a single failure sends it back to open.
//
// Transitions never go through here. A user action is always sent and its
// failure always reported; only background polling backs off.
// =============================================================================

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Breaker state. Each variant carries the bookkeeping it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed { consecutive_failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { successes: u32 },
}

/// The externally visible part of `State`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

impl State {
    fn public(self) -> CircuitState {
        match self {
            State::Closed { .. } => CircuitState::Closed,
            State::Open { .. } => CircuitState::Open,
            State::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

struct Inner {
    state: State,
    trips: u64,
}

pub struct CircuitBreaker {
    name: String,
    inner: Mutex<Inner>,
    failure_threshold: u32,
    reset_timeout: Duration,
    success_threshold: u32,
}

impl CircuitBreaker {
    /// Thresholds below one are raised to one.
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        reset_timeout: Duration,
        success_threshold: u32,
    ) -> Self {
        let name = name.into();
        info!(
            breaker = %name,
            failure_threshold,
            reset_timeout_secs = reset_timeout.as_secs(),
            success_threshold,
            "Circuit breaker ready"
        );
        Self {
            name,
            inner: Mutex::new(Inner {
                state: State::Closed {
                    consecutive_failures: 0,
                },
                trips: 0,
            }),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            success_threshold: success_threshold.max(1),
        }
    }

    /// May the next call go out? An open breaker whose cooldown has passed
    /// moves to half-open and says yes.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed { .. } | State::HalfOpen { .. } => true,
            State::Open { opened_at } => {
                let elapsed = opened_at.elapsed();
                if elapsed >= self.reset_timeout {
                    info!(breaker = %self.name, "Cooldown over, probing backend");
                    inner.state = State::HalfOpen { successes: 0 };
                    true
                } else {
                    let remaining = self.reset_timeout - elapsed;
                    warn!(
                        breaker = %self.name,
                        remaining_secs = remaining.as_secs(),
                        "Circuit open, skipping call"
                    );
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = match inner.state {
            State::Closed { .. } => State::Closed {
                consecutive_failures: 0,
            },
            State::HalfOpen { successes } if successes + 1 >= self.success_threshold => {
                info!(breaker = %self.name, "Backend healthy again, circuit closed");
                State::Closed {
                    consecutive_failures: 0,
                }
            }
            State::HalfOpen { successes } => State::HalfOpen {
                successes: successes + 1,
            },
            // A call that was let through before the trip came back fine.
            open @ State::Open { .. } => open,
        };
    }

    /// Returns `true` when this failure opened the circuit.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.failure_threshold {
                    warn!(breaker = %self.name, failures, "Circuit tripped open");
                    inner.state = State::Open {
                        opened_at: Instant::now(),
                    };
                    inner.trips += 1;
                    true
                } else {
                    warn!(
                        breaker = %self.name,
                        failures,
                        threshold = self.failure_threshold,
                        "Call failed"
                    );
                    inner.state = State::Closed {
                        consecutive_failures: failures,
                    };
                    false
                }
            }
            State::HalfOpen { .. } => {
                warn!(breaker = %self.name, "Probe failed, circuit open again");
                inner.state = State::Open {
                    opened_at: Instant::now(),
                };
                inner.trips += 1;
                true
            }
            State::Open { .. } => {
                // extend the cooldown
                inner.state = State::Open {
                    opened_at: Instant::now(),
                };
                false
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state.public()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock();
        let consecutive_failures = match inner.state {
            State::Closed {
                consecutive_failures,
            } => consecutive_failures,
            _ => 0,
        };
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: inner.state.public(),
            consecutive_failures,
            total_trips: inner.trips,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_trips: u64,
}
