// src/circuit.rs
// Per-agent-type circuit breaker. One exhausted retry sequence counts as one
// failure; after `failure_threshold` consecutive failures the circuit opens
// and AI-backed calls are skipped entirely for the cool-down window. After
// the window the circuit half-opens and admits a single trial call.
//
//   Closed --[threshold failures]--> Open
//   Open --[cool-down elapsed]--> HalfOpen
//   HalfOpen --[success]--> Closed
//   HalfOpen --[failure]--> Open (window reset)

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Trial slot taken while half-open; only one probe flies at a time.
    trial_in_flight: bool,
    blocked_count: u64,
}

pub struct CircuitBreaker {
    name: &'static str,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
                blocked_count: 0,
            }),
        }
    }

    /// Whether the AI-backed path may be attempted now. Consumes the
    /// half-open trial slot when it grants one.
    pub fn allow_request(&self) -> bool {
        let mut g = self.inner.lock().expect("circuit mutex poisoned");
        self.tick(&mut g);

        match g.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                g.blocked_count += 1;
                false
            }
            CircuitState::HalfOpen => {
                if g.trial_in_flight {
                    g.blocked_count += 1;
                    false
                } else {
                    g.trial_in_flight = true;
                    tracing::debug!(circuit = self.name, "half-open trial call allowed");
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut g = self.inner.lock().expect("circuit mutex poisoned");
        if g.state == CircuitState::HalfOpen {
            tracing::info!(circuit = self.name, "circuit closed, backend recovered");
        }
        g.state = CircuitState::Closed;
        g.consecutive_failures = 0;
        g.opened_at = None;
        g.trial_in_flight = false;
    }

    /// One exhausted retry sequence.
    pub fn record_failure(&self) {
        let mut g = self.inner.lock().expect("circuit mutex poisoned");
        match g.state {
            CircuitState::Closed => {
                g.consecutive_failures += 1;
                if g.consecutive_failures >= self.failure_threshold {
                    self.open(&mut g);
                }
            }
            CircuitState::HalfOpen => {
                // Failed trial re-opens with a fresh window.
                self.open(&mut g);
            }
            CircuitState::Open => {}
        }
    }

    /// Permanent error (bad credential, malformed request): open immediately.
    pub fn trip(&self) {
        let mut g = self.inner.lock().expect("circuit mutex poisoned");
        self.open(&mut g);
    }

    pub fn state(&self) -> CircuitState {
        let mut g = self.inner.lock().expect("circuit mutex poisoned");
        self.tick(&mut g);
        g.state
    }

    pub fn stats(&self) -> CircuitStats {
        let mut g = self.inner.lock().expect("circuit mutex poisoned");
        self.tick(&mut g);
        CircuitStats {
            state: g.state,
            consecutive_failures: g.consecutive_failures,
            blocked_count: g.blocked_count,
        }
    }

    fn open(&self, g: &mut CircuitInner) {
        g.state = CircuitState::Open;
        g.opened_at = Some(Instant::now());
        g.trial_in_flight = false;
        g.consecutive_failures = 0;
        metrics::counter!("circuit_opened_total", "agent" => self.name).increment(1);
        tracing::warn!(
            circuit = self.name,
            cooldown_secs = self.cooldown.as_secs(),
            "circuit opened, skipping AI-backed calls"
        );
    }

    /// Open -> HalfOpen once the cool-down elapses.
    fn tick(&self, g: &mut CircuitInner) {
        if g.state == CircuitState::Open {
            if let Some(opened) = g.opened_at {
                if opened.elapsed() >= self.cooldown {
                    g.state = CircuitState::HalfOpen;
                    g.trial_in_flight = false;
                    tracing::info!(circuit = self.name, "circuit half-open, probing backend");
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub blocked_count: u64,
}
