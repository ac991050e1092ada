//! Consecutive-failure circuit breaker guarding `NetworkBackend`. `spec.md`
//! §4.2: after `M` consecutive failures the breaker opens and rejects calls
//! for a cooldown window, then allows a single probe (half-open) before
//! deciding whether to close or reopen.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to trip from `Closed` to `Open`.
    pub failure_threshold: u32,
    /// How long the breaker stays `Open` before allowing a half-open probe.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Tracks only a consecutive-failure count, not a failure-rate window:
/// `spec.md` trips on "M consecutive failures", so a single interleaved
/// success resets the counter rather than diluting a rate.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    consecutive_failures: AtomicU32,
    state: std::sync::RwLock<CircuitState>,
    opened_at_millis: AtomicU64,
    epoch: Instant,
    half_open_probe_in_flight: std::sync::atomic::AtomicBool,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            consecutive_failures: AtomicU32::new(0),
            state: std::sync::RwLock::new(CircuitState::Closed),
            opened_at_millis: AtomicU64::new(0),
            epoch: Instant::now(),
            half_open_probe_in_flight: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.read().unwrap()
    }

    /// Whether a new call should be let through. `Open` calls that have
    /// outlasted the cooldown transition to `HalfOpen` and admit exactly one
    /// probing call.
    pub fn allow_request(&self) -> bool {
        let current = *self.state.read().unwrap();
        match current {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                !self.half_open_probe_in_flight.swap(true, Ordering::SeqCst)
            }
            CircuitState::Open => {
                let elapsed_millis = self.epoch.elapsed().as_millis() as u64
                    - self.opened_at_millis.load(Ordering::SeqCst);
                if elapsed_millis >= self.config.cooldown.as_millis() as u64 {
                    let mut state = self.state.write().unwrap();
                    if *state == CircuitState::Open {
                        *state = CircuitState::HalfOpen;
                    }
                    drop(state);
                    !self.half_open_probe_in_flight.swap(true, Ordering::SeqCst)
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.half_open_probe_in_flight.store(false, Ordering::SeqCst);
        *self.state.write().unwrap() = CircuitState::Closed;
    }

    pub fn record_failure(&self) {
        self.half_open_probe_in_flight.store(false, Ordering::SeqCst);
        let current = *self.state.read().unwrap();
        if current == CircuitState::HalfOpen {
            self.trip();
            return;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.config.failure_threshold {
            self.trip();
        }
    }

    fn trip(&self) {
        self.opened_at_millis
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::SeqCst);
        *self.state.write().unwrap() = CircuitState::Open;
    }

    pub fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.half_open_probe_in_flight.store(false, Ordering::SeqCst);
        *self.state.write().unwrap() = CircuitState::Closed;
    }
}
