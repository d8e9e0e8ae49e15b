//! Per-node circuit breaker
//!
//! Transition table:
//! - closed -> open: consecutive failures reach `failure_threshold`
//! - open -> half_open: `cooldown` elapsed since entering open
//! - half_open -> closed: first success
//! - half_open -> open: any failure
//!
//! Breaker transitions are expected steady-state behavior and are logged,
//! never reported as errors.

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Breaker tuning parameters
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u32,
    /// Time spent open before a recovery trial is allowed
    pub cooldown: Duration,
    /// Concurrent trial requests admitted while half-open
    pub half_open_max_requests: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_millis(10_000),
            half_open_max_requests: 1,
        }
    }
}

/// The state machine itself. Callers serialize access per node; the
/// registry holds one breaker per node behind its entry lock.
#[derive(Debug, Clone)]
pub struct Breaker {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    config: BreakerConfig,
}

impl Breaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            config,
        }
    }

    /// Current state after applying any due open -> half_open promotion.
    pub fn effective_state(&mut self) -> BreakerState {
        if self.state == BreakerState::Open {
            if let Some(opened_at) = self.opened_at {
                if opened_at.elapsed() >= self.config.cooldown {
                    debug!("breaker cooldown elapsed, entering half-open");
                    self.state = BreakerState::HalfOpen;
                    self.opened_at = None;
                }
            }
        }
        self.state
    }

    /// Raw state without promotion (for snapshots)
    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn half_open_max_requests(&self) -> u32 {
        self.config.half_open_max_requests
    }

    /// Record a successful request
    pub fn on_success(&mut self) {
        self.consecutive_failures = 0;
        match self.effective_state() {
            BreakerState::HalfOpen => {
                info!("breaker closed after successful trial");
                self.state = BreakerState::Closed;
            }
            BreakerState::Open => {
                // Success reported for a request admitted before the
                // breaker opened; the cooldown still governs recovery.
            }
            BreakerState::Closed => {}
        }
    }

    /// Record a failed request (error or timeout)
    pub fn on_failure(&mut self) {
        self.consecutive_failures += 1;
        match self.effective_state() {
            BreakerState::Closed => {
                if self.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        failures = self.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "breaker opened"
                    );
                    self.state = BreakerState::Open;
                    self.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                warn!("trial failed, breaker re-opened");
                self.state = BreakerState::Open;
                self.opened_at = Some(Instant::now());
            }
            BreakerState::Open => {}
        }
    }
}
