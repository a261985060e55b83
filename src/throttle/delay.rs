//! Adaptive per-request delay
//!
//! The estimator keeps a rolling window of recent request outcomes and moves a
//! single shared delay up or down depending on the observed success and block
//! rates. Workers call [`DelayEstimator::wait`] before every page request and
//! [`DelayEstimator::record_request`] after it.

use crate::config::RateLimitConfig;
use crate::state::lock_unpoisoned;
use rand::Rng;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Outcomes needed in the window before any adjustment is considered
const MIN_SAMPLES: usize = 10;

/// Number of most recent outcomes the rates are computed over
const RATE_SAMPLE: usize = 50;

/// Blocked rate below which speeding up is allowed
const LOW_BLOCK_RATE: f64 = 0.05;

/// Blocked rate above which the estimator slows down
const HIGH_BLOCK_RATE: f64 = 0.10;

/// Multiplicative adjustment state applied on top of the base delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateMode {
    Normal,
    Aggressive,
    Conservative,
}

impl RateMode {
    /// Factor applied to the jittered delay in [`DelayEstimator::wait`]
    pub fn wait_factor(&self) -> f64 {
        match self {
            Self::Normal => 1.0,
            Self::Aggressive => 0.5,
            Self::Conservative => 2.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Aggressive => "aggressive",
            Self::Conservative => "conservative",
        }
    }
}

impl fmt::Display for RateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning for a [`DelayEstimator`]
#[derive(Debug, Clone)]
pub struct DelaySettings {
    pub initial_delay: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub success_threshold: f64,
    pub failure_threshold: f64,
    pub window_size: usize,
    pub adjustment_cooldown: Duration,
}

impl Default for DelaySettings {
    fn default() -> Self {
        Self::from(&RateLimitConfig::default())
    }
}

impl From<&RateLimitConfig> for DelaySettings {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            initial_delay: config.initial_delay(),
            min_delay: config.min_delay(),
            max_delay: config.max_delay(),
            success_threshold: config.success_threshold,
            failure_threshold: config.failure_threshold,
            window_size: config.window_size,
            adjustment_cooldown: config.adjustment_cooldown(),
        }
    }
}

/// One entry of the rolling window
#[derive(Debug, Clone, Copy)]
pub struct RequestOutcome {
    pub success: bool,
    pub blocked: bool,
    pub timestamp: Instant,
}

#[derive(Debug, Default, Clone, Copy)]
struct RequestTotals {
    requests: u64,
    successes: u64,
    blocked: u64,
}

#[derive(Debug)]
struct EstimatorState {
    window: VecDeque<RequestOutcome>,
    current_delay: Duration,
    mode: RateMode,
    last_adjustment: Instant,
    totals: RequestTotals,
}

/// Point-in-time view of the estimator
#[derive(Debug, Clone, Serialize)]
pub struct DelayStats {
    pub total: u64,
    pub successful: u64,
    pub blocked: u64,
    pub success_rate: f64,
    pub blocked_rate: f64,
    pub current_delay: Duration,
    pub mode: RateMode,
    pub requests_per_minute: f64,
    pub elapsed: Duration,
}

/// Adaptive delay shared by all workers of one run
#[derive(Debug)]
pub struct DelayEstimator {
    settings: DelaySettings,
    state: Mutex<EstimatorState>,
    started_at: Instant,
}

impl DelayEstimator {
    /// Creates an estimator starting at `settings.initial_delay` in normal mode
    pub fn new(settings: DelaySettings) -> Self {
        let now = Instant::now();
        let capacity = settings.window_size.max(MIN_SAMPLES);
        let current_delay = clamp(settings.initial_delay, settings.min_delay, settings.max_delay);

        Self {
            state: Mutex::new(EstimatorState {
                window: VecDeque::with_capacity(capacity),
                current_delay,
                mode: RateMode::Normal,
                last_adjustment: now,
                totals: RequestTotals::default(),
            }),
            settings,
            started_at: now,
        }
    }

    /// Computes the delay to apply before the next request
    ///
    /// The base delay is jittered by a uniform factor in `[0.8, 1.2]`, scaled
    /// by the current mode and floored at the minimum delay. The lock is held
    /// only while reading the base delay and mode.
    pub fn next_delay(&self) -> Duration {
        let (base, mode) = {
            let state = lock_unpoisoned(&self.state);
            (state.current_delay, state.mode)
        };

        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        let delay = base.mul_f64(jitter * mode.wait_factor());
        delay.max(self.settings.min_delay)
    }

    /// Sleeps for [`next_delay`](Self::next_delay) and returns the slept duration
    ///
    /// Concurrent callers sleep independently of each other.
    pub async fn wait(&self) -> Duration {
        let delay = self.next_delay();
        tracing::trace!(delay_ms = delay.as_millis() as u64, "Rate limiter wait");
        tokio::time::sleep(delay).await;
        delay
    }

    /// Records the outcome of one request and re-evaluates the delay
    pub fn record_request(&self, success: bool, blocked: bool) {
        let now = Instant::now();
        let mut state = lock_unpoisoned(&self.state);

        state.totals.requests += 1;
        if success {
            state.totals.successes += 1;
        }
        if blocked {
            state.totals.blocked += 1;
        }

        if state.window.len() >= self.settings.window_size.max(MIN_SAMPLES) {
            state.window.pop_front();
        }
        state.window.push_back(RequestOutcome {
            success,
            blocked,
            timestamp: now,
        });

        self.adjust(&mut state, now);
    }

    fn adjust(&self, state: &mut EstimatorState, now: Instant) {
        if state.window.len() < MIN_SAMPLES {
            return;
        }
        if now.duration_since(state.last_adjustment) < self.settings.adjustment_cooldown {
            return;
        }

        let sample = state.window.len().min(RATE_SAMPLE);
        let recent = state.window.iter().skip(state.window.len() - sample);
        let (successes, blocked) = recent.fold((0usize, 0usize), |(s, b), outcome| {
            (s + outcome.success as usize, b + outcome.blocked as usize)
        });
        let success_rate = successes as f64 / sample as f64;
        let blocked_rate = blocked as f64 / sample as f64;

        tracing::info!(
            success_rate = format!("{:.1}%", success_rate * 100.0),
            blocked_rate = format!("{:.1}%", blocked_rate * 100.0),
            delay_ms = state.current_delay.as_millis() as u64,
            "Recent request performance"
        );

        let s = &self.settings;
        if success_rate >= s.success_threshold && blocked_rate < LOW_BLOCK_RATE {
            if state.mode != RateMode::Aggressive {
                state.mode = RateMode::Aggressive;
                state.current_delay = self.scaled(state.current_delay, 0.8);
                tracing::info!(
                    delay_ms = state.current_delay.as_millis() as u64,
                    "Switching to aggressive mode"
                );
            }
        } else if success_rate < s.failure_threshold || blocked_rate > HIGH_BLOCK_RATE {
            if state.mode != RateMode::Conservative {
                state.mode = RateMode::Conservative;
                state.current_delay = self.scaled(state.current_delay, 1.5);
                tracing::info!(
                    delay_ms = state.current_delay.as_millis() as u64,
                    "Switching to conservative mode"
                );
            }
        } else if state.mode == RateMode::Aggressive && success_rate < s.success_threshold {
            state.mode = RateMode::Normal;
            state.current_delay = self.scaled(state.current_delay, 1.2);
            tracing::info!(
                delay_ms = state.current_delay.as_millis() as u64,
                "Exiting aggressive mode"
            );
        } else if state.mode == RateMode::Conservative && success_rate > s.success_threshold {
            state.mode = RateMode::Normal;
            state.current_delay = self.scaled(state.current_delay, 0.9);
            tracing::info!(
                delay_ms = state.current_delay.as_millis() as u64,
                "Exiting conservative mode"
            );
        }

        state.last_adjustment = now;
    }

    fn scaled(&self, delay: Duration, factor: f64) -> Duration {
        clamp(
            delay.mul_f64(factor),
            self.settings.min_delay,
            self.settings.max_delay,
        )
    }

    /// Current base delay (before jitter and mode factor)
    pub fn current_delay(&self) -> Duration {
        lock_unpoisoned(&self.state).current_delay
    }

    pub fn mode(&self) -> RateMode {
        lock_unpoisoned(&self.state).mode
    }

    /// Returns a snapshot of lifetime counters and the current delay
    pub fn get_stats(&self) -> DelayStats {
        let state = lock_unpoisoned(&self.state);
        let elapsed = self.started_at.elapsed();
        let totals = state.totals;

        let rate = |count: u64| {
            if totals.requests > 0 {
                count as f64 / totals.requests as f64
            } else {
                0.0
            }
        };

        let minutes = elapsed.as_secs_f64() / 60.0;
        let requests_per_minute = if minutes > 0.0 {
            totals.requests as f64 / minutes
        } else {
            0.0
        };

        DelayStats {
            total: totals.requests,
            successful: totals.successes,
            blocked: totals.blocked,
            success_rate: rate(totals.successes),
            blocked_rate: rate(totals.blocked),
            current_delay: state.current_delay,
            mode: state.mode,
            requests_per_minute,
            elapsed,
        }
    }
}

fn clamp(delay: Duration, min: Duration, max: Duration) -> Duration {
    delay.max(min).min(max)
}
