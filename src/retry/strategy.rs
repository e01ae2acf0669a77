use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::ClusterResult;

/// How many attempts a call gets and how long to wait between them.
pub trait RetryStrategy: Send + Sync + 'static {
    /// Total attempts including the first one.
    fn attempts_count(&self) -> usize;

    /// Delay before the next attempt, `attempts_used` being the attempts made so far.
    fn next_delay(&self, attempts_used: usize, last_result: &ClusterResult) -> Duration;
}

/// The jitter mode to use for retry backoff behavior.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JitterMode {
    /// No jitter.
    None,

    /// Full jitter.
    ///
    /// The random delay is anywhere from 0 up to the delay calculated by the backoff.
    #[default]
    Full,
}

impl JitterMode {
    pub fn apply(self, delay: Duration) -> Duration {
        match self {
            JitterMode::None => delay,
            JitterMode::Full => delay.mul_f64(rand::random::<f64>()),
        }
    }
}

/// A single attempt.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRetryStrategy;

impl RetryStrategy for NoRetryStrategy {
    fn attempts_count(&self) -> usize {
        1
    }

    fn next_delay(&self, _: usize, _: &ClusterResult) -> Duration {
        Duration::ZERO
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ImmediateRetryStrategy {
    attempts: usize,
}

impl ImmediateRetryStrategy {
    pub const fn new(attempts: usize) -> Self {
        Self { attempts }
    }
}

impl RetryStrategy for ImmediateRetryStrategy {
    fn attempts_count(&self) -> usize {
        self.attempts
    }

    fn next_delay(&self, _: usize, _: &ClusterResult) -> Duration {
        Duration::ZERO
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ConstantDelayRetryStrategy {
    attempts: usize,
    delay: Duration,
}

impl ConstantDelayRetryStrategy {
    pub const fn new(attempts: usize, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

impl RetryStrategy for ConstantDelayRetryStrategy {
    fn attempts_count(&self) -> usize {
        self.attempts
    }

    fn next_delay(&self, _: usize, _: &ClusterResult) -> Duration {
        self.delay
    }
}

/// `initial + increment * (attempts_used - 1)`, capped at `max_delay`, then jittered.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LinearBackoffRetryStrategy {
    attempts: usize,
    initial: Duration,
    increment: Duration,
    max_delay: Duration,
    jitter: JitterMode,
}

impl LinearBackoffRetryStrategy {
    pub const fn new(attempts: usize, initial: Duration, increment: Duration) -> Self {
        Self {
            attempts,
            initial,
            increment,
            max_delay: Duration::MAX,
            jitter: JitterMode::None,
        }
    }

    pub const fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub const fn jitter(mut self, jitter: JitterMode) -> Self {
        self.jitter = jitter;
        self
    }
}

impl RetryStrategy for LinearBackoffRetryStrategy {
    fn attempts_count(&self) -> usize {
        self.attempts
    }

    fn next_delay(&self, attempts_used: usize, _: &ClusterResult) -> Duration {
        let steps = u32::try_from(attempts_used.saturating_sub(1)).unwrap_or(u32::MAX);
        let delay = self
            .increment
            .checked_mul(steps)
            .and_then(|grown| grown.checked_add(self.initial))
            .unwrap_or(Duration::MAX)
            .min(self.max_delay);
        self.jitter.apply(delay)
    }
}

/// A retry strategy driven by exponential back-off.
///
/// The delay before attempt `n + 1` is `initial * factor^(n - 1)`, capped at `max_delay`
/// and then jittered.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ExponentialBackoffRetryStrategy {
    attempts: usize,
    initial: Duration,
    factor: f64,
    max_delay: Duration,
    jitter: JitterMode,
}

impl ExponentialBackoffRetryStrategy {
    /// Doubles a delay starting at `initial`, with full jitter.
    pub const fn new(attempts: usize, initial: Duration) -> Self {
        Self {
            attempts,
            initial,
            factor: 2.0,
            max_delay: Duration::MAX,
            jitter: JitterMode::Full,
        }
    }

    /// A multiplicative factor applied to the delay after every attempt.
    pub fn factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Apply a maximum delay. No retry delay will be longer than this `Duration`.
    pub const fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub const fn jitter(mut self, jitter: JitterMode) -> Self {
        self.jitter = jitter;
        self
    }

    fn backoff(&self, attempts_used: usize) -> Duration {
        let exponent = i32::try_from(attempts_used.saturating_sub(1)).unwrap_or(i32::MAX);
        let seconds = self.initial.as_secs_f64() * self.factor.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(seconds)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }
}

impl RetryStrategy for ExponentialBackoffRetryStrategy {
    fn attempts_count(&self) -> usize {
        self.attempts
    }

    fn next_delay(&self, attempts_used: usize, _: &ClusterResult) -> Duration {
        self.jitter.apply(self.backoff(attempts_used))
    }
}
