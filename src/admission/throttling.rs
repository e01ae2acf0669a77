use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bon::Builder;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::counter::{SlidingWindowCounter, WindowTotals};
use crate::error::ConfigurationError;
use crate::internal_event::{RequestThrottled, emit};
use crate::model::{ClusterResult, RequestContext, RequestPriority};
use crate::modules::{ModuleResult, Next, RequestModule};

/// Settings of client-side adaptive throttling for one target service.
///
/// | Parameter | Default | Description |
/// |-----------|---------|-------------|
/// | `storage_key` | `"default"` | Registry key; calls with the same key share statistics |
/// | `minutes_to_track` | 2 | Width of the sliding window |
/// | `minimum_requests` | 30 | Requests in the window before throttling may start |
/// | `critical_ratio` | 2.0 | `requests / accepts` at which rejection starts |
/// | `max_reject_probability` | 0.8 | Cap on the rejection probability |
///
/// # Example
///
/// ```rust
/// use cluster_dispatch::AdaptiveThrottlingOptions;
///
/// let options = AdaptiveThrottlingOptions::builder()
///     .storage_key("billing")
///     .critical_ratio(1.5)
///     .build();
/// assert_eq!(options.minimum_requests(), 30);
/// ```
#[derive(Clone, Debug, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveThrottlingOptions {
    #[builder(into, default = default_storage_key())]
    storage_key: String,

    #[builder(default = default_minutes_to_track())]
    minutes_to_track: usize,

    #[builder(default = default_minimum_requests())]
    minimum_requests: u64,

    /// Values closer to 1 throttle more aggressively.
    #[builder(default = default_critical_ratio())]
    critical_ratio: f64,

    #[builder(default = default_max_reject_probability())]
    max_reject_probability: f64,
}

fn default_storage_key() -> String {
    "default".to_string()
}

const fn default_minutes_to_track() -> usize {
    2
}

const fn default_minimum_requests() -> u64 {
    30
}

const fn default_critical_ratio() -> f64 {
    2.0
}

const fn default_max_reject_probability() -> f64 {
    0.8
}

impl Default for AdaptiveThrottlingOptions {
    fn default() -> Self {
        Self {
            storage_key: default_storage_key(),
            minutes_to_track: default_minutes_to_track(),
            minimum_requests: default_minimum_requests(),
            critical_ratio: default_critical_ratio(),
            max_reject_probability: default_max_reject_probability(),
        }
    }
}

impl AdaptiveThrottlingOptions {
    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    pub fn minutes_to_track(&self) -> usize {
        self.minutes_to_track
    }

    pub fn minimum_requests(&self) -> u64 {
        self.minimum_requests
    }

    pub fn critical_ratio(&self) -> f64 {
        self.critical_ratio
    }

    pub fn max_reject_probability(&self) -> f64 {
        self.max_reject_probability
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.minutes_to_track == 0 {
            return Err(invalid("minutes_to_track", "must be at least 1"));
        }
        if self.critical_ratio.is_nan() || self.critical_ratio <= 1.0 {
            return Err(invalid("critical_ratio", "must be greater than 1"));
        }
        if !(0.0..=1.0).contains(&self.max_reject_probability) {
            return Err(invalid("max_reject_probability", "must be within [0, 1]"));
        }
        Ok(())
    }
}

fn invalid(option: &'static str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidOption {
        option,
        reason: reason.to_string(),
    }
}

/// A read-only view of one priority's throttling state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThrottlingMetrics {
    /// Requests in the window, excluding calls still in flight.
    pub requests: u64,
    pub accepts: u64,
    pub pending: u64,
    pub ratio: f64,
    pub reject_probability: f64,
}

impl ThrottlingMetrics {
    fn compute(totals: WindowTotals, other_pending: u64, options: &AdaptiveThrottlingOptions) -> Self {
        let requests = totals.requests.saturating_sub(other_pending);
        let accepts = totals.outcomes;
        let ratio = requests as f64 / accepts.max(1) as f64;
        let reject_probability = ((requests as f64 - options.critical_ratio * accepts as f64)
            / (requests as f64 + 1.0))
            .clamp(0.0, options.max_reject_probability);
        Self {
            requests,
            accepts,
            pending: other_pending,
            ratio,
            reject_probability,
        }
    }
}

struct ThrottlingState {
    counters: [SlidingWindowCounter; 3],
    pending: [AtomicU64; 3],
}

impl ThrottlingState {
    fn new(minutes: usize) -> Self {
        Self {
            counters: std::array::from_fn(|_| SlidingWindowCounter::new(minutes)),
            pending: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

/// Per-storage-key throttling state, shared by every client of the process that is
/// handed the same registry.
#[derive(Default)]
pub struct AdaptiveThrottlingRegistry {
    states: DashMap<String, Arc<ThrottlingState>>,
}

impl AdaptiveThrottlingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, options: &AdaptiveThrottlingOptions) -> Arc<ThrottlingState> {
        self.states
            .entry(options.storage_key.clone())
            .or_insert_with(|| Arc::new(ThrottlingState::new(options.minutes_to_track)))
            .clone()
    }

    /// Current statistics of `priority` under the options' storage key.
    pub fn metrics(
        &self,
        options: &AdaptiveThrottlingOptions,
        priority: RequestPriority,
    ) -> ThrottlingMetrics {
        let state = self.state(options);
        let index = priority.index();
        ThrottlingMetrics::compute(
            state.counters[index].totals(),
            state.pending[index].load(Ordering::Acquire),
            options,
        )
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Forgets every storage key.
    pub fn clear(&self) {
        self.states.clear();
    }
}

impl std::fmt::Debug for AdaptiveThrottlingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveThrottlingRegistry")
            .field("storage_keys", &self.states.len())
            .finish()
    }
}

struct PendingGuard<'a>(&'a AtomicU64);

impl<'a> PendingGuard<'a> {
    /// Returns the guard and the number of other calls already in flight.
    fn enter(pending: &'a AtomicU64) -> (Self, u64) {
        let others = pending.fetch_add(1, Ordering::AcqRel);
        (Self(pending), others)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Rejects calls locally with probability growing with `requests / accepts`, so an
/// overloaded service is not hammered further.
pub struct AdaptiveThrottlingModule {
    options: AdaptiveThrottlingOptions,
    registry: Arc<AdaptiveThrottlingRegistry>,
}

impl AdaptiveThrottlingModule {
    pub fn new(
        options: AdaptiveThrottlingOptions,
        registry: Arc<AdaptiveThrottlingRegistry>,
    ) -> Result<Self, ConfigurationError> {
        options.validate()?;
        Ok(Self { options, registry })
    }

    pub fn options(&self) -> &AdaptiveThrottlingOptions {
        &self.options
    }
}

impl RequestModule for AdaptiveThrottlingModule {
    fn name(&self) -> &str {
        "AdaptiveThrottling"
    }

    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, ModuleResult> {
        async move {
            let priority = context
                .parameters()
                .priority()
                .unwrap_or(RequestPriority::Sheddable);
            let state = self.registry.state(&self.options);
            let counter = &state.counters[priority.index()];
            let (_pending, other_pending) = PendingGuard::enter(&state.pending[priority.index()]);

            counter.add(1, 0);
            let metrics = ThrottlingMetrics::compute(counter.totals(), other_pending, &self.options);
            if metrics.requests >= self.options.minimum_requests
                && metrics.ratio >= self.options.critical_ratio
                && rand::random::<f64>() < metrics.reject_probability
            {
                emit(RequestThrottled {
                    storage_key: &self.options.storage_key,
                    priority,
                    probability: metrics.reject_probability,
                });
                return Ok(ClusterResult::throttled(context.request().clone()));
            }

            match next.run(context).await {
                Ok(result) => {
                    if result.replica_results().iter().any(|r| r.is_accepted()) {
                        counter.add(0, 1);
                    }
                    Ok(result)
                }
                Err(error) if error.is_cancellation() && context.is_canceled() => {
                    counter.add(0, 1);
                    Err(error)
                }
                Err(error) => Err(error),
            }
        }
        .boxed()
    }
}
