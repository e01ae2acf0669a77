use std::sync::Arc;

use bon::Builder;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::counter::{SlidingWindowCounter, WindowTotals};
use crate::error::ConfigurationError;
use crate::internal_event::{ReplicaBudgetExceeded, emit};
use crate::model::RequestContext;
use crate::modules::{ModuleResult, Next, RequestModule};

/// Settings of replica budgeting.
///
/// | Parameter | Default | Description |
/// |-----------|---------|-------------|
/// | `storage_key` | `"default"` | Registry key; calls with the same key share statistics |
/// | `minutes_to_track` | 2 | Width of the sliding window |
/// | `minimum_requests` | 30 | Calls in the window before the limit may apply |
/// | `critical_ratio` | 1.2 | Replica attempts per call at which fan-out is limited |
#[derive(Clone, Debug, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaBudgetingOptions {
    #[builder(into, default = default_storage_key())]
    storage_key: String,

    #[builder(default = default_minutes_to_track())]
    minutes_to_track: usize,

    #[builder(default = default_minimum_requests())]
    minimum_requests: u64,

    #[builder(default = default_critical_ratio())]
    critical_ratio: f64,
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
    1.2
}

impl Default for ReplicaBudgetingOptions {
    fn default() -> Self {
        Self {
            storage_key: default_storage_key(),
            minutes_to_track: default_minutes_to_track(),
            minimum_requests: default_minimum_requests(),
            critical_ratio: default_critical_ratio(),
        }
    }
}

impl ReplicaBudgetingOptions {
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

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.minutes_to_track == 0 {
            return Err(ConfigurationError::InvalidOption {
                option: "minutes_to_track",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.critical_ratio.is_nan() || self.critical_ratio < 1.0 {
            return Err(ConfigurationError::InvalidOption {
                option: "critical_ratio",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Calls and replica attempts in the window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BudgetMetrics {
    pub requests: u64,
    pub replicas: u64,
    pub ratio: f64,
}

impl From<WindowTotals> for BudgetMetrics {
    fn from(totals: WindowTotals) -> Self {
        Self {
            requests: totals.requests,
            replicas: totals.outcomes,
            ratio: totals.outcomes as f64 / totals.requests.max(1) as f64,
        }
    }
}

/// Per-storage-key replica budgeting counters.
#[derive(Debug, Default)]
pub struct ReplicaBudgetingRegistry {
    counters: DashMap<String, Arc<SlidingWindowCounter>>,
}

impl ReplicaBudgetingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, options: &ReplicaBudgetingOptions) -> Arc<SlidingWindowCounter> {
        self.counters
            .entry(options.storage_key.clone())
            .or_insert_with(|| Arc::new(SlidingWindowCounter::new(options.minutes_to_track)))
            .clone()
    }

    pub fn metrics(&self, options: &ReplicaBudgetingOptions) -> BudgetMetrics {
        self.counter(options).totals().into()
    }

    pub fn clear(&self) {
        self.counters.clear();
    }
}

/// Limits a call to a single replica while calls have recently been using too many.
pub struct ReplicaBudgetingModule {
    options: ReplicaBudgetingOptions,
    registry: Arc<ReplicaBudgetingRegistry>,
}

impl ReplicaBudgetingModule {
    pub fn new(
        options: ReplicaBudgetingOptions,
        registry: Arc<ReplicaBudgetingRegistry>,
    ) -> Result<Self, ConfigurationError> {
        options.validate()?;
        Ok(Self { options, registry })
    }

    pub fn options(&self) -> &ReplicaBudgetingOptions {
        &self.options
    }
}

impl RequestModule for ReplicaBudgetingModule {
    fn name(&self) -> &str {
        "ReplicaBudgeting"
    }

    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, ModuleResult> {
        async move {
            let counter = self.registry.counter(&self.options);
            let metrics = BudgetMetrics::from(counter.totals());
            let limited = metrics.requests >= self.options.minimum_requests
                && metrics.ratio >= self.options.critical_ratio;

            let previous = context.maximum_replicas_to_use();
            if limited {
                emit(ReplicaBudgetExceeded {
                    storage_key: &self.options.storage_key,
                    ratio: metrics.ratio,
                });
                context.set_maximum_replicas_to_use(1);
            }

            let outcome = next.run(context).await;
            if limited {
                context.set_maximum_replicas_to_use(previous);
            }

            let used = match &outcome {
                Ok(result) => result.replica_results().len(),
                Err(_) => context.replica_results_count(),
            };
            counter.add(1, used as u64);
            outcome
        }
        .boxed()
    }
}
