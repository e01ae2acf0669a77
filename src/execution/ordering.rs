use dashmap::DashMap;
use http::Uri;
use rand::seq::SliceRandom;

use crate::model::{ReplicaResult, Request, RequestParameters, ResponseVerdict};

/// Per-replica numeric state kept across calls (health, weights), keyed by a name.
#[derive(Debug, Default)]
pub struct ReplicaStorage {
    values: DashMap<(String, Uri), f64>,
}

impl ReplicaStorage {
    pub fn get(&self, key: &str, replica: &Uri) -> Option<f64> {
        self.values
            .get(&(key.to_string(), replica.clone()))
            .map(|value| *value)
    }

    /// Applies `update` to the stored value (or `initial`) and returns the new value.
    pub fn update(
        &self,
        key: &str,
        replica: &Uri,
        initial: f64,
        update: impl FnOnce(f64) -> f64,
    ) -> f64 {
        let mut entry = self
            .values
            .entry((key.to_string(), replica.clone()))
            .or_insert(initial);
        *entry = update(*entry);
        *entry
    }

    pub fn clear(&self) {
        self.values.clear();
    }
}

/// Decides in which order replicas are tried.
pub trait ReplicaOrdering: Send + Sync + 'static {
    fn order(
        &self,
        replicas: Vec<Uri>,
        storage: &ReplicaStorage,
        request: &Request,
        parameters: &RequestParameters,
    ) -> Vec<Uri>;

    /// Observes every replica result of every call.
    fn learn(&self, _result: &ReplicaResult, _storage: &ReplicaStorage) {}
}

/// Keeps the cluster provider's order.
#[derive(Clone, Copy, Debug, Default)]
pub struct AsIsReplicaOrdering;

impl ReplicaOrdering for AsIsReplicaOrdering {
    fn order(
        &self,
        replicas: Vec<Uri>,
        _storage: &ReplicaStorage,
        _request: &Request,
        _parameters: &RequestParameters,
    ) -> Vec<Uri> {
        replicas
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RandomReplicaOrdering;

impl ReplicaOrdering for RandomReplicaOrdering {
    fn order(
        &self,
        mut replicas: Vec<Uri>,
        _storage: &ReplicaStorage,
        _request: &Request,
        _parameters: &RequestParameters,
    ) -> Vec<Uri> {
        replicas.shuffle(&mut rand::rng());
        replicas
    }
}

const HEALTH_KEY: &str = "health";

/// Prefers healthy replicas. Health is multiplicative: accepts raise it towards 1,
/// rejects lower it towards `minimum_health`. Replicas with equal health are shuffled.
#[derive(Clone, Copy, Debug)]
pub struct HealthReplicaOrdering {
    up_multiplier: f64,
    down_multiplier: f64,
    minimum_health: f64,
}

impl Default for HealthReplicaOrdering {
    fn default() -> Self {
        Self {
            up_multiplier: 1.5,
            down_multiplier: 0.5,
            minimum_health: 0.01,
        }
    }
}

impl HealthReplicaOrdering {
    pub fn new(up_multiplier: f64, down_multiplier: f64, minimum_health: f64) -> Self {
        Self {
            up_multiplier: up_multiplier.max(1.0),
            down_multiplier: down_multiplier.clamp(0.0, 1.0),
            minimum_health: minimum_health.clamp(f64::MIN_POSITIVE, 1.0),
        }
    }

    pub fn health(&self, replica: &Uri, storage: &ReplicaStorage) -> f64 {
        storage.get(HEALTH_KEY, replica).unwrap_or(1.0)
    }
}

impl ReplicaOrdering for HealthReplicaOrdering {
    fn order(
        &self,
        mut replicas: Vec<Uri>,
        storage: &ReplicaStorage,
        _request: &Request,
        _parameters: &RequestParameters,
    ) -> Vec<Uri> {
        replicas.shuffle(&mut rand::rng());
        replicas.sort_by(|left, right| {
            self.health(right, storage)
                .total_cmp(&self.health(left, storage))
        });
        replicas
    }

    fn learn(&self, result: &ReplicaResult, storage: &ReplicaStorage) {
        let multiplier = match result.verdict() {
            ResponseVerdict::Accept => self.up_multiplier,
            ResponseVerdict::Reject => self.down_multiplier,
            ResponseVerdict::DontKnow => return,
        };
        let minimum = self.minimum_health;
        storage.update(HEALTH_KEY, result.replica(), 1.0, |health| {
            (health * multiplier).clamp(minimum, 1.0)
        });
    }
}
