use std::fmt;
use std::sync::Arc;

use bon::Builder;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::budget::TimeBudget;
use super::parameters::RequestParameters;
use super::request::Request;
use super::result::ReplicaResult;
use crate::execution::{AsIsReplicaOrdering, ClusterProvider, ReplicaOrdering, ReplicaStorage};
use crate::transport::Transport;

/// Mutable state of one in-flight top-level call.
///
/// Modules receive it by `&mut` and may replace the request, the parameters or any of
/// the collaborators for the remainder of the call. The replica-results list is the only
/// field written concurrently (by fan-out strategies) and is guarded by a mutex.
#[derive(Builder)]
pub struct RequestContext {
    request: Request,
    #[builder(default)]
    parameters: RequestParameters,
    budget: TimeBudget,
    #[builder(default)]
    cancellation: CancellationToken,
    #[builder(into, default = Arc::from("cluster-client"))]
    client_name: Arc<str>,
    transport: Arc<dyn Transport>,
    cluster_provider: Arc<dyn ClusterProvider>,
    #[builder(default = Arc::new(AsIsReplicaOrdering) as Arc<dyn ReplicaOrdering>)]
    replica_ordering: Arc<dyn ReplicaOrdering>,
    #[builder(default)]
    replica_storage: Arc<ReplicaStorage>,
    #[builder(default = usize::MAX)]
    maximum_replicas_to_use: usize,
    #[builder(skip)]
    attempt: usize,
    #[builder(skip)]
    replica_results: Mutex<Vec<ReplicaResult>>,
}

impl RequestContext {
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn set_request(&mut self, request: Request) {
        self.request = request;
    }

    pub fn parameters(&self) -> &RequestParameters {
        &self.parameters
    }

    pub fn set_parameters(&mut self, parameters: RequestParameters) {
        self.parameters = parameters;
    }

    pub fn budget(&self) -> &TimeBudget {
        &self.budget
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_canceled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn set_transport(&mut self, transport: Arc<dyn Transport>) {
        self.transport = transport;
    }

    pub fn cluster_provider(&self) -> &Arc<dyn ClusterProvider> {
        &self.cluster_provider
    }

    pub fn set_cluster_provider(&mut self, cluster_provider: Arc<dyn ClusterProvider>) {
        self.cluster_provider = cluster_provider;
    }

    pub fn replica_ordering(&self) -> &Arc<dyn ReplicaOrdering> {
        &self.replica_ordering
    }

    pub fn set_replica_ordering(&mut self, replica_ordering: Arc<dyn ReplicaOrdering>) {
        self.replica_ordering = replica_ordering;
    }

    pub fn replica_storage(&self) -> &Arc<ReplicaStorage> {
        &self.replica_storage
    }

    pub fn maximum_replicas_to_use(&self) -> usize {
        self.maximum_replicas_to_use
    }

    pub fn set_maximum_replicas_to_use(&mut self, maximum: usize) {
        self.maximum_replicas_to_use = maximum;
    }

    /// 1-based number of the current retry attempt; 0 before the retry module ran.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn set_attempt(&mut self, attempt: usize) {
        self.attempt = attempt;
    }

    /// Records one replica attempt. Safe to call from concurrent sends of the same call.
    pub fn add_replica_result(&self, result: ReplicaResult) {
        self.replica_results.lock().push(result);
    }

    pub fn replica_results_snapshot(&self) -> Vec<ReplicaResult> {
        self.replica_results.lock().clone()
    }

    pub fn replica_results_count(&self) -> usize {
        self.replica_results.lock().len()
    }

    /// Swaps the accumulated list out, leaving a fresh empty one behind.
    pub fn freeze_replica_results(&self) -> Vec<ReplicaResult> {
        std::mem::take(&mut *self.replica_results.lock())
    }

    pub fn reset_replica_results(&self) {
        self.replica_results.lock().clear();
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request", &self.request)
            .field("parameters", &self.parameters)
            .field("budget", &self.budget)
            .field("client_name", &self.client_name)
            .field("maximum_replicas_to_use", &self.maximum_replicas_to_use)
            .field("attempt", &self.attempt)
            .field("replica_results", &self.replica_results_count())
            .finish_non_exhaustive()
    }
}
