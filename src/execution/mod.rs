//! Request execution: cluster resolution, replica ordering, send strategies, response
//! classification and result selection.

mod cluster;
mod criteria;
mod module;
mod ordering;
mod selectors;
mod sender;
mod strategy;

pub use cluster::{ClusterProvider, FixedClusterProvider};
pub use criteria::{
    AlwaysAcceptCriterion, AlwaysRejectCriterion, RejectNetworkErrorsCriterion,
    RejectServerErrorsCriterion, RejectStreamingErrorsCriterion, RejectThrottlingErrorsCriterion,
    RejectUnknownErrorsCriterion, ResponseClassifier, ResponseCriterion,
};
pub use module::{AbsoluteUrlSenderModule, ExecutionSettings, RequestExecutionModule};
pub use ordering::{
    AsIsReplicaOrdering, HealthReplicaOrdering, RandomReplicaOrdering, ReplicaOrdering,
    ReplicaStorage,
};
pub use selectors::{
    ClusterResultStatusSelector, LastAcceptedResponseSelector, ResponseSelector,
    ResultStatusSelector,
};
pub use sender::RequestSender;
pub use strategy::{
    ForkingRequestStrategy, ParallelRequestStrategy, RequestStrategy, SequentialRequestStrategy,
};
