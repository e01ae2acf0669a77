//! Cluster-aware HTTP request dispatcher.
//!
//! A [`ClusterClient`] sends one logical request to a service backed by many replica
//! endpoints. Every call flows through an ordered pipeline of [`RequestModule`]s:
//! error catching, validation, retries, adaptive throttling, replica budgeting and
//! finally the execution orchestrator which resolves the cluster, orders replicas and
//! hands them to a pluggable send strategy.
//!
//! # Algorithm Overview
//!
//! 1. **Adaptive throttling**: per priority class, tracks requests against accepted
//!    responses over a sliding window of minutes and probabilistically rejects new
//!    requests once `requests / accepts` crosses a critical ratio.
//! 2. **Replica budgeting**: tracks how many replica attempts calls consume and limits
//!    fan-out to a single replica once the historical ratio gets too high.
//! 3. **Retries**: repeats calls that exhausted every replica while the time budget,
//!    the retry policy and the request body allow it.
//!
//! # Failure model
//!
//! [`ClusterClient::send`] never fails. Every expected failure (throttling, timeouts,
//! validation, replica exhaustion, cancellation, unexpected errors) is encoded in
//! [`ClusterResultStatus`].
//!
//! # Basic Usage
//! ```no_run
//! use std::sync::Arc;
//! use cluster_dispatch::{
//!     ClusterClient, ClusterClientConfiguration, FixedClusterProvider, Request, TowerTransport,
//! };
//!
//! # async fn run() -> Result<(), cluster_dispatch::ConfigurationError> {
//! let configuration = ClusterClientConfiguration::builder()
//!     .transport(Arc::new(TowerTransport::reqwest()))
//!     .cluster_provider(Arc::new(FixedClusterProvider::parse([
//!         "http://replica-1:8080",
//!         "http://replica-2:8080",
//!     ])?))
//!     .build();
//! let client = ClusterClient::new(configuration)?;
//!
//! let result = client.send(Request::get("/health".parse().unwrap())).await;
//! println!("{:?} {}", result.status(), result.response().code());
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod client;
pub mod error;
pub mod execution;
pub mod internal_event;
pub mod model;
pub mod modules;
pub mod retry;
pub mod transport;

#[cfg(test)]
mod test_utils;

#[macro_use]
extern crate tracing;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

pub use admission::{
    AdaptiveThrottlingModule, AdaptiveThrottlingOptions, AdaptiveThrottlingRegistry,
    ReplicaBudgetingModule, ReplicaBudgetingOptions, ReplicaBudgetingRegistry,
    SlidingWindowCounter,
};
pub use client::{ClusterClient, ClusterClientConfiguration};
pub use error::{ClusterError, ConfigurationError};
pub use execution::{
    ClusterProvider, FixedClusterProvider, ForkingRequestStrategy, ParallelRequestStrategy,
    ReplicaOrdering, RequestStrategy, SequentialRequestStrategy,
};
pub use model::{
    ClusterResult, ClusterResultStatus, Content, ReplicaResult, Request, RequestContext,
    RequestParameters, RequestPriority, Response, ResponseCode, ResponseVerdict, TimeBudget,
};
pub use modules::{BuiltInModule, ModuleRelation, Next, RequestModule, RequestPipeline};
pub use retry::{RetryModule, RetryPolicy, RetryStrategy};
pub use transport::{TowerTransport, Transport, TransportCapabilities};
