use std::sync::Arc;

use crate::model::{
    ClusterResultStatus, ReplicaResult, Request, RequestParameters, Response, TimeBudget,
};

/// Picks the final response out of the replica results of one attempt.
pub trait ResponseSelector: Send + Sync + 'static {
    fn select(
        &self,
        request: &Request,
        parameters: &RequestParameters,
        results: &[ReplicaResult],
    ) -> Option<Arc<Response>>;
}

/// The last accepted response, or failing that the last response that came from a
/// replica rather than from a failed exchange.
#[derive(Clone, Copy, Debug, Default)]
pub struct LastAcceptedResponseSelector;

impl ResponseSelector for LastAcceptedResponseSelector {
    fn select(
        &self,
        _request: &Request,
        _parameters: &RequestParameters,
        results: &[ReplicaResult],
    ) -> Option<Arc<Response>> {
        let accepted = results.iter().rev().find(|result| result.is_accepted());
        let answered = || {
            results.iter().rev().find(|result| {
                let code = result.response().code();
                !(code.is_unknown() || code.is_network_error() || code.is_stream_error())
            })
        };
        accepted
            .or_else(answered)
            .map(|result| result.response().clone())
    }
}

/// Derives the call status from the replica results of one attempt.
pub trait ResultStatusSelector: Send + Sync + 'static {
    fn select(&self, results: &[ReplicaResult], budget: &TimeBudget) -> ClusterResultStatus;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ClusterResultStatusSelector;

impl ResultStatusSelector for ClusterResultStatusSelector {
    fn select(&self, results: &[ReplicaResult], budget: &TimeBudget) -> ClusterResultStatus {
        if results.iter().any(ReplicaResult::is_accepted) {
            ClusterResultStatus::Success
        } else if budget.has_expired() {
            ClusterResultStatus::TimeExpired
        } else {
            ClusterResultStatus::ReplicasExhausted
        }
    }
}
