use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::Uri;
use serde::{Deserialize, Serialize};

use super::request::Request;
use super::response::{Response, ResponseCode};

/// Classification of one replica's response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseVerdict {
    Accept,
    Reject,
    /// Inconclusive; the next criterion decides.
    DontKnow,
}

/// Outcome of one attempt against one replica.
#[derive(Clone, Debug)]
pub struct ReplicaResult {
    replica: Uri,
    response: Arc<Response>,
    verdict: ResponseVerdict,
    time: Duration,
}

impl ReplicaResult {
    pub fn new(
        replica: Uri,
        response: Arc<Response>,
        verdict: ResponseVerdict,
        time: Duration,
    ) -> Self {
        Self {
            replica,
            response,
            verdict,
            time,
        }
    }

    pub fn replica(&self) -> &Uri {
        &self.replica
    }

    pub fn response(&self) -> &Arc<Response> {
        &self.response
    }

    pub fn verdict(&self) -> ResponseVerdict {
        self.verdict
    }

    pub fn time(&self) -> Duration {
        self.time
    }

    pub fn is_accepted(&self) -> bool {
        self.verdict == ResponseVerdict::Accept
    }
}

/// Terminal outcome of a cluster call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterResultStatus {
    Success,
    TimeExpired,
    ReplicasNotFound,
    ReplicasExhausted,
    IncorrectArguments,
    UnexpectedException,
    Canceled,
    Throttled,
}

impl ClusterResultStatus {
    /// Response code used when no response was selected.
    pub const fn fallback_code(self) -> ResponseCode {
        match self {
            ClusterResultStatus::TimeExpired => ResponseCode::REQUEST_TIMEOUT,
            ClusterResultStatus::UnexpectedException => ResponseCode::UNKNOWN_FAILURE,
            ClusterResultStatus::Canceled => ResponseCode::CANCELED,
            ClusterResultStatus::Throttled => ResponseCode::TOO_MANY_REQUESTS,
            _ => ResponseCode::UNKNOWN,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ClusterResultStatus::Success => "success",
            ClusterResultStatus::TimeExpired => "time_expired",
            ClusterResultStatus::ReplicasNotFound => "replicas_not_found",
            ClusterResultStatus::ReplicasExhausted => "replicas_exhausted",
            ClusterResultStatus::IncorrectArguments => "incorrect_arguments",
            ClusterResultStatus::UnexpectedException => "unexpected_exception",
            ClusterResultStatus::Canceled => "canceled",
            ClusterResultStatus::Throttled => "throttled",
        }
    }
}

impl fmt::Display for ClusterResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The final, immutable result of a cluster call.
///
/// [`ClusterResult::response`] always yields a response: when none was selected, one is
/// synthesized from the status via [`ClusterResultStatus::fallback_code`].
#[derive(Clone, Debug)]
pub struct ClusterResult {
    status: ClusterResultStatus,
    replica_results: Vec<ReplicaResult>,
    selected: bool,
    response: Arc<Response>,
    request: Request,
}

impl ClusterResult {
    pub fn new(
        status: ClusterResultStatus,
        replica_results: Vec<ReplicaResult>,
        selected_response: Option<Arc<Response>>,
        request: Request,
    ) -> Self {
        let selected = selected_response.is_some();
        let response = selected_response
            .unwrap_or_else(|| Arc::new(Response::new(status.fallback_code())));
        Self {
            status,
            replica_results,
            selected,
            response,
            request,
        }
    }

    fn bare(status: ClusterResultStatus, request: Request) -> Self {
        Self::new(status, Vec::new(), None, request)
    }

    pub fn canceled(request: Request) -> Self {
        Self::bare(ClusterResultStatus::Canceled, request)
    }

    pub fn throttled(request: Request) -> Self {
        Self::bare(ClusterResultStatus::Throttled, request)
    }

    pub fn time_expired(request: Request) -> Self {
        Self::bare(ClusterResultStatus::TimeExpired, request)
    }

    pub fn unexpected_exception(request: Request) -> Self {
        Self::bare(ClusterResultStatus::UnexpectedException, request)
    }

    pub fn incorrect_arguments(request: Request) -> Self {
        Self::bare(ClusterResultStatus::IncorrectArguments, request)
    }

    pub fn replicas_not_found(request: Request) -> Self {
        Self::bare(ClusterResultStatus::ReplicasNotFound, request)
    }

    pub fn status(&self) -> ClusterResultStatus {
        self.status
    }

    pub fn replica_results(&self) -> &[ReplicaResult] {
        &self.replica_results
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> &Arc<Response> {
        &self.response
    }

    /// Whether the response was chosen explicitly rather than synthesized from the status.
    pub fn has_selected_response(&self) -> bool {
        self.selected
    }

    /// Replaces the final response, keeping everything else.
    pub fn with_response(mut self, response: Arc<Response>) -> Self {
        self.response = response;
        self.selected = true;
        self
    }

    /// The replica that produced the final response, when it can be told unambiguously.
    ///
    /// A reference match against exactly one replica result wins; otherwise a replica is
    /// returned only if it is the single one sharing the final response's code.
    pub fn replica(&self) -> Option<&Uri> {
        let mut same_instance = self
            .replica_results
            .iter()
            .filter(|result| Arc::ptr_eq(result.response(), &self.response));
        if let (Some(found), None) = (same_instance.next(), same_instance.next()) {
            return Some(found.replica());
        }

        let code = self.response.code();
        let mut same_code = self
            .replica_results
            .iter()
            .filter(|result| result.response().code() == code);
        match (same_code.next(), same_code.next()) {
            (Some(found), None) => Some(found.replica()),
            _ => None,
        }
    }

    /// Releases the final response's stream and every replica response's stream.
    /// Shared streams are released once; calling this again is a no-op.
    pub fn dispose(&self) {
        self.response.dispose();
        for result in &self.replica_results {
            result.response().dispose();
        }
    }
}
