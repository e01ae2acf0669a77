use std::collections::HashSet;

use crate::model::{ReplicaResult, Request, RequestParameters, ResponseCode};

/// Decides whether an attempt that exhausted every replica deserves another one.
pub trait RetryPolicy: Send + Sync + 'static {
    fn need_to_retry(
        &self,
        request: &Request,
        parameters: &RequestParameters,
        results: &[ReplicaResult],
    ) -> bool;
}

impl<F> RetryPolicy for F
where
    F: Fn(&Request, &RequestParameters, &[ReplicaResult]) -> bool + Send + Sync + 'static,
{
    fn need_to_retry(
        &self,
        request: &Request,
        parameters: &RequestParameters,
        results: &[ReplicaResult],
    ) -> bool {
        self(request, parameters, results)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NeverRetryPolicy;

impl RetryPolicy for NeverRetryPolicy {
    fn need_to_retry(&self, _: &Request, _: &RequestParameters, _: &[ReplicaResult]) -> bool {
        false
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysRetryPolicy;

impl RetryPolicy for AlwaysRetryPolicy {
    fn need_to_retry(&self, _: &Request, _: &RequestParameters, _: &[ReplicaResult]) -> bool {
        true
    }
}

/// Retries when any replica answered with one of the configured codes.
#[derive(Clone, Debug)]
pub struct RetryOnStatusCodesPolicy {
    codes: HashSet<ResponseCode>,
}

impl RetryOnStatusCodesPolicy {
    pub fn new(codes: impl IntoIterator<Item = ResponseCode>) -> Self {
        Self {
            codes: codes.into_iter().collect(),
        }
    }
}

impl Default for RetryOnStatusCodesPolicy {
    /// Overload and throttling answers.
    fn default() -> Self {
        Self::new([
            ResponseCode::SERVICE_UNAVAILABLE,
            ResponseCode::TOO_MANY_REQUESTS,
        ])
    }
}

impl RetryPolicy for RetryOnStatusCodesPolicy {
    fn need_to_retry(
        &self,
        _request: &Request,
        _parameters: &RequestParameters,
        results: &[ReplicaResult],
    ) -> bool {
        results
            .iter()
            .any(|result| self.codes.contains(&result.response().code()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::model::{Response, ResponseVerdict};

    fn results(codes: &[ResponseCode]) -> Vec<ReplicaResult> {
        codes
            .iter()
            .map(|code| {
                ReplicaResult::new(
                    "http://replica".parse().unwrap(),
                    Arc::new(Response::new(*code)),
                    ResponseVerdict::Reject,
                    Duration::ZERO,
                )
            })
            .collect()
    }

    #[test]
    fn status_code_policy_matches_any_replica() {
        let policy = RetryOnStatusCodesPolicy::default();
        let request = Request::get("/".parse().unwrap());
        let parameters = RequestParameters::default();

        let overloaded = results(&[ResponseCode::BAD_GATEWAY, ResponseCode::SERVICE_UNAVAILABLE]);
        let broken = results(&[ResponseCode::BAD_GATEWAY, ResponseCode::INTERNAL_SERVER_ERROR]);
        assert!(policy.need_to_retry(&request, &parameters, &overloaded));
        assert!(!policy.need_to_retry(&request, &parameters, &broken));
        assert!(!policy.need_to_retry(&request, &parameters, &[]));
    }

    #[test]
    fn closures_are_policies() {
        let policy = |request: &Request, _: &RequestParameters, _: &[ReplicaResult]| {
            request.method() == http::Method::GET
        };
        let parameters = RequestParameters::default();
        assert!(policy.need_to_retry(&Request::get("/".parse().unwrap()), &parameters, &[]));
        assert!(!policy.need_to_retry(&Request::post("/".parse().unwrap()), &parameters, &[]));
    }
}
