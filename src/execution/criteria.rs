use std::sync::Arc;

use crate::model::{Response, ResponseCode, ResponseVerdict};

/// One rule of the response classifier.
pub trait ResponseCriterion: Send + Sync + 'static {
    fn decide(&self, response: &Response) -> ResponseVerdict;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysAcceptCriterion;

impl ResponseCriterion for AlwaysAcceptCriterion {
    fn decide(&self, _response: &Response) -> ResponseVerdict {
        ResponseVerdict::Accept
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysRejectCriterion;

impl ResponseCriterion for AlwaysRejectCriterion {
    fn decide(&self, _response: &Response) -> ResponseVerdict {
        ResponseVerdict::Reject
    }
}

/// Connect, send and receive failures plus request timeouts.
#[derive(Clone, Copy, Debug, Default)]
pub struct RejectNetworkErrorsCriterion;

impl ResponseCriterion for RejectNetworkErrorsCriterion {
    fn decide(&self, response: &Response) -> ResponseVerdict {
        reject_if(response.code().is_network_error())
    }
}

/// Every 5xx except `501 Not Implemented`, which no other replica will answer differently.
#[derive(Clone, Copy, Debug, Default)]
pub struct RejectServerErrorsCriterion;

impl ResponseCriterion for RejectServerErrorsCriterion {
    fn decide(&self, response: &Response) -> ResponseVerdict {
        let code = response.code();
        reject_if(code.is_server_error() && code != ResponseCode::NOT_IMPLEMENTED)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RejectThrottlingErrorsCriterion;

impl ResponseCriterion for RejectThrottlingErrorsCriterion {
    fn decide(&self, response: &Response) -> ResponseVerdict {
        reject_if(response.code() == ResponseCode::TOO_MANY_REQUESTS)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RejectUnknownErrorsCriterion;

impl ResponseCriterion for RejectUnknownErrorsCriterion {
    fn decide(&self, response: &Response) -> ResponseVerdict {
        reject_if(response.code().is_unknown())
    }
}

/// Body reuse and body input failures.
#[derive(Clone, Copy, Debug, Default)]
pub struct RejectStreamingErrorsCriterion;

impl ResponseCriterion for RejectStreamingErrorsCriterion {
    fn decide(&self, response: &Response) -> ResponseVerdict {
        reject_if(response.code().is_stream_error())
    }
}

fn reject_if(condition: bool) -> ResponseVerdict {
    if condition {
        ResponseVerdict::Reject
    } else {
        ResponseVerdict::DontKnow
    }
}

/// Ordered criteria; the first conclusive verdict wins.
///
/// A response no criterion could decide on is rejected.
#[derive(Clone)]
pub struct ResponseClassifier {
    criteria: Vec<Arc<dyn ResponseCriterion>>,
}

impl ResponseClassifier {
    pub fn new(criteria: Vec<Arc<dyn ResponseCriterion>>) -> Self {
        Self { criteria }
    }

    pub fn classify(&self, response: &Response) -> ResponseVerdict {
        self.criteria
            .iter()
            .map(|criterion| criterion.decide(response))
            .find(|verdict| *verdict != ResponseVerdict::DontKnow)
            .unwrap_or(ResponseVerdict::Reject)
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }
}

impl Default for ResponseClassifier {
    /// Rejects network, server, throttling, unknown and streaming failures; accepts the rest.
    fn default() -> Self {
        Self::new(vec![
            Arc::new(RejectNetworkErrorsCriterion),
            Arc::new(RejectServerErrorsCriterion),
            Arc::new(RejectThrottlingErrorsCriterion),
            Arc::new(RejectUnknownErrorsCriterion),
            Arc::new(RejectStreamingErrorsCriterion),
            Arc::new(AlwaysAcceptCriterion),
        ])
    }
}

impl std::fmt::Debug for ResponseClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseClassifier")
            .field("criteria", &self.criteria.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(code: u16) -> ResponseVerdict {
        ResponseClassifier::default().classify(&Response::new(ResponseCode::new(code)))
    }

    #[test]
    fn default_classification() {
        assert_eq!(verdict(200), ResponseVerdict::Accept);
        assert_eq!(verdict(404), ResponseVerdict::Accept);
        assert_eq!(verdict(501), ResponseVerdict::Accept);
        assert_eq!(verdict(503), ResponseVerdict::Reject);
        assert_eq!(verdict(429), ResponseVerdict::Reject);
        assert_eq!(verdict(408), ResponseVerdict::Reject);
        assert_eq!(verdict(10), ResponseVerdict::Reject);
        assert_eq!(verdict(13), ResponseVerdict::Reject);
        assert_eq!(verdict(0), ResponseVerdict::Reject);
    }

    #[test]
    fn inconclusive_criteria_reject() {
        let classifier = ResponseClassifier::new(vec![Arc::new(RejectServerErrorsCriterion)]);
        assert_eq!(
            classifier.classify(&Response::new(ResponseCode::OK)),
            ResponseVerdict::Reject
        );
        assert_eq!(
            ResponseClassifier::new(Vec::new()).classify(&Response::new(ResponseCode::OK)),
            ResponseVerdict::Reject
        );
    }
}
