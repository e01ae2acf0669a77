use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use http::Uri;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::criteria::ResponseClassifier;
use crate::error::ClusterError;
use crate::model::{ReplicaResult, Request, RequestContext, Response, ResponseCode};
use crate::transport::Transport;

/// Sends one request to one replica on behalf of a request strategy.
pub trait RequestSender: Send + Sync {
    /// Every completed attempt yields a classified [`ReplicaResult`]; only cancellation
    /// surfaces as an error.
    fn send_to_replica<'a>(
        &'a self,
        replica: &'a Uri,
        request: &'a Request,
        connection_timeout: Option<Duration>,
        timeout: Duration,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ReplicaResult, ClusterError>>;
}

/// The sender used by request execution. Records each result in the call's context and
/// lets the replica ordering learn from it.
pub(crate) struct ContextRequestSender<'c> {
    context: &'c RequestContext,
    classifier: &'c ResponseClassifier,
}

impl<'c> ContextRequestSender<'c> {
    pub(crate) fn new(context: &'c RequestContext, classifier: &'c ResponseClassifier) -> Self {
        Self {
            context,
            classifier,
        }
    }
}

impl RequestSender for ContextRequestSender<'_> {
    fn send_to_replica<'a>(
        &'a self,
        replica: &'a Uri,
        request: &'a Request,
        connection_timeout: Option<Duration>,
        timeout: Duration,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ReplicaResult, ClusterError>> {
        Box::pin(async move {
            let started = Instant::now();
            let response = match request.url_for_replica(replica) {
                Ok(url) => {
                    let replica_request = request.clone().with_url(url);
                    exchange(
                        self.context.transport().as_ref(),
                        &replica_request,
                        connection_timeout,
                        timeout,
                        cancellation,
                    )
                    .await?
                }
                Err(error) => {
                    warn!(message = "Failed to build replica url.", %replica, %error);
                    Response::new(ResponseCode::UNKNOWN_FAILURE)
                }
            };

            let verdict = self.classifier.classify(&response);
            let result = ReplicaResult::new(
                replica.clone(),
                Arc::new(response),
                verdict,
                started.elapsed(),
            );
            debug!(
                message = "Replica responded.",
                %replica,
                code = %result.response().code(),
                verdict = ?verdict,
                elapsed_ms = result.time().as_millis(),
            );

            self.context
                .replica_ordering()
                .learn(&result, self.context.replica_storage());
            self.context.add_replica_result(result.clone());
            Ok(result)
        })
    }
}

/// Runs one transport exchange.
///
/// Single-use body violations become the matching client-side failure codes so that the
/// replica is rejected and retries stop on the consumed body. Transport errors become
/// `UnknownFailure`. A signaled token always yields `Canceled`, disposing any response
/// that raced with it.
pub(crate) async fn exchange(
    transport: &dyn Transport,
    request: &Request,
    connection_timeout: Option<Duration>,
    timeout: Duration,
    cancellation: &CancellationToken,
) -> Result<Response, ClusterError> {
    let response = match transport
        .send(request, connection_timeout, timeout, cancellation)
        .await
    {
        Ok(response) => response,
        Err(ClusterError::Canceled) => return Err(ClusterError::Canceled),
        Err(error) if error.is_reuse_violation() => {
            debug!(message = "Request body cannot be sent again.", url = %request.url(), %error);
            match error {
                ClusterError::StreamReused => Response::new(ResponseCode::STREAM_REUSE_FAILURE),
                _ => Response::new(ResponseCode::CONTENT_REUSE_FAILURE),
            }
        }
        Err(error) => {
            warn!(message = "Transport failed.", url = %request.url(), %error);
            Response::new(ResponseCode::UNKNOWN_FAILURE)
        }
    };

    if cancellation.is_cancelled() {
        response.dispose();
        return Err(ClusterError::Canceled);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResponseVerdict;
    use crate::test_utils::{StubTransport, context_with};

    #[tokio::test]
    async fn records_classified_result() {
        let transport = StubTransport::new(|request| {
            if request.url().host() == Some("b") {
                Response::new(ResponseCode::OK)
            } else {
                Response::new(ResponseCode::SERVICE_UNAVAILABLE)
            }
        });
        let context = context_with(
            Request::get("/items?id=1".parse().unwrap()),
            transport.clone(),
            ["http://a", "http://b"],
        );
        let classifier = ResponseClassifier::default();
        let sender = ContextRequestSender::new(&context, &classifier);
        let token = CancellationToken::new();

        let a: Uri = "http://a".parse().unwrap();
        let b: Uri = "http://b".parse().unwrap();
        let first = sender
            .send_to_replica(&a, context.request(), None, Duration::from_secs(1), &token)
            .await
            .unwrap();
        let second = sender
            .send_to_replica(&b, context.request(), None, Duration::from_secs(1), &token)
            .await
            .unwrap();

        assert_eq!(first.verdict(), ResponseVerdict::Reject);
        assert_eq!(second.verdict(), ResponseVerdict::Accept);
        assert_eq!(context.replica_results_count(), 2);
        assert_eq!(transport.urls(), ["http://a/items?id=1", "http://b/items?id=1"]);
    }

    #[tokio::test]
    async fn reused_stream_is_a_rejected_replica() {
        use bytes::Bytes;
        use futures::{StreamExt, stream};

        let transport = StubTransport::new(|_| Response::new(ResponseCode::OK));
        let body = stream::iter(vec![Ok(Bytes::from_static(b"x"))]).boxed();
        let context = context_with(
            Request::put("/upload".parse().unwrap()).with_stream(body, None),
            transport,
            ["http://a", "http://b"],
        );
        let classifier = ResponseClassifier::default();
        let sender = ContextRequestSender::new(&context, &classifier);
        let token = CancellationToken::new();
        let a: Uri = "http://a".parse().unwrap();

        let first = sender
            .send_to_replica(&a, context.request(), None, Duration::from_secs(1), &token)
            .await
            .unwrap();
        let second = sender
            .send_to_replica(&a, context.request(), None, Duration::from_secs(1), &token)
            .await
            .unwrap();
        assert!(first.is_accepted());
        assert_eq!(second.response().code(), ResponseCode::STREAM_REUSE_FAILURE);
        assert_eq!(second.verdict(), ResponseVerdict::Reject);
    }

    #[tokio::test]
    async fn cancellation_is_an_error() {
        let transport = StubTransport::new(|_| Response::new(ResponseCode::OK));
        let context = context_with(Request::get("/".parse().unwrap()), transport, ["http://a"]);
        let classifier = ResponseClassifier::default();
        let sender = ContextRequestSender::new(&context, &classifier);
        let token = CancellationToken::new();
        token.cancel();
        let a: Uri = "http://a".parse().unwrap();

        let error = sender
            .send_to_replica(&a, context.request(), None, Duration::from_secs(1), &token)
            .await
            .unwrap_err();
        assert!(error.is_cancellation());
        assert_eq!(context.replica_results_count(), 0);
    }
}
