use std::io;
use std::time::Duration;

use futures::TryStreamExt;
use futures::future::BoxFuture;
use http::Request as HttpRequest;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};

use super::{ReqwestService, Transport, TransportCapabilities};
use crate::Error as CrateError;
use crate::error::{ClusterError, ConfigurationError};
use crate::model::{Content, Request, Response, ResponseCode};

/// Adapts any reqwest-shaped `tower::Service` into a [`Transport`].
///
/// Timeouts become [`ResponseCode::REQUEST_TIMEOUT`] responses and exchange failures map to
/// the client-side failure codes. The per-call connection timeout is not applied: reqwest
/// only takes one when the client is built, see [`TowerTransport::reqwest_with_connect_timeout`].
#[derive(Clone, Debug)]
pub struct TowerTransport<S> {
    service: S,
    stream_responses: bool,
}

impl TowerTransport<ReqwestService> {
    pub fn reqwest() -> Self {
        Self::new(ReqwestService::new())
    }

    /// A reqwest transport whose client gives up connecting after `connect_timeout`.
    pub fn reqwest_with_connect_timeout(
        connect_timeout: Duration,
    ) -> Result<Self, ConfigurationError> {
        let service = ReqwestService::with_connect_timeout(connect_timeout)
            .map_err(|source| ConfigurationError::HttpClient { source })?;
        Ok(Self::new(service))
    }
}

impl<S> TowerTransport<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            stream_responses: false,
        }
    }

    /// Hand response bodies out as streams instead of buffering them.
    pub fn with_response_streaming(mut self, enabled: bool) -> Self {
        self.stream_responses = enabled;
        self
    }
}

impl<S> Transport for TowerTransport<S>
where
    S: Service<HttpRequest<reqwest::Body>, Response = reqwest::Response>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Error: Into<CrateError>,
    S::Future: Send,
{
    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities::all()
    }

    fn send<'a>(
        &'a self,
        request: &'a Request,
        _connection_timeout: Option<Duration>,
        timeout: Duration,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Response, ClusterError>> {
        Box::pin(async move {
            let http_request = build_http_request(request)?;
            let service = self.service.clone();
            let stream_responses = self.stream_responses;

            let exchange = async move {
                let response = service
                    .oneshot(http_request)
                    .await
                    .map_err(Into::<CrateError>::into)?;
                read_response(response, stream_responses).await
            };

            tokio::select! {
                biased;
                _ = cancellation.cancelled() => Err(ClusterError::Canceled),
                outcome = tokio::time::timeout(timeout, exchange) => match outcome {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(error)) => {
                        let code = classify_error(error.as_ref());
                        warn!(message = "Request exchange failed.", url = %request.url(), %code, %error);
                        Ok(Response::new(code))
                    }
                    Err(_) => {
                        debug!(message = "Request timed out.", url = %request.url(), timeout_ms = timeout.as_millis());
                        Ok(Response::new(ResponseCode::REQUEST_TIMEOUT))
                    }
                },
            }
        })
    }
}

fn build_http_request(request: &Request) -> Result<HttpRequest<reqwest::Body>, ClusterError> {
    let body = match request.content() {
        Content::Empty => reqwest::Body::from(Vec::new()),
        Content::Buffer(bytes) => reqwest::Body::from(bytes.clone()),
        Content::Composite(parts) => reqwest::Body::from(parts.concat()),
        Content::Stream(stream) => reqwest::Body::wrap_stream(stream.take()?),
        Content::Producer(producer) => reqwest::Body::wrap_stream(producer.produce()?),
    };

    let mut builder = HttpRequest::builder()
        .method(request.method().clone())
        .uri(request.url().clone());
    if let Some(headers) = builder.headers_mut() {
        headers.extend(request.headers().clone());
    }
    builder.body(body).map_err(|error| ClusterError::Transport {
        source: Box::new(error),
    })
}

async fn read_response(
    response: reqwest::Response,
    stream_responses: bool,
) -> Result<Response, CrateError> {
    let code = ResponseCode::from(response.status());
    let headers = response.headers().clone();
    let converted = Response::new(code).with_headers(headers);

    if stream_responses {
        let stream = response.bytes_stream().map_err(io::Error::other);
        return Ok(converted.with_stream(Box::pin(stream)));
    }

    match response.bytes().await {
        Ok(content) if content.is_empty() => Ok(converted),
        Ok(content) => Ok(converted.with_content(content)),
        Err(error) => {
            warn!(message = "Failed to read response body.", %error);
            Ok(Response::new(ResponseCode::RECEIVE_FAILURE))
        }
    }
}

fn classify_error(error: &(dyn std::error::Error + Send + Sync + 'static)) -> ResponseCode {
    match error.downcast_ref::<reqwest::Error>() {
        Some(error) if error.is_timeout() => ResponseCode::REQUEST_TIMEOUT,
        Some(error) if error.is_connect() => ResponseCode::CONNECT_FAILURE,
        Some(error) if error.is_body() || error.is_decode() => ResponseCode::RECEIVE_FAILURE,
        Some(error) if error.is_request() => ResponseCode::SEND_FAILURE,
        _ => ResponseCode::UNKNOWN_FAILURE,
    }
}
