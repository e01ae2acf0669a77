use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use http::Request as HttpRequest;
use tower::Service;

/// A `tower::Service` wrapper for `reqwest::Client`.
/// Accepts `http::Request<reqwest::Body>` and hands back every response, whatever its status.
#[derive(Clone, Debug, Default)]
pub struct ReqwestService {
    client: reqwest::Client,
}

impl ReqwestService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self::new_with_client(client))
    }
}

impl Service<HttpRequest<reqwest::Body>> for ReqwestService {
    type Response = reqwest::Response;
    type Error = reqwest::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, http_request: HttpRequest<reqwest::Body>) -> Self::Future {
        let client = self.client.clone();
        Box::pin(async move {
            let request = reqwest::Request::try_from(http_request)?;
            client.execute(request).await
        })
    }
}
