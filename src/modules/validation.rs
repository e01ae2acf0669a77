use futures::FutureExt;
use futures::future::BoxFuture;
use http::Method;

use super::{ModuleResult, Next, RequestModule};
use crate::model::{ClusterResult, Content, Request, RequestContext};
use crate::transport::TransportCapabilities;

/// Rejects requests that cannot be sent as they are with `IncorrectArguments`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestValidationModule;

impl RequestValidationModule {
    fn validate(request: &Request, capabilities: TransportCapabilities) -> Result<(), &'static str> {
        match request.content() {
            Content::Stream(_) | Content::Producer(_)
                if !capabilities.contains(TransportCapabilities::REQUEST_STREAMING) =>
            {
                return Err("transport does not support streamed request bodies");
            }
            Content::Composite(_)
                if !capabilities.contains(TransportCapabilities::REQUEST_COMPOSITE_BODY) =>
            {
                return Err("transport does not support composite request bodies");
            }
            _ => {}
        }

        if request.has_body() && matches!(*request.method(), Method::GET | Method::HEAD) {
            return Err("GET and HEAD requests cannot carry a body");
        }

        let url = request.url();
        if url.scheme().is_some() != url.authority().is_some() {
            return Err("absolute URL must have both a scheme and a host");
        }
        Ok(())
    }
}

impl RequestModule for RequestValidationModule {
    fn name(&self) -> &str {
        "RequestValidation"
    }

    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, ModuleResult> {
        async move {
            let capabilities = context.transport().capabilities();
            if let Err(reason) = Self::validate(context.request(), capabilities) {
                warn!(
                    message = "Request is invalid.",
                    reason,
                    method = %context.request().method(),
                    url = %context.request().url(),
                    content = context.request().content().kind(),
                );
                return Ok(ClusterResult::incorrect_arguments(context.request().clone()));
            }
            next.run(context).await
        }
        .boxed()
    }
}

/// Only the standard HTTP methods are allowed through.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpMethodValidationModule;

const ALLOWED_METHODS: [Method; 8] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::HEAD,
    Method::OPTIONS,
    Method::TRACE,
];

impl RequestModule for HttpMethodValidationModule {
    fn name(&self) -> &str {
        "HttpMethodValidation"
    }

    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, ModuleResult> {
        async move {
            if !ALLOWED_METHODS.contains(context.request().method()) {
                warn!(
                    message = "Request has an unsupported HTTP method.",
                    method = %context.request().method(),
                );
                return Ok(ClusterResult::incorrect_arguments(context.request().clone()));
            }
            next.run(context).await
        }
        .boxed()
    }
}

/// Fails calls whose time budget ran out before anything was sent.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimeoutValidationModule;

impl RequestModule for TimeoutValidationModule {
    fn name(&self) -> &str {
        "TimeoutValidation"
    }

    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, ModuleResult> {
        async move {
            if context.budget().has_expired() {
                warn!(
                    message = "Request timed out before it was sent.",
                    url = %context.request().url(),
                    timeout_ms = context.budget().total().as_millis(),
                );
                return Ok(ClusterResult::time_expired(context.request().clone()));
            }
            next.run(context).await
        }
        .boxed()
    }
}
