use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use super::{ModuleResult, Next, RequestModule};
use crate::model::{Request, RequestContext, Response};

/// Rewrites a request before it is sent, e.g. to add authentication headers.
pub trait RequestTransform: Send + Sync + 'static {
    fn transform(&self, request: Request) -> Request;
}

impl<F> RequestTransform for F
where
    F: Fn(Request) -> Request + Send + Sync + 'static,
{
    fn transform(&self, request: Request) -> Request {
        self(request)
    }
}

/// Rewrites the final response of a call.
pub trait ResponseTransform: Send + Sync + 'static {
    fn transform(&self, request: &Request, response: Arc<Response>) -> Arc<Response>;
}

impl<F> ResponseTransform for F
where
    F: Fn(&Request, Arc<Response>) -> Arc<Response> + Send + Sync + 'static,
{
    fn transform(&self, request: &Request, response: Arc<Response>) -> Arc<Response> {
        self(request, response)
    }
}

/// Applies request transforms in configuration order.
#[derive(Clone, Default)]
pub struct RequestTransformationModule {
    transforms: Vec<Arc<dyn RequestTransform>>,
}

impl RequestTransformationModule {
    pub fn new(transforms: Vec<Arc<dyn RequestTransform>>) -> Self {
        Self { transforms }
    }
}

impl RequestModule for RequestTransformationModule {
    fn name(&self) -> &str {
        "RequestTransformation"
    }

    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, ModuleResult> {
        async move {
            if !self.transforms.is_empty() {
                let request = self
                    .transforms
                    .iter()
                    .fold(context.request().clone(), |request, transform| {
                        transform.transform(request)
                    });
                context.set_request(request);
            }
            next.run(context).await
        }
        .boxed()
    }
}

/// Applies response transforms, in configuration order, to the final response.
#[derive(Clone, Default)]
pub struct ResponseTransformationModule {
    transforms: Vec<Arc<dyn ResponseTransform>>,
}

impl ResponseTransformationModule {
    pub fn new(transforms: Vec<Arc<dyn ResponseTransform>>) -> Self {
        Self { transforms }
    }
}

impl RequestModule for ResponseTransformationModule {
    fn name(&self) -> &str {
        "ResponseTransformation"
    }

    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, ModuleResult> {
        async move {
            let result = next.run(context).await?;
            if self.transforms.is_empty() {
                return Ok(result);
            }

            let original = result.response().clone();
            let transformed = self
                .transforms
                .iter()
                .fold(original.clone(), |response, transform| {
                    transform.transform(result.request(), response)
                });
            if Arc::ptr_eq(&original, &transformed) {
                Ok(result)
            } else {
                Ok(result.with_response(transformed))
            }
        }
        .boxed()
    }
}
