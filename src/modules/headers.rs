use futures::FutureExt;
use futures::future::BoxFuture;
use http::{HeaderName, HeaderValue};

use super::{ModuleResult, Next, RequestModule};
use crate::model::RequestContext;

/// Remaining time budget of the call, in seconds with millisecond precision.
pub const REQUEST_TIMEOUT_HEADER: HeaderName = HeaderName::from_static("request-timeout");
pub const REQUEST_PRIORITY_HEADER: HeaderName = HeaderName::from_static("request-priority");
pub const CLIENT_APPLICATION_HEADER: HeaderName = HeaderName::from_static("client-application");

/// Adds the auxiliary headers a receiving service can use for its own scheduling.
/// Headers already present on the request are left alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuxiliaryHeadersModule;

impl RequestModule for AuxiliaryHeadersModule {
    fn name(&self) -> &str {
        "AuxiliaryHeaders"
    }

    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, ModuleResult> {
        async move {
            let mut request = context.request().clone();
            let headers = request.headers();

            let mut additions = Vec::with_capacity(3);
            if !headers.contains_key(REQUEST_TIMEOUT_HEADER) && !context.budget().is_infinite() {
                let seconds = format!("{:.3}", context.budget().remaining().as_secs_f64());
                additions.extend(
                    HeaderValue::from_str(&seconds)
                        .ok()
                        .map(|value| (REQUEST_TIMEOUT_HEADER, value)),
                );
            }
            if let Some(priority) = context.parameters().priority() {
                if !headers.contains_key(REQUEST_PRIORITY_HEADER) {
                    additions.push((
                        REQUEST_PRIORITY_HEADER,
                        HeaderValue::from_static(priority.as_str()),
                    ));
                }
            }
            if !headers.contains_key(CLIENT_APPLICATION_HEADER) {
                match HeaderValue::from_str(context.client_name()) {
                    Ok(value) => additions.push((CLIENT_APPLICATION_HEADER, value)),
                    Err(_) => debug!(
                        message = "Client name is not a valid header value.",
                        client_name = context.client_name(),
                    ),
                }
            }

            if !additions.is_empty() {
                for (name, value) in additions {
                    request = request.with_header(name, value);
                }
                context.set_request(request);
            }
            next.run(context).await
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::model::{ClusterResult, ClusterResultStatus, Request, RequestParameters, RequestPriority};
    use crate::test_utils::{ScriptedModule, context, run_module};

    fn capturing(seen: Arc<Mutex<Option<Request>>>) -> Arc<ScriptedModule> {
        ScriptedModule::new(move |context, _| {
            *seen.lock() = Some(context.request().clone());
            Ok(ClusterResult::new(
                ClusterResultStatus::Success,
                Vec::new(),
                None,
                context.request().clone(),
            ))
        })
    }

    #[tokio::test(start_paused = true)]
    async fn adds_missing_headers() {
        let seen = Arc::new(Mutex::new(None));
        let mut ctx = context(Request::get("/".parse().unwrap()));
        ctx.set_parameters(RequestParameters::new().with_priority(Some(RequestPriority::Critical)));

        run_module(&AuxiliaryHeadersModule, capturing(seen.clone()), &mut ctx)
            .await
            .unwrap();

        let request = seen.lock().take().unwrap();
        let headers = request.headers();
        assert_eq!(headers[REQUEST_TIMEOUT_HEADER], "10.000");
        assert_eq!(headers[REQUEST_PRIORITY_HEADER], "Critical");
        assert_eq!(headers[CLIENT_APPLICATION_HEADER], "cluster-client");
    }

    #[tokio::test]
    async fn keeps_existing_headers() {
        let seen = Arc::new(Mutex::new(None));
        let request = Request::get("/".parse().unwrap())
            .with_header(CLIENT_APPLICATION_HEADER, HeaderValue::from_static("billing"));
        let mut ctx = context(request);

        run_module(&AuxiliaryHeadersModule, capturing(seen.clone()), &mut ctx)
            .await
            .unwrap();

        let request = seen.lock().take().unwrap();
        assert_eq!(request.headers()[CLIENT_APPLICATION_HEADER], "billing");
        assert!(!request.headers().contains_key(REQUEST_PRIORITY_HEADER));
    }
}
