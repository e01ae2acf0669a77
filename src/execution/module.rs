use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use http::Uri;
use tokio::time::Instant;

use super::criteria::ResponseClassifier;
use super::selectors::{
    ClusterResultStatusSelector, LastAcceptedResponseSelector, ResponseSelector,
    ResultStatusSelector,
};
use super::sender::{ContextRequestSender, exchange};
use super::strategy::{RequestStrategy, SequentialRequestStrategy};
use crate::error::ClusterError;
use crate::model::{ClusterResult, ReplicaResult, RequestContext};
use crate::modules::{ModuleResult, Next, RequestModule};

/// The collaborators shared by the two terminal modules.
#[derive(Clone)]
pub struct ExecutionSettings {
    pub default_strategy: Arc<dyn RequestStrategy>,
    pub classifier: Arc<ResponseClassifier>,
    pub response_selector: Arc<dyn ResponseSelector>,
    pub status_selector: Arc<dyn ResultStatusSelector>,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            default_strategy: Arc::new(SequentialRequestStrategy),
            classifier: Arc::new(ResponseClassifier::default()),
            response_selector: Arc::new(LastAcceptedResponseSelector),
            status_selector: Arc::new(ClusterResultStatusSelector),
        }
    }
}

/// Terminal module: resolves the cluster, orders and truncates the replica list and
/// hands it to the request strategy.
#[derive(Clone, Default)]
pub struct RequestExecutionModule {
    settings: ExecutionSettings,
}

impl RequestExecutionModule {
    pub fn new(settings: ExecutionSettings) -> Self {
        Self { settings }
    }
}

impl RequestModule for RequestExecutionModule {
    fn name(&self) -> &str {
        "RequestExecution"
    }

    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        _next: Next<'a>,
    ) -> BoxFuture<'a, ModuleResult> {
        async move {
            let context: &RequestContext = context;
            let replicas = match context.cluster_provider().get_cluster() {
                Some(replicas) if !replicas.is_empty() => replicas,
                _ => {
                    warn!(
                        message = "No replicas found for request.",
                        url = %context.request().url(),
                    );
                    return Ok(ClusterResult::replicas_not_found(context.request().clone()));
                }
            };

            let count = replicas.len().min(context.maximum_replicas_to_use());
            let mut ordered = context.replica_ordering().order(
                replicas,
                context.replica_storage(),
                context.request(),
                context.parameters(),
            );
            ordered.truncate(count);

            let strategy = context
                .parameters()
                .strategy()
                .unwrap_or(&self.settings.default_strategy);
            trace!(
                message = "Executing request.",
                strategy = strategy.name(),
                replicas = ordered.len(),
            );

            let sender = ContextRequestSender::new(context, &self.settings.classifier);
            strategy
                .send(
                    context.request(),
                    context.parameters(),
                    &sender,
                    context.budget(),
                    &ordered,
                    count,
                    context.cancellation(),
                )
                .await?;

            if context.is_canceled() {
                return Err(ClusterError::Canceled);
            }

            let results = context.freeze_replica_results();
            let selected = self.settings.response_selector.select(
                context.request(),
                context.parameters(),
                &results,
            );
            let status = self
                .settings
                .status_selector
                .select(&results, context.budget());
            Ok(ClusterResult::new(
                status,
                results,
                selected,
                context.request().clone(),
            ))
        }
        .boxed()
    }
}

/// Sends requests with an absolute URL straight to that URL, once. Anything else goes on
/// down the chain.
#[derive(Clone, Default)]
pub struct AbsoluteUrlSenderModule {
    settings: ExecutionSettings,
}

impl AbsoluteUrlSenderModule {
    pub fn new(settings: ExecutionSettings) -> Self {
        Self { settings }
    }
}

impl RequestModule for AbsoluteUrlSenderModule {
    fn name(&self) -> &str {
        "AbsoluteUrlSender"
    }

    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, ModuleResult> {
        async move {
            if !context.request().is_absolute() {
                return next.run(context).await;
            }

            let request = context.request().clone();
            let started = Instant::now();
            let response = exchange(
                context.transport().as_ref(),
                &request,
                context.parameters().connection_timeout(),
                context.budget().remaining(),
                context.cancellation(),
            )
            .await?;

            let verdict = self.settings.classifier.classify(&response);
            let result = ReplicaResult::new(
                origin(request.url()),
                Arc::new(response),
                verdict,
                started.elapsed(),
            );
            let results = vec![result];
            let selected =
                self.settings
                    .response_selector
                    .select(&request, context.parameters(), &results);
            let status = self
                .settings
                .status_selector
                .select(&results, context.budget());
            Ok(ClusterResult::new(status, results, selected, request))
        }
        .boxed()
    }
}

fn origin(url: &Uri) -> Uri {
    let mut builder = Uri::builder();
    if let Some(scheme) = url.scheme() {
        builder = builder.scheme(scheme.clone());
    }
    if let Some(authority) = url.authority() {
        builder = builder.authority(authority.clone());
    }
    builder
        .path_and_query("/")
        .build()
        .unwrap_or_else(|_| url.clone())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::execution::{ClusterProvider, ParallelRequestStrategy};
    use crate::model::{ClusterResultStatus, Request, Response, ResponseCode};
    use crate::test_utils::{StatusModule, StubTransport, context_with, run_module};

    fn by_host(ok_host: &'static str) -> Arc<StubTransport> {
        StubTransport::new(move |request| {
            if request.url().host() == Some(ok_host) {
                Response::new(ResponseCode::OK).with_content("hello")
            } else {
                Response::new(ResponseCode::BAD_GATEWAY)
            }
        })
    }

    fn terminal() -> Arc<dyn RequestModule> {
        Arc::new(StatusModule::new(ClusterResultStatus::UnexpectedException))
    }

    #[tokio::test]
    async fn sequential_execution_tries_until_accepted() {
        let transport = by_host("b");
        let mut context = context_with(
            Request::get("/data".parse().unwrap()),
            transport.clone(),
            ["http://a", "http://b", "http://c"],
        );

        let result = run_module(&RequestExecutionModule::default(), terminal(), &mut context)
            .await
            .unwrap();

        assert_eq!(result.status(), ClusterResultStatus::Success);
        assert_eq!(result.replica_results().len(), 2);
        assert_eq!(result.response().content().unwrap().as_ref(), b"hello");
        assert_eq!(result.replica().map(|uri| uri.host()), Some(Some("b")));
        assert_eq!(transport.urls(), ["http://a/data", "http://b/data"]);
        assert_eq!(context.replica_results_count(), 0);
    }

    #[tokio::test]
    async fn exhausted_replicas_select_a_replica_answer() {
        let transport = by_host("none");
        let mut context = context_with(
            Request::get("/".parse().unwrap()),
            transport,
            ["http://a", "http://b"],
        );
        let result = run_module(&RequestExecutionModule::default(), terminal(), &mut context)
            .await
            .unwrap();
        assert_eq!(result.status(), ClusterResultStatus::ReplicasExhausted);
        assert_eq!(result.response().code(), ResponseCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn empty_cluster_is_replicas_not_found() {
        struct Empty;
        impl ClusterProvider for Empty {
            fn get_cluster(&self) -> Option<Vec<Uri>> {
                None
            }
        }

        let transport = by_host("a");
        let mut context = context_with(Request::get("/".parse().unwrap()), transport.clone(), []);
        let result = run_module(&RequestExecutionModule::default(), terminal(), &mut context)
            .await
            .unwrap();
        assert_eq!(result.status(), ClusterResultStatus::ReplicasNotFound);

        context.set_cluster_provider(Arc::new(Empty));
        let result = run_module(&RequestExecutionModule::default(), terminal(), &mut context)
            .await
            .unwrap();
        assert_eq!(result.status(), ClusterResultStatus::ReplicasNotFound);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn replica_count_is_capped() {
        let transport = by_host("none");
        let mut context = context_with(
            Request::get("/".parse().unwrap()),
            transport.clone(),
            ["http://a", "http://b", "http://c"],
        );
        context.set_maximum_replicas_to_use(1);
        let result = run_module(&RequestExecutionModule::default(), terminal(), &mut context)
            .await
            .unwrap();
        assert_eq!(result.replica_results().len(), 1);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn per_call_strategy_overrides_default() {
        let transport = StubTransport::with_latency(
            |request| match request.url().host() {
                Some("a") => Duration::from_millis(300),
                _ => Duration::from_millis(10),
            },
            |_| Response::new(ResponseCode::OK),
        );
        let mut context = context_with(
            Request::get("/".parse().unwrap()),
            transport.clone(),
            ["http://a", "http://b"],
        );
        let parameters = context
            .parameters()
            .clone()
            .with_strategy(Some(Arc::new(ParallelRequestStrategy::new(2))));
        context.set_parameters(parameters);

        let result = run_module(&RequestExecutionModule::default(), terminal(), &mut context)
            .await
            .unwrap();
        assert_eq!(result.status(), ClusterResultStatus::Success);
        assert_eq!(transport.calls(), 2);
        assert_eq!(result.replica().and_then(Uri::host), Some("b"));
    }

    /// Gets one accepted answer and cancels the call right after it.
    struct CancelAfterAnswer;

    impl RequestStrategy for CancelAfterAnswer {
        fn send<'a>(
            &'a self,
            request: &'a Request,
            parameters: &'a crate::model::RequestParameters,
            sender: &'a dyn crate::execution::RequestSender,
            _budget: &'a crate::model::TimeBudget,
            replicas: &'a [Uri],
            _replicas_count: usize,
            cancellation: &'a tokio_util::sync::CancellationToken,
        ) -> BoxFuture<'a, Result<(), ClusterError>> {
            async move {
                let result = sender
                    .send_to_replica(
                        &replicas[0],
                        request,
                        parameters.connection_timeout(),
                        Duration::from_secs(1),
                        cancellation,
                    )
                    .await?;
                assert!(result.is_accepted());
                cancellation.cancel();
                Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn cancellation_after_the_strategy_is_not_a_success() {
        let transport = by_host("a");
        let mut context = context_with(
            Request::get("/".parse().unwrap()),
            transport.clone(),
            ["http://a", "http://b"],
        );
        let strategy: Arc<dyn RequestStrategy> = Arc::new(CancelAfterAnswer);
        let parameters = context.parameters().clone().with_strategy(Some(strategy));
        context.set_parameters(parameters);

        let error = run_module(&RequestExecutionModule::default(), terminal(), &mut context)
            .await
            .unwrap_err();
        assert!(error.is_cancellation());
        assert_eq!(transport.calls(), 1);

        let recorded = context.replica_results_snapshot();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].is_accepted());
    }

    #[tokio::test]
    async fn absolute_urls_bypass_the_cluster() {
        let transport = by_host("external");
        let mut context = context_with(
            Request::get("http://external:9000/ping".parse().unwrap()),
            transport.clone(),
            ["http://a"],
        );
        let terminal = Arc::new(StatusModule::new(ClusterResultStatus::Success));

        let result = run_module(&AbsoluteUrlSenderModule::default(), terminal.clone(), &mut context)
            .await
            .unwrap();
        assert_eq!(result.status(), ClusterResultStatus::Success);
        assert_eq!(transport.urls(), ["http://external:9000/ping"]);
        assert_eq!(terminal.calls(), 0);
        assert_eq!(result.replica_results()[0].replica().authority().map(|a| a.as_str()), Some("external:9000"));

        let mut context = context_with(Request::get("/ping".parse().unwrap()), transport, ["http://a"]);
        run_module(&AbsoluteUrlSenderModule::default(), terminal.clone(), &mut context)
            .await
            .unwrap();
        assert_eq!(terminal.calls(), 1);
    }
}
