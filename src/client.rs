//! The public entry point: a configured pipeline plus the per-call context it runs on.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use tokio_util::sync::CancellationToken;

use crate::admission::{
    AdaptiveThrottlingModule, AdaptiveThrottlingOptions, AdaptiveThrottlingRegistry,
    ReplicaBudgetingModule, ReplicaBudgetingOptions, ReplicaBudgetingRegistry,
};
use crate::error::ConfigurationError;
use crate::execution::{
    AbsoluteUrlSenderModule, AsIsReplicaOrdering, ClusterProvider, ExecutionSettings,
    ReplicaOrdering, ReplicaStorage, RequestExecutionModule,
};
use crate::model::{ClusterResult, Request, RequestContext, RequestParameters, TimeBudget};
use crate::modules::{
    AuxiliaryHeadersModule, BuiltInModule, ErrorCatchingModule, HttpMethodValidationModule,
    LeakPreventionModule, LoggingModule, LoggingOptions, ModuleRelation, RequestModule,
    RequestPipeline, RequestTransform, RequestTransformationModule, RequestValidationModule,
    ResponseTransform, ResponseTransformationModule, TimeoutValidationModule,
};
use crate::retry::{NeverRetryPolicy, NoRetryStrategy, RetryModule, RetryPolicy, RetryStrategy};
use crate::transport::Transport;

/// Everything a [`ClusterClient`] is built from.
///
/// | Parameter | Default | Description |
/// |-----------|---------|-------------|
/// | `transport` | required | Sends one request to one replica |
/// | `cluster_provider` | required | Supplies the current replica list |
/// | `client_name` | `"cluster-client"` | Sent as `Client-Application`, used in logs |
/// | `default_timeout` | 30s | Time budget of calls sent without an explicit timeout |
/// | `maximum_replicas_to_use` | unlimited | Replicas tried per attempt |
/// | `replica_ordering` | as-is | Order in which replicas are tried |
/// | `execution` | sequential, default criteria | Strategy, classifier and selectors |
/// | `retry_policy` / `retry_strategy` | never / one attempt | Retries of exhausted calls |
/// | `adaptive_throttling` | off | Client-side throttling options |
/// | `replica_budgeting` | off | Replica budgeting options |
/// | `logging` | see [`LoggingOptions`] | What gets logged per call |
/// | `modules` | none | Custom modules placed relative to built-ins or each other |
#[derive(Clone, Builder)]
pub struct ClusterClientConfiguration {
    transport: Option<Arc<dyn Transport>>,

    cluster_provider: Option<Arc<dyn ClusterProvider>>,

    #[builder(into, default = default_client_name())]
    client_name: String,

    #[builder(default = default_timeout())]
    default_timeout: Duration,

    #[builder(default = usize::MAX)]
    maximum_replicas_to_use: usize,

    #[builder(default = Arc::new(AsIsReplicaOrdering) as Arc<dyn ReplicaOrdering>)]
    replica_ordering: Arc<dyn ReplicaOrdering>,

    /// Shared with other clients to pool what orderings learn about replicas.
    #[builder(default)]
    replica_storage: Arc<ReplicaStorage>,

    #[builder(default)]
    execution: ExecutionSettings,

    #[builder(default = Arc::new(NeverRetryPolicy) as Arc<dyn RetryPolicy>)]
    retry_policy: Arc<dyn RetryPolicy>,

    #[builder(default = Arc::new(NoRetryStrategy) as Arc<dyn RetryStrategy>)]
    retry_strategy: Arc<dyn RetryStrategy>,

    adaptive_throttling: Option<AdaptiveThrottlingOptions>,

    #[builder(default)]
    throttling_registry: Arc<AdaptiveThrottlingRegistry>,

    replica_budgeting: Option<ReplicaBudgetingOptions>,

    #[builder(default)]
    budgeting_registry: Arc<ReplicaBudgetingRegistry>,

    #[builder(default)]
    request_transforms: Vec<Arc<dyn RequestTransform>>,

    #[builder(default)]
    response_transforms: Vec<Arc<dyn ResponseTransform>>,

    #[builder(default)]
    logging: LoggingOptions,

    #[builder(default)]
    modules: Vec<(ModuleRelation, Arc<dyn RequestModule>)>,
}

fn default_client_name() -> String {
    "cluster-client".to_string()
}

const fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl ClusterClientConfiguration {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.transport.is_none() {
            return Err(ConfigurationError::MissingTransport);
        }
        if self.cluster_provider.is_none() {
            return Err(ConfigurationError::MissingClusterProvider);
        }
        if self.default_timeout.is_zero() {
            return Err(ConfigurationError::InvalidOption {
                option: "default_timeout",
                reason: "must be positive".to_string(),
            });
        }
        if self.maximum_replicas_to_use == 0 {
            return Err(ConfigurationError::InvalidOption {
                option: "maximum_replicas_to_use",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn pipeline(&self) -> Result<RequestPipeline, ConfigurationError> {
        let retry = RetryModule::new(self.retry_policy.clone(), self.retry_strategy.clone());
        let mut builder = RequestPipeline::builder()
            .with_built_in(BuiltInModule::LeakPrevention, Arc::new(LeakPreventionModule))
            .with_built_in(
                BuiltInModule::GlobalErrorCatching,
                Arc::new(ErrorCatchingModule::global()),
            )
            .with_built_in(
                BuiltInModule::RequestTransformation,
                Arc::new(RequestTransformationModule::new(
                    self.request_transforms.clone(),
                )),
            )
            .with_built_in(BuiltInModule::AuxiliaryHeaders, Arc::new(AuxiliaryHeadersModule))
            .with_built_in(BuiltInModule::Logging, Arc::new(LoggingModule::new(self.logging)))
            .with_built_in(
                BuiltInModule::ResponseTransformation,
                Arc::new(ResponseTransformationModule::new(
                    self.response_transforms.clone(),
                )),
            )
            .with_built_in(BuiltInModule::ErrorCatching, Arc::new(ErrorCatchingModule::local()))
            .with_built_in(BuiltInModule::RequestValidation, Arc::new(RequestValidationModule))
            .with_built_in(
                BuiltInModule::HttpMethodValidation,
                Arc::new(HttpMethodValidationModule),
            )
            .with_built_in(BuiltInModule::TimeoutValidation, Arc::new(TimeoutValidationModule))
            .with_built_in(BuiltInModule::RequestRetry, Arc::new(retry))
            .with_built_in(
                BuiltInModule::AbsoluteUrlSender,
                Arc::new(AbsoluteUrlSenderModule::new(self.execution.clone())),
            )
            .with_built_in(
                BuiltInModule::RequestExecution,
                Arc::new(RequestExecutionModule::new(self.execution.clone())),
            );

        if let Some(options) = &self.adaptive_throttling {
            let module =
                AdaptiveThrottlingModule::new(options.clone(), self.throttling_registry.clone())?;
            builder = builder.with_built_in(BuiltInModule::AdaptiveThrottling, Arc::new(module));
        }
        if let Some(options) = &self.replica_budgeting {
            let module =
                ReplicaBudgetingModule::new(options.clone(), self.budgeting_registry.clone())?;
            builder = builder.with_built_in(BuiltInModule::ReplicaBudgeting, Arc::new(module));
        }
        for (relation, module) in &self.modules {
            builder = builder.with_module(relation.clone(), module.clone());
        }
        Ok(builder.build())
    }
}

/// Sends logical requests to a replicated service.
///
/// Cheap to clone; clones share the pipeline and every collaborator.
#[derive(Clone)]
pub struct ClusterClient {
    pipeline: RequestPipeline,
    transport: Arc<dyn Transport>,
    cluster_provider: Arc<dyn ClusterProvider>,
    replica_ordering: Arc<dyn ReplicaOrdering>,
    replica_storage: Arc<ReplicaStorage>,
    client_name: Arc<str>,
    default_timeout: Duration,
    maximum_replicas_to_use: usize,
}

impl ClusterClient {
    pub fn new(configuration: ClusterClientConfiguration) -> Result<Self, ConfigurationError> {
        configuration.validate()?;
        let pipeline = configuration.pipeline()?;
        let (Some(transport), Some(cluster_provider)) =
            (configuration.transport, configuration.cluster_provider)
        else {
            return Err(ConfigurationError::MissingTransport);
        };

        debug!(
            message = "Cluster client created.",
            client = %configuration.client_name,
            modules = ?pipeline.module_names(),
        );
        Ok(Self {
            pipeline,
            transport,
            cluster_provider,
            replica_ordering: configuration.replica_ordering,
            replica_storage: configuration.replica_storage,
            client_name: Arc::from(configuration.client_name),
            default_timeout: configuration.default_timeout,
            maximum_replicas_to_use: configuration.maximum_replicas_to_use,
        })
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    pub fn replica_storage(&self) -> &Arc<ReplicaStorage> {
        &self.replica_storage
    }

    /// Sends `request` with default parameters and the default timeout.
    pub async fn send(&self, request: Request) -> ClusterResult {
        self.send_with(request, RequestParameters::default(), None, None)
            .await
    }

    /// Sends `request`. Never fails: every failure is reported through
    /// [`ClusterResult::status`].
    pub async fn send_with(
        &self,
        request: Request,
        parameters: RequestParameters,
        timeout: Option<Duration>,
        cancellation: Option<CancellationToken>,
    ) -> ClusterResult {
        let mut context = RequestContext::builder()
            .request(request)
            .parameters(parameters)
            .budget(TimeBudget::start_new(timeout.unwrap_or(self.default_timeout)))
            .maybe_cancellation(cancellation)
            .client_name(self.client_name.clone())
            .transport(self.transport.clone())
            .cluster_provider(self.cluster_provider.clone())
            .replica_ordering(self.replica_ordering.clone())
            .replica_storage(self.replica_storage.clone())
            .maximum_replicas_to_use(self.maximum_replicas_to_use)
            .build();

        match self.pipeline.execute(&mut context).await {
            Ok(result) => result,
            Err(error) if error.is_cancellation() => {
                ClusterResult::canceled(context.request().clone())
            }
            Err(error) => {
                error!(
                    message = "Request pipeline failed.",
                    url = %context.request().url(),
                    %error,
                );
                ClusterResult::unexpected_exception(context.request().clone())
            }
        }
    }
}

impl fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterClient")
            .field("client_name", &self.client_name)
            .field("pipeline", &self.pipeline)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}
