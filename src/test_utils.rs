use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::ClusterError;
use crate::execution::FixedClusterProvider;
use crate::model::{
    ClusterResult, ClusterResultStatus, Content, Request, RequestContext, Response, ResponseCode,
    TimeBudget,
};
use crate::modules::{ModuleResult, Next, RequestModule};
use crate::transport::{Transport, TransportCapabilities};

pub(crate) fn trace_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

type Respond = dyn Fn(&Request) -> Response + Send + Sync;
type Latency = dyn Fn(&Request) -> Duration + Send + Sync;

/// In-memory transport answering from a closure. Reads single-use bodies like a real
/// transport and honors timeouts and cancellation.
pub(crate) struct StubTransport {
    respond: Box<Respond>,
    latency: Option<Box<Latency>>,
    capabilities: TransportCapabilities,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl StubTransport {
    pub(crate) fn new(
        respond: impl Fn(&Request) -> Response + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self::plain(respond))
    }

    pub(crate) fn with_latency(
        latency: impl Fn(&Request) -> Duration + Send + Sync + 'static,
        respond: impl Fn(&Request) -> Response + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            latency: Some(Box::new(latency)),
            ..Self::plain(respond)
        })
    }

    pub(crate) fn with_capabilities(
        capabilities: TransportCapabilities,
        respond: impl Fn(&Request) -> Response + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            capabilities,
            ..Self::plain(respond)
        })
    }

    fn plain(respond: impl Fn(&Request) -> Response + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            latency: None,
            capabilities: TransportCapabilities::all(),
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

impl Transport for StubTransport {
    fn capabilities(&self) -> TransportCapabilities {
        self.capabilities
    }

    fn send<'a>(
        &'a self,
        request: &'a Request,
        _connection_timeout: Option<Duration>,
        timeout: Duration,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Response, ClusterError>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().push(request.url().to_string());

            match request.content() {
                Content::Stream(stream) => drop(stream.take()?),
                Content::Producer(producer) => drop(producer.produce()?),
                _ => {}
            }

            let exchange = async {
                if let Some(latency) = &self.latency {
                    tokio::time::sleep(latency(request)).await;
                }
                (self.respond)(request)
            };

            tokio::select! {
                biased;
                _ = cancellation.cancelled() => Err(ClusterError::Canceled),
                outcome = tokio::time::timeout(timeout, exchange) => Ok(outcome
                    .unwrap_or_else(|_| Response::new(ResponseCode::REQUEST_TIMEOUT))),
            }
        }
        .boxed()
    }
}

pub(crate) fn context(request: Request) -> RequestContext {
    context_with(
        request,
        StubTransport::new(|_| Response::new(ResponseCode::OK)),
        ["http://replica-1", "http://replica-2", "http://replica-3"],
    )
}

pub(crate) fn context_with<'r>(
    request: Request,
    transport: Arc<StubTransport>,
    replicas: impl IntoIterator<Item = &'r str>,
) -> RequestContext {
    let replicas = FixedClusterProvider::parse(replicas).unwrap();
    RequestContext::builder()
        .request(request)
        .budget(TimeBudget::start_new(Duration::from_secs(10)))
        .transport(transport)
        .cluster_provider(Arc::new(replicas))
        .build()
}

/// Terminal module answering every call with a fixed status.
pub(crate) struct StatusModule {
    status: ClusterResultStatus,
    calls: AtomicUsize,
}

impl StatusModule {
    pub(crate) fn new(status: ClusterResultStatus) -> Self {
        Self {
            status,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RequestModule for StatusModule {
    fn name(&self) -> &str {
        "status"
    }

    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        _next: Next<'a>,
    ) -> BoxFuture<'a, ModuleResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = ClusterResult::new(self.status, Vec::new(), None, context.request().clone());
        futures::future::ready(Ok(result)).boxed()
    }
}

type Script = dyn Fn(&mut RequestContext, usize) -> ModuleResult + Send + Sync;

/// Terminal module whose answer is computed from the context and the call index.
pub(crate) struct ScriptedModule {
    script: Box<Script>,
    calls: AtomicUsize,
}

impl ScriptedModule {
    pub(crate) fn new(
        script: impl Fn(&mut RequestContext, usize) -> ModuleResult + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RequestModule for ScriptedModule {
    fn name(&self) -> &str {
        "scripted"
    }

    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        _next: Next<'a>,
    ) -> BoxFuture<'a, ModuleResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        futures::future::ready((self.script)(context, call)).boxed()
    }
}

/// Runs `module` with `terminal` as the rest of the chain.
pub(crate) async fn run_module(
    module: &dyn RequestModule,
    terminal: Arc<dyn RequestModule>,
    context: &mut RequestContext,
) -> ModuleResult {
    let rest = [terminal];
    module.execute(context, Next::new(&rest)).await
}
