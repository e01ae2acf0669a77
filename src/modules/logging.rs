use bon::Builder;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::{ModuleResult, Next, RequestModule};
use crate::internal_event::{ClusterRequestCompleted, emit};
use crate::model::{ClusterResultStatus, RequestContext};

/// What the logging module writes.
///
/// | Parameter | Default | Description |
/// |-----------|---------|-------------|
/// | `log_requests` | `true` | Log every call before it is sent |
/// | `log_results` | `true` | Log the status of every call |
/// | `log_replica_results` | `false` | Log each replica attempt at debug level |
#[derive(Clone, Copy, Debug, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    #[builder(default = default_log_requests())]
    pub log_requests: bool,

    #[builder(default = default_log_results())]
    pub log_results: bool,

    #[builder(default)]
    pub log_replica_results: bool,
}

const fn default_log_requests() -> bool {
    true
}

const fn default_log_results() -> bool {
    true
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            log_requests: default_log_requests(),
            log_results: default_log_results(),
            log_replica_results: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingModule {
    options: LoggingOptions,
}

impl LoggingModule {
    pub const fn new(options: LoggingOptions) -> Self {
        Self { options }
    }
}

impl RequestModule for LoggingModule {
    fn name(&self) -> &str {
        "Logging"
    }

    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, ModuleResult> {
        async move {
            if self.options.log_requests {
                info!(
                    message = "Sending request.",
                    client = context.client_name(),
                    method = %context.request().method(),
                    url = %context.request().url(),
                    timeout_ms = context.budget().remaining().as_millis(),
                );
            }

            let result = next.run(context).await?;

            if self.options.log_replica_results {
                for replica in result.replica_results() {
                    debug!(
                        message = "Replica result.",
                        replica = %replica.replica(),
                        code = replica.response().code().as_u16(),
                        verdict = ?replica.verdict(),
                        elapsed_ms = replica.time().as_millis(),
                    );
                }
            }

            if self.options.log_results {
                let elapsed_ms = context.budget().elapsed().as_millis();
                let code = result.response().code().as_u16();
                if result.status() == ClusterResultStatus::Success {
                    info!(
                        message = "Request succeeded.",
                        url = %context.request().url(),
                        code,
                        replica = ?result.replica().map(|uri| uri.to_string()),
                        elapsed_ms,
                    );
                } else {
                    warn!(
                        message = "Request failed.",
                        url = %context.request().url(),
                        status = %result.status(),
                        code,
                        replicas = result.replica_results().len(),
                        elapsed_ms,
                    );
                }
            }

            emit(ClusterRequestCompleted {
                status: result.status(),
                elapsed: context.budget().elapsed(),
                replicas: result.replica_results().len(),
            });
            Ok(result)
        }
        .boxed()
    }
}
