use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::BoxFuture;

use super::{BuiltInModule, ModuleResult, Next, RequestModule};
use crate::model::{ClusterResult, RequestContext};

/// Turns whatever the rest of the chain fails with into a result.
///
/// Cancellation becomes [`Canceled`](crate::ClusterResultStatus::Canceled) and is only
/// logged at debug level. Any other error, or a panic, becomes
/// [`UnexpectedException`](crate::ClusterResultStatus::UnexpectedException) and is
/// logged as an error. The same type serves both the outer `GlobalErrorCatching` slot
/// and the inner `ErrorCatching` slot.
#[derive(Clone, Copy, Debug)]
pub struct ErrorCatchingModule {
    token: BuiltInModule,
}

impl ErrorCatchingModule {
    pub const fn global() -> Self {
        Self {
            token: BuiltInModule::GlobalErrorCatching,
        }
    }

    pub const fn local() -> Self {
        Self {
            token: BuiltInModule::ErrorCatching,
        }
    }
}

impl RequestModule for ErrorCatchingModule {
    fn name(&self) -> &str {
        self.token.as_str()
    }

    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, ModuleResult> {
        async move {
            // Modules may panic while building their future, so the call itself runs inside.
            let outcome = AssertUnwindSafe(async { next.run(&mut *context).await })
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(error)) if error.is_cancellation() => {
                    debug!(message = "Request was canceled.", module = self.name());
                    Ok(ClusterResult::canceled(context.request().clone()))
                }
                Ok(Err(error)) => {
                    error!(
                        message = "Unexpected error while sending request.",
                        module = self.name(),
                        url = %context.request().url(),
                        %error,
                    );
                    Ok(ClusterResult::unexpected_exception(context.request().clone()))
                }
                Err(panic) => {
                    error!(
                        message = "Request pipeline panicked.",
                        module = self.name(),
                        url = %context.request().url(),
                        panic = panic_message(panic.as_ref()),
                    );
                    Ok(ClusterResult::unexpected_exception(context.request().clone()))
                }
            }
        }
        .boxed()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}
