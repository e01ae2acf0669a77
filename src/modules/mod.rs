//! The request module chain.
//!
//! A [`RequestModule`] sees the call's [`RequestContext`] and a [`Next`] continuation
//! over the rest of the chain; it may run logic before and after `next`, or not call it
//! at all. [`Next::run`] checks the call's cancellation token before invoking each
//! module, so an already-canceled call produces a `Canceled` result without touching
//! any further module.

mod error_catching;
mod headers;
mod leak_prevention;
mod logging;
mod pipeline;
mod transformation;
mod validation;

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture};

use crate::error::ClusterError;
use crate::model::{ClusterResult, RequestContext};

pub use error_catching::ErrorCatchingModule;
pub use headers::{
    AuxiliaryHeadersModule, CLIENT_APPLICATION_HEADER, REQUEST_PRIORITY_HEADER,
    REQUEST_TIMEOUT_HEADER,
};
pub use leak_prevention::LeakPreventionModule;
pub use logging::{LoggingModule, LoggingOptions};
pub use pipeline::{ModuleAnchor, ModuleRelation, PipelineBuilder, RequestPipeline};
pub use transformation::{
    RequestTransform, RequestTransformationModule, ResponseTransform,
    ResponseTransformationModule,
};
pub use validation::{HttpMethodValidationModule, RequestValidationModule, TimeoutValidationModule};

pub type ModuleResult = Result<ClusterResult, ClusterError>;

/// One step of the request pipeline.
///
/// A single module instance serves every concurrent call of its client, so per-call
/// state belongs in the [`RequestContext`], never in module fields.
pub trait RequestModule: Send + Sync + 'static {
    /// Name used for relative insertion and diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, ModuleResult>;
}

/// The rest of the chain after the current module.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    modules: &'a [Arc<dyn RequestModule>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(modules: &'a [Arc<dyn RequestModule>]) -> Self {
        Self { modules }
    }

    /// Runs the remaining modules. Nothing runs if the call is already canceled.
    pub fn run<'b>(self, context: &'b mut RequestContext) -> BoxFuture<'b, ModuleResult>
    where
        'a: 'b,
    {
        if context.is_canceled() {
            let result = ClusterResult::canceled(context.request().clone());
            return future::ready(Ok(result)).boxed();
        }

        match self.modules.split_first() {
            Some((module, rest)) => module.execute(context, Next { modules: rest }),
            None => future::ready(Err(ClusterError::PipelineExhausted)).boxed(),
        }
    }

    /// Number of modules left in the chain.
    pub fn remaining(&self) -> usize {
        self.modules.len()
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// Built-in modules, listed in their default pipeline order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuiltInModule {
    LeakPrevention,
    GlobalErrorCatching,
    RequestTransformation,
    AuxiliaryHeaders,
    Logging,
    ResponseTransformation,
    ErrorCatching,
    RequestValidation,
    HttpMethodValidation,
    TimeoutValidation,
    RequestRetry,
    AdaptiveThrottling,
    AbsoluteUrlSender,
    ReplicaBudgeting,
    RequestExecution,
}

impl BuiltInModule {
    pub const DEFAULT_ORDER: [BuiltInModule; 15] = [
        BuiltInModule::LeakPrevention,
        BuiltInModule::GlobalErrorCatching,
        BuiltInModule::RequestTransformation,
        BuiltInModule::AuxiliaryHeaders,
        BuiltInModule::Logging,
        BuiltInModule::ResponseTransformation,
        BuiltInModule::ErrorCatching,
        BuiltInModule::RequestValidation,
        BuiltInModule::HttpMethodValidation,
        BuiltInModule::TimeoutValidation,
        BuiltInModule::RequestRetry,
        BuiltInModule::AdaptiveThrottling,
        BuiltInModule::AbsoluteUrlSender,
        BuiltInModule::ReplicaBudgeting,
        BuiltInModule::RequestExecution,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            BuiltInModule::LeakPrevention => "LeakPrevention",
            BuiltInModule::GlobalErrorCatching => "GlobalErrorCatching",
            BuiltInModule::RequestTransformation => "RequestTransformation",
            BuiltInModule::AuxiliaryHeaders => "AuxiliaryHeaders",
            BuiltInModule::Logging => "Logging",
            BuiltInModule::ResponseTransformation => "ResponseTransformation",
            BuiltInModule::ErrorCatching => "ErrorCatching",
            BuiltInModule::RequestValidation => "RequestValidation",
            BuiltInModule::HttpMethodValidation => "HttpMethodValidation",
            BuiltInModule::TimeoutValidation => "TimeoutValidation",
            BuiltInModule::RequestRetry => "RequestRetry",
            BuiltInModule::AdaptiveThrottling => "AdaptiveThrottling",
            BuiltInModule::AbsoluteUrlSender => "AbsoluteUrlSender",
            BuiltInModule::ReplicaBudgeting => "ReplicaBudgeting",
            BuiltInModule::RequestExecution => "RequestExecution",
        }
    }
}

impl fmt::Display for BuiltInModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
