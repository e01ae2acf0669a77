//! Budget-aware retries of calls that exhausted every replica.

mod policy;
mod strategy;

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::ClusterError;
use crate::internal_event::{RequestRetryScheduled, emit};
use crate::model::{ClusterResultStatus, RequestContext};
use crate::modules::{ModuleResult, Next, RequestModule};

pub use policy::{AlwaysRetryPolicy, NeverRetryPolicy, RetryOnStatusCodesPolicy, RetryPolicy};
pub use strategy::{
    ConstantDelayRetryStrategy, ExponentialBackoffRetryStrategy, ImmediateRetryStrategy,
    JitterMode, LinearBackoffRetryStrategy, NoRetryStrategy, RetryStrategy,
};

/// Repeats the rest of the pipeline while it keeps ending in `ReplicasExhausted`.
///
/// Every other status is final. A retry also needs time left in the budget, a body that
/// can still be sent, a free attempt and the policy's consent, and its delay must fit in
/// the remaining budget. Errors from the rest of the chain are never swallowed.
#[derive(Clone)]
pub struct RetryModule {
    policy: Arc<dyn RetryPolicy>,
    strategy: Arc<dyn RetryStrategy>,
}

impl RetryModule {
    pub fn new(policy: Arc<dyn RetryPolicy>, strategy: Arc<dyn RetryStrategy>) -> Self {
        Self { policy, strategy }
    }
}

impl Default for RetryModule {
    fn default() -> Self {
        Self::new(Arc::new(NeverRetryPolicy), Arc::new(NoRetryStrategy))
    }
}

impl RequestModule for RetryModule {
    fn name(&self) -> &str {
        "RequestRetry"
    }

    fn execute<'a>(
        &'a self,
        context: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, ModuleResult> {
        async move {
            let attempts_count = self.strategy.attempts_count().max(1);
            let mut attempts_used = 0;

            loop {
                if context.is_canceled() {
                    return Err(ClusterError::Canceled);
                }

                context.set_attempt(attempts_used + 1);
                let result = next.run(context).await?;
                attempts_used += 1;

                if result.status() != ClusterResultStatus::ReplicasExhausted {
                    return Ok(result);
                }
                if context.budget().has_expired() {
                    debug!(message = "Not retrying: time budget expired.", attempts_used);
                    return Ok(result);
                }
                if context.request().has_consumed_body() {
                    debug!(message = "Not retrying: request body was already consumed.");
                    return Ok(result);
                }
                if attempts_used >= attempts_count {
                    debug!(message = "Not retrying: attempts exhausted.", attempts_used);
                    return Ok(result);
                }
                if !self.policy.need_to_retry(
                    context.request(),
                    context.parameters(),
                    result.replica_results(),
                ) {
                    debug!(message = "Not retrying: rejected by retry policy.", attempts_used);
                    return Ok(result);
                }

                let delay = self.strategy.next_delay(attempts_used, &result);
                if delay >= context.budget().remaining() {
                    debug!(
                        message = "Not retrying: delay exceeds the remaining budget.",
                        delay_ms = delay.as_millis(),
                    );
                    return Ok(result);
                }

                emit(RequestRetryScheduled {
                    attempt: attempts_used + 1,
                    delay,
                });
                tokio::select! {
                    _ = context.cancellation().cancelled() => return Err(ClusterError::Canceled),
                    _ = tokio::time::sleep(delay) => {}
                }
                result.dispose();
                context.reset_replica_results();
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use futures::{StreamExt, stream};

    use super::*;
    use crate::model::{ClusterResult, Request};
    use crate::test_utils::{ScriptedModule, context, run_module};

    struct CountingStrategy {
        attempts: usize,
        delay: Duration,
        queries: AtomicUsize,
    }

    impl CountingStrategy {
        fn new(attempts: usize, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                attempts,
                delay,
                queries: AtomicUsize::new(0),
            })
        }
    }

    impl RetryStrategy for CountingStrategy {
        fn attempts_count(&self) -> usize {
            self.attempts
        }

        fn next_delay(&self, _: usize, _: &ClusterResult) -> Duration {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.delay
        }
    }

    fn exhausted() -> Arc<ScriptedModule> {
        ScriptedModule::new(|context, _| {
            Ok(ClusterResult::new(
                ClusterResultStatus::ReplicasExhausted,
                Vec::new(),
                None,
                context.request().clone(),
            ))
        })
    }

    #[tokio::test(start_paused = true)]
    async fn retries_up_to_attempts_count() {
        let strategy = CountingStrategy::new(5, Duration::from_millis(10));
        let module = RetryModule::new(Arc::new(AlwaysRetryPolicy), strategy.clone());
        let terminal = exhausted();
        let mut context = context(Request::get("/".parse().unwrap()));

        let result = run_module(&module, terminal.clone(), &mut context).await.unwrap();

        assert_eq!(result.status(), ClusterResultStatus::ReplicasExhausted);
        assert_eq!(terminal.calls(), 5);
        assert_eq!(strategy.queries.load(Ordering::SeqCst), 4);
        assert_eq!(context.attempt(), 5);
    }

    #[tokio::test]
    async fn other_statuses_are_final() {
        let module = RetryModule::new(
            Arc::new(AlwaysRetryPolicy),
            Arc::new(ImmediateRetryStrategy::new(3)),
        );
        let terminal = ScriptedModule::new(|context, call| {
            let status = if call == 0 {
                ClusterResultStatus::ReplicasExhausted
            } else {
                ClusterResultStatus::Success
            };
            Ok(ClusterResult::new(status, Vec::new(), None, context.request().clone()))
        });
        let mut context = context(Request::get("/".parse().unwrap()));

        let result = run_module(&module, terminal.clone(), &mut context).await.unwrap();
        assert_eq!(result.status(), ClusterResultStatus::Success);
        assert_eq!(terminal.calls(), 2);
    }

    #[tokio::test]
    async fn consumed_body_stops_retries() {
        let module = RetryModule::new(
            Arc::new(AlwaysRetryPolicy),
            Arc::new(ImmediateRetryStrategy::new(5)),
        );
        let body = stream::iter(vec![Ok(Bytes::from_static(b"once"))]).boxed();
        let request = Request::post("/".parse().unwrap()).with_stream(body, None);
        if let crate::model::Content::Stream(stream) = request.content() {
            drop(stream.take().unwrap());
        }
        let terminal = exhausted();
        let mut context = context(request);

        run_module(&module, terminal.clone(), &mut context).await.unwrap();
        assert_eq!(terminal.calls(), 1);
    }

    #[tokio::test]
    async fn policy_and_default_stop_retries() {
        let terminal = exhausted();
        let mut ctx = context(Request::get("/".parse().unwrap()));
        let module = RetryModule::new(
            Arc::new(NeverRetryPolicy),
            Arc::new(ImmediateRetryStrategy::new(5)),
        );
        run_module(&module, terminal.clone(), &mut ctx).await.unwrap();
        assert_eq!(terminal.calls(), 1);

        let terminal = exhausted();
        let mut ctx = context(Request::get("/".parse().unwrap()));
        run_module(&RetryModule::default(), terminal.clone(), &mut ctx)
            .await
            .unwrap();
        assert_eq!(terminal.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_beyond_budget_stops_retries() {
        let strategy = CountingStrategy::new(5, Duration::from_secs(60));
        let module = RetryModule::new(Arc::new(AlwaysRetryPolicy), strategy.clone());
        let terminal = exhausted();
        let mut context = context(Request::get("/".parse().unwrap()));

        run_module(&module, terminal.clone(), &mut context).await.unwrap();
        assert_eq!(terminal.calls(), 1);
        assert_eq!(strategy.queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_delay_is_an_error() {
        let module = RetryModule::new(
            Arc::new(AlwaysRetryPolicy),
            Arc::new(ConstantDelayRetryStrategy::new(5, Duration::from_secs(1))),
        );
        let terminal = exhausted();
        let mut context = context(Request::get("/".parse().unwrap()));
        let token = context.cancellation().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            token.cancel();
        });

        let error = run_module(&module, terminal.clone(), &mut context)
            .await
            .unwrap_err();
        assert!(error.is_cancellation());
        assert_eq!(terminal.calls(), 1);
    }

    #[tokio::test]
    async fn results_are_reset_between_attempts() {
        let module = RetryModule::new(
            Arc::new(AlwaysRetryPolicy),
            Arc::new(ImmediateRetryStrategy::new(3)),
        );
        let seen = Arc::new(AtomicUsize::new(0));
        let observed = seen.clone();
        let terminal = ScriptedModule::new(move |context, _| {
            observed.fetch_max(context.replica_results_count(), Ordering::SeqCst);
            context.add_replica_result(crate::model::ReplicaResult::new(
                "http://replica".parse().unwrap(),
                Arc::new(crate::model::Response::new(crate::model::ResponseCode::BAD_GATEWAY)),
                crate::model::ResponseVerdict::Reject,
                Duration::ZERO,
            ));
            Ok(ClusterResult::new(
                ClusterResultStatus::ReplicasExhausted,
                Vec::new(),
                None,
                context.request().clone(),
            ))
        });
        let mut context = context(Request::get("/".parse().unwrap()));

        run_module(&module, terminal.clone(), &mut context).await.unwrap();
        assert_eq!(terminal.calls(), 3);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
