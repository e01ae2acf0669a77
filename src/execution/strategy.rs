use std::time::Duration;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use http::Uri;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::sender::RequestSender;
use crate::error::ClusterError;
use crate::model::{Request, RequestParameters, TimeBudget};

/// Decides how many replicas are contacted, when, and with which timeout.
///
/// Every strategy stops as soon as one replica result is accepted. Results are recorded
/// by the sender, so the strategy itself returns nothing but cancellation.
pub trait RequestStrategy: Send + Sync + 'static {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    #[allow(clippy::too_many_arguments)]
    fn send<'a>(
        &'a self,
        request: &'a Request,
        parameters: &'a RequestParameters,
        sender: &'a dyn RequestSender,
        budget: &'a TimeBudget,
        replicas: &'a [Uri],
        replicas_count: usize,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), ClusterError>>;
}

/// One replica at a time. Each attempt gets an equal share of the remaining budget
/// across the replicas not tried yet.
#[derive(Clone, Copy, Debug, Default)]
pub struct SequentialRequestStrategy;

impl RequestStrategy for SequentialRequestStrategy {
    fn name(&self) -> &str {
        "sequential"
    }

    fn send<'a>(
        &'a self,
        request: &'a Request,
        parameters: &'a RequestParameters,
        sender: &'a dyn RequestSender,
        budget: &'a TimeBudget,
        replicas: &'a [Uri],
        replicas_count: usize,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), ClusterError>> {
        Box::pin(async move {
            for (index, replica) in replicas.iter().enumerate() {
                if cancellation.is_cancelled() {
                    return Err(ClusterError::Canceled);
                }
                if budget.has_expired() {
                    break;
                }

                let left = replicas_count.saturating_sub(index).max(1);
                let timeout = budget.remaining() / u32::try_from(left).unwrap_or(u32::MAX);
                let result = sender
                    .send_to_replica(
                        replica,
                        request,
                        parameters.connection_timeout(),
                        timeout,
                        cancellation,
                    )
                    .await?;
                if result.is_accepted() {
                    break;
                }
            }
            Ok(())
        })
    }
}

/// Up to `parallelism` replicas in flight, each with the whole remaining budget. A
/// finished, unaccepted attempt frees its slot for the next replica.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ParallelRequestStrategy {
    parallelism: usize,
}

impl ParallelRequestStrategy {
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }
}

impl RequestStrategy for ParallelRequestStrategy {
    fn name(&self) -> &str {
        "parallel"
    }

    fn send<'a>(
        &'a self,
        request: &'a Request,
        parameters: &'a RequestParameters,
        sender: &'a dyn RequestSender,
        budget: &'a TimeBudget,
        replicas: &'a [Uri],
        _replicas_count: usize,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), ClusterError>> {
        Box::pin(async move {
            let launch = move |replica: &'a Uri| {
                sender.send_to_replica(
                    replica,
                    request,
                    parameters.connection_timeout(),
                    budget.remaining(),
                    cancellation,
                )
            };

            let mut remaining = replicas.iter();
            let mut pending: FuturesUnordered<_> =
                remaining.by_ref().take(self.parallelism).map(launch).collect();

            while let Some(outcome) = pending.next().await {
                if outcome?.is_accepted() {
                    return Ok(());
                }
                if budget.has_expired() {
                    break;
                }
                if let Some(replica) = remaining.next() {
                    pending.push(launch(replica));
                }
            }
            Ok(())
        })
    }
}

/// Starts with one replica and forks to the next one every `fork_delay` without an
/// answer, keeping at most `maximum_parallelism` attempts in flight. A rejected attempt
/// is replaced right away.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ForkingRequestStrategy {
    fork_delay: Duration,
    maximum_parallelism: usize,
}

impl ForkingRequestStrategy {
    pub fn new(fork_delay: Duration, maximum_parallelism: usize) -> Self {
        Self {
            fork_delay,
            maximum_parallelism: maximum_parallelism.max(1),
        }
    }

    pub fn fork_delay(&self) -> Duration {
        self.fork_delay
    }

    pub fn maximum_parallelism(&self) -> usize {
        self.maximum_parallelism
    }
}

impl RequestStrategy for ForkingRequestStrategy {
    fn name(&self) -> &str {
        "forking"
    }

    fn send<'a>(
        &'a self,
        request: &'a Request,
        parameters: &'a RequestParameters,
        sender: &'a dyn RequestSender,
        budget: &'a TimeBudget,
        replicas: &'a [Uri],
        _replicas_count: usize,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), ClusterError>> {
        Box::pin(async move {
            let launch = move |replica: &'a Uri| {
                sender.send_to_replica(
                    replica,
                    request,
                    parameters.connection_timeout(),
                    budget.remaining(),
                    cancellation,
                )
            };

            let mut remaining = replicas.iter();
            let mut pending = FuturesUnordered::new();

            loop {
                if pending.is_empty() {
                    match remaining.next() {
                        Some(replica) => pending.push(launch(replica)),
                        None => break,
                    }
                }

                let can_fork =
                    pending.len() < self.maximum_parallelism && remaining.len() > 0;
                let fork_delay = self.fork_delay.min(budget.remaining());

                tokio::select! {
                    outcome = pending.next() => {
                        let Some(outcome) = outcome else { continue };
                        if outcome?.is_accepted() {
                            return Ok(());
                        }
                        if budget.has_expired() {
                            break;
                        }
                        if let Some(replica) = remaining.next() {
                            pending.push(launch(replica));
                        }
                    }
                    _ = tokio::time::sleep(fork_delay), if can_fork => {
                        if let Some(replica) = remaining.next() {
                            debug!(message = "Forking request.", %replica, in_flight = pending.len());
                            pending.push(launch(replica));
                        }
                    }
                    _ = cancellation.cancelled() => return Err(ClusterError::Canceled),
                }
            }
            Ok(())
        })
    }
}
