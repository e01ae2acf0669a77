//! Internal telemetry. Every event records its metrics through the `metrics` facade and
//! logs one line under the `cluster_dispatch::stats` target.

use std::time::Duration;

use metrics::{counter, histogram};

use crate::model::{ClusterResultStatus, RequestPriority};

pub trait InternalEvent: Sized {
    fn emit(self);
}

pub fn emit(event: impl InternalEvent) {
    event.emit();
}

#[derive(Clone, Copy, Debug)]
pub struct ClusterRequestCompleted {
    pub status: ClusterResultStatus,
    pub elapsed: Duration,
    pub replicas: usize,
}

impl InternalEvent for ClusterRequestCompleted {
    fn emit(self) {
        counter!("cluster_requests_total", "status" => self.status.as_str()).increment(1);
        histogram!("cluster_request_duration_seconds").record(self.elapsed);
        trace!(
            target: "cluster_dispatch::stats",
            status = %self.status,
            elapsed_ms = self.elapsed.as_millis(),
            replicas = self.replicas,
            "Request completed"
        );
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RequestThrottled<'a> {
    pub storage_key: &'a str,
    pub priority: RequestPriority,
    pub probability: f64,
}

impl InternalEvent for RequestThrottled<'_> {
    fn emit(self) {
        counter!(
            "adaptive_throttling_rejects_total",
            "storage_key" => self.storage_key.to_string(),
            "priority" => self.priority.as_str()
        )
        .increment(1);
        debug!(
            target: "cluster_dispatch::stats",
            storage_key = self.storage_key,
            priority = self.priority.as_str(),
            probability = self.probability,
            "Request throttled"
        );
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ReplicaBudgetExceeded<'a> {
    pub storage_key: &'a str,
    pub ratio: f64,
}

impl InternalEvent for ReplicaBudgetExceeded<'_> {
    fn emit(self) {
        counter!(
            "replica_budget_exceeded_total",
            "storage_key" => self.storage_key.to_string()
        )
        .increment(1);
        debug!(
            target: "cluster_dispatch::stats",
            storage_key = self.storage_key,
            ratio = self.ratio,
            "Replica budget exceeded, limiting call to one replica"
        );
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RequestRetryScheduled {
    pub attempt: usize,
    pub delay: Duration,
}

impl InternalEvent for RequestRetryScheduled {
    fn emit(self) {
        counter!("request_retries_total").increment(1);
        histogram!("request_retry_delay_seconds").record(self.delay);
        debug!(
            target: "cluster_dispatch::stats",
            attempt = self.attempt,
            delay_ms = self.delay.as_millis(),
            "Retry scheduled"
        );
    }
}
