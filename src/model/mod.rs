//! Per-call context, immutable request/response containers and results.

mod budget;
mod context;
mod parameters;
mod request;
mod response;
mod result;

pub use budget::TimeBudget;
pub use context::RequestContext;
pub use parameters::{RequestParameters, RequestPriority};
pub use request::{BodyStream, Content, ContentProducer, ProducerContent, Request, StreamContent};
pub use response::{Response, ResponseCode, ResponseStream, Trailers};
pub use result::{ClusterResult, ClusterResultStatus, ReplicaResult, ResponseVerdict};
