//! The wire transport collaborator.

mod reqwest_integration;
mod tower_transport;

use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::ClusterError;
use crate::model::{Request, Response};

pub use reqwest_integration::ReqwestService;
pub use tower_transport::TowerTransport;

bitflags::bitflags! {
    /// Features a transport supports; consulted by request validation.
    pub struct TransportCapabilities: u32 {
        const REQUEST_STREAMING = 0b0001;
        const REQUEST_COMPOSITE_BODY = 0b0010;
        const RESPONSE_STREAMING = 0b0100;
    }
}

/// Sends one request to one absolute URL.
///
/// Failures of the exchange itself (connect, send, receive, timeout) are expected to be
/// reported as responses with client-side codes such as
/// [`ResponseCode::CONNECT_FAILURE`](crate::ResponseCode::CONNECT_FAILURE). `Err` is for
/// cancellation, single-use body violations and failures with no response equivalent.
pub trait Transport: Send + Sync + 'static {
    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities::empty()
    }

    /// `connection_timeout` bounds connection setup only. Transports whose client fixes
    /// it at construction may ignore it; [`TowerTransport::reqwest_with_connect_timeout`]
    /// is the reqwest way to set it.
    fn send<'a>(
        &'a self,
        request: &'a Request,
        connection_timeout: Option<Duration>,
        timeout: Duration,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Response, ClusterError>>;
}
