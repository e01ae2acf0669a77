use snafu::Snafu;

use crate::Error as CrateError;

/// Errors flowing through the request pipeline.
///
/// Modules and collaborators return these; the error-catching modules turn them into
/// [`ClusterResultStatus::UnexpectedException`](crate::ClusterResultStatus) or
/// [`ClusterResultStatus::Canceled`](crate::ClusterResultStatus) before they reach the
/// caller of [`ClusterClient::send`](crate::ClusterClient::send).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ClusterError {
    /// The call's cancellation token was signaled.
    #[snafu(display("Request was canceled"))]
    Canceled,

    /// A single-use request body stream was read a second time.
    #[snafu(display("Request body stream has already been consumed and cannot be reused"))]
    StreamReused,

    /// A single-use content producer was asked to produce a second time.
    #[snafu(display("Request content producer has already been used and cannot be reused"))]
    ContentReused,

    /// The transport failed in a way it could not express as a response code.
    #[snafu(display("Transport error: {}", source))]
    Transport { source: CrateError },

    /// A module or collaborator failed unexpectedly.
    #[snafu(display("Module error: {}", source))]
    Module { source: CrateError },

    /// The last module in the pipeline called `next`.
    #[snafu(display("Request pipeline ended without producing a result"))]
    PipelineExhausted,
}

impl ClusterError {
    /// Whether this error belongs to the cancellation family.
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, ClusterError::Canceled)
    }

    /// Whether this error is a single-use body reuse violation.
    pub const fn is_reuse_violation(&self) -> bool {
        matches!(self, ClusterError::StreamReused | ClusterError::ContentReused)
    }
}

/// Errors raised while constructing a client or one of its modules. These are fatal.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigurationError {
    #[snafu(display("A transport must be configured"))]
    MissingTransport,

    #[snafu(display("A cluster provider must be configured"))]
    MissingClusterProvider,

    #[snafu(display("Invalid value for `{}`: {}", option, reason))]
    InvalidOption {
        option: &'static str,
        reason: String,
    },

    #[snafu(display("Failed to build the HTTP client: {}", source))]
    HttpClient { source: reqwest::Error },

    #[snafu(display("Invalid replica address '{}': {}", address, source))]
    InvalidReplica {
        address: String,
        source: http::uri::InvalidUri,
    },
}
