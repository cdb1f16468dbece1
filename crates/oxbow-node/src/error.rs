//! Error types for node operations.

use std::time::Duration;

use oxbow_wire::WireError;

/// Errors surfaced by node components.
///
/// `Clone` so a single transport failure can be fanned out to every request
/// pending on a session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NodeError {
    /// Socket-level failure (connect, read, write).
    #[error("transport failure: {0}")]
    Transport(String),

    /// An outbound request exceeded its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The peer session terminated before the request completed.
    #[error("session closed")]
    SessionClosed,

    /// A component inbox has been retired.
    #[error("{0} component is unavailable")]
    ChannelClosed(&'static str),

    /// The caller supplied arguments the operation cannot act on.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The TCP listener could not be bound.
    #[error("bind failed: {0}")]
    Bind(String),

    /// The remote peer could not serve the request and sent a diagnostic.
    ///
    /// Distinct from a logical miss: a response with `success == false`
    /// and no diagnostic (value not found, empty candidate set) is not an
    /// error and is delivered as a response.
    #[error("remote failure: {0}")]
    Remote(String),
}

impl From<WireError> for NodeError {
    fn from(error: WireError) -> Self {
        NodeError::Transport(error.to_string())
    }
}

/// Result type alias for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
