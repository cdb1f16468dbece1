//! # oxbow-wire
//!
//! Wire protocol for oxbow peer sessions.
//!
//! Every byte stream between two peers carries a sequence of frames, each a
//! 4-byte big-endian length prefix followed by a CBOR-encoded [`Frame`]
//! envelope. A frame is either an [`RpcRequest`] or an [`RpcResponse`];
//! both directions of a session are multiplexed on the same stream and
//! matched by `request_id`.
//!
//! ```text
//! Application
//!     |
//!     v
//! Frame (messages.rs)     -- request/response envelope
//!     |
//!     v
//! CBOR (cbor.rs)          -- ciborium serialization
//!     |
//!     v
//! length prefix (framing.rs) over a TCP stream
//! ```

pub mod cbor;
pub mod framing;
pub mod messages;

pub use framing::{read_frame, write_frame, MAX_FRAME_LEN};
pub use messages::{Frame, Operation, RpcRequest, RpcResponse};

/// Error types for wire operations.
///
/// All variants carry strings so a single transport failure can be fanned
/// out to every request pending on the session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WireError {
    /// CBOR serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// CBOR deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Protocol violation (oversized frame, unknown operation tag, etc.).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Result type alias for wire operations.
pub type Result<T> = std::result::Result<T, WireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WireError::ProtocolViolation("bad tag".to_string());
        assert_eq!(err.to_string(), "protocol violation: bad tag");
    }
}
