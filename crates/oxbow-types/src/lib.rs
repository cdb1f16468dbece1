//! # oxbow-types
//!
//! Shared primitive types for the oxbow DHT:
//!
//! - [`Key`]: 256-bit node/content identifier with XOR distance arithmetic
//! - [`Distance`]: the XOR metric, totally ordered as a 256-bit unsigned integer
//! - [`PeerInfo`]: a peer's identifier and network address
//! - [`DhtConfig`]: tunable protocol parameters shared by every component

pub mod config;
pub mod key;
pub mod peer;

pub use config::DhtConfig;
pub use key::{Distance, Key, KEY_BITS, KEY_BYTES, KEY_WORDS};
pub use peer::PeerInfo;

/// Error types for key parsing.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeyError {
    /// The hex string does not have the expected length of 64 characters.
    #[error("invalid key length: expected 64 hex characters, got {len}")]
    InvalidLength { len: usize },

    /// The string contains non-hexadecimal characters.
    #[error("invalid hex: {0}")]
    InvalidHex(String),
}

/// Convenience result type for key operations.
pub type Result<T> = std::result::Result<T, KeyError>;
