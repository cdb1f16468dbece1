//! # oxbow-dht
//!
//! The data structures at the heart of an oxbow node:
//!
//! - [`MruCache`]: bounded recency-ordered map with age expiry
//! - [`RoutingTable`]: a binary tree of k-buckets keyed by shared prefix
//!   with the owner, with the Kademlia split policy
//! - [`ValueStore`]: the two-tier (cache + long-term) value store
//!
//! These are pure single-owner structures; the async component loops that
//! serialize access to them live in `oxbow-node`. Capacity refusals are
//! expressed as return values ([`AddOutcome`], evicted keys), never as
//! errors.

pub mod mru;
pub mod routing;
pub mod store;

pub use mru::MruCache;
pub use routing::{AddOutcome, RoutingTable};
pub use store::{StoreStats, ValueStore};
