//! # oxbow-node
//!
//! A peer node of the oxbow DHT: a content-addressed key/value store over
//! TCP in which each node is responsible for the values whose keys are
//! near its own key in XOR distance.
//!
//! Each node is a set of cooperating tasks, one per component, exchanging
//! typed messages over a node-scoped [`context::NodeContext`]:
//!
//! ```text
//! inbound TCP -> session -> remote handler -> routing table, value store
//! local PUT/GET -> lookup engine -> broker -> sessions -> remote peers
//! ```
//!
//! [`Node`] is the supervisor; the [`console`] drives any number of nodes
//! in one process.

pub mod bootstrap;
pub mod broker;
pub mod config;
pub mod console;
pub mod context;
pub mod engine;
pub mod error;
pub mod handler;
pub mod node;
pub mod routing;
pub mod session;
pub mod store;

pub use config::NodeConfig;
pub use console::Console;
pub use error::{NodeError, Result};
pub use node::{Node, NodeStats, PeerOp, PeerRequest, PeerResponse};
