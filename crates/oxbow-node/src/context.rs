//! Node-scoped channel registry.
//!
//! Every component of a node receives a [`NodeContext`]: the owner's
//! identity, the shared configuration, and one sender per component inbox.
//! The context is created once by the supervisor and cloned everywhere, so
//! several nodes can coexist in one process without any global state.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use oxbow_types::{DhtConfig, Key, PeerInfo};

use crate::broker::BrokerCommand;
use crate::handler::InboundRequest;
use crate::routing::RoutingCommand;
use crate::store::StoreCommand;

/// Handles to one node's component inboxes.
#[derive(Clone)]
pub struct NodeContext {
    /// The local node's identity (key and advertised address).
    pub owner: PeerInfo,
    /// Shared protocol parameters.
    pub config: Arc<DhtConfig>,
    /// Routing table inbox.
    pub routing: mpsc::Sender<RoutingCommand>,
    /// Value store inbox.
    pub store: mpsc::Sender<StoreCommand>,
    /// Connection broker inbox.
    pub broker: mpsc::Sender<BrokerCommand>,
    /// Remote handler inbox.
    pub handler: mpsc::Sender<InboundRequest>,
}

impl NodeContext {
    /// The owner's key.
    ///
    /// The supervisor always constructs the owner with a key; the fallback
    /// only guards against a malformed hand-built context.
    pub fn owner_key(&self) -> Key {
        self.owner.key.unwrap_or(Key::ZERO)
    }

    /// Query the routing table for the peers nearest `target`.
    ///
    /// Returns an empty list when the routing component is gone (node
    /// shutting down).
    pub async fn nearest(&self, target: Key, n: usize, only_closest: bool) -> Vec<PeerInfo> {
        let (reply, rx) = oneshot::channel();
        let sent = self
            .routing
            .send(RoutingCommand::Nearest {
                target,
                n,
                only_closest,
                reply,
            })
            .await;
        if sent.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Feed a peer into the routing table, best effort.
    pub async fn add_peer(&self, peer: PeerInfo) {
        let _ = self.routing.send(RoutingCommand::Add { peer }).await;
    }
}
