//! The routing-table component loop.
//!
//! Owns the node's [`RoutingTable`] and serializes every access to it.
//! Newly inserted peers are reported on a bounded notification channel so
//! the refresh driver can look toward them; a full channel drops the
//! notification rather than stall the loop.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use oxbow_dht::RoutingTable;
use oxbow_types::{Key, PeerInfo};

use crate::context::NodeContext;

/// Requests served by the routing component.
pub enum RoutingCommand {
    /// Insert or refresh a peer.
    Add { peer: PeerInfo },
    /// Remove a peer by key.
    Remove { key: Key },
    /// Query the peers nearest a target.
    Nearest {
        target: Key,
        n: usize,
        only_closest: bool,
        reply: oneshot::Sender<Vec<PeerInfo>>,
    },
    /// Total number of routed peers.
    Count { reply: oneshot::Sender<usize> },
}

/// Run the routing loop until the inbox closes.
pub async fn run(
    ctx: NodeContext,
    mut inbox: mpsc::Receiver<RoutingCommand>,
    new_peers: mpsc::Sender<PeerInfo>,
) {
    let mut table = RoutingTable::new(ctx.owner_key(), ctx.config.k);
    while let Some(command) = inbox.recv().await {
        match command {
            RoutingCommand::Add { peer } => {
                let outcome = table.add(peer.clone());
                if outcome.is_new() {
                    debug!(peer = ?peer, total = table.count(), "peer added");
                    let _ = new_peers.try_send(peer);
                }
            }
            RoutingCommand::Remove { key } => {
                if table.remove(&key) {
                    debug!(key = %key, total = table.count(), "peer removed");
                }
            }
            RoutingCommand::Nearest {
                target,
                n,
                only_closest,
                reply,
            } => {
                let _ = reply.send(table.nearest(&target, n, only_closest));
            }
            RoutingCommand::Count { reply } => {
                let _ = reply.send(table.count());
            }
        }
    }
}
