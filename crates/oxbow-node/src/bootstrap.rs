//! Discovery and refresh drivers.
//!
//! Joining the network is a FIND_PEER for the owner's own key against each
//! seed endpoint; seed failures are logged and never fatal. Two background
//! drivers keep the routing table warm afterwards: a periodic self-refresh
//! and a lookup toward every newly learned peer.

use std::net::SocketAddr;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use oxbow_types::PeerInfo;
use oxbow_wire::Operation;

use crate::broker::BrokerCommand;
use crate::context::NodeContext;
use crate::engine;

/// Contact each seed endpoint with a FIND_PEER for the owner's key.
///
/// The owner's own address is skipped. Contacts run in the background;
/// this returns once they are dispatched.
pub fn contact_seeds(ctx: &NodeContext, seeds: &[SocketAddr]) {
    for addr in seeds {
        if *addr == ctx.owner.addr {
            continue;
        }
        let addr = *addr;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let (reply, rx) = oneshot::channel();
            let sent = ctx
                .broker
                .send(BrokerCommand::Send {
                    peer: PeerInfo::unknown(addr),
                    operation: Operation::FindPeer,
                    target: ctx.owner_key(),
                    data: None,
                    reply,
                })
                .await;
            if sent.is_err() {
                return;
            }
            match rx.await {
                Ok(Ok(response)) => {
                    info!(seed = %addr, peers = response.peers.len(), "seed contacted");
                }
                Ok(Err(error)) => warn!(seed = %addr, error = %error, "seed contact failed"),
                Err(_) => warn!(seed = %addr, "seed contact dropped"),
            }
        });
    }
}

/// Spawn the periodic self-refresh driver.
pub fn spawn_refresh_timer(ctx: NodeContext) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ctx.config.refresh_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let visited = engine::refresh(&ctx, None).await;
            debug!(visited, "periodic self-refresh");
        }
    })
}

/// Spawn the driver that looks toward every peer newly added to the
/// routing table.
pub fn spawn_new_peer_refresh(
    ctx: NodeContext,
    mut new_peers: mpsc::Receiver<PeerInfo>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(peer) = new_peers.recv().await {
            let Some(key) = peer.key else { continue };
            let visited = engine::refresh(&ctx, Some(key)).await;
            debug!(peer = ?peer, visited, "refreshed toward new peer");
        }
    })
}
