//! The value-store component loop.
//!
//! Owns the node's [`ValueStore`]. Every PUT lands in the cache tier
//! immediately; long-term placement is evaluated off-loop because it needs
//! a routing query. A periodic driver sweeps expired values from both
//! tiers every third of the age limit.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use oxbow_dht::{StoreStats, ValueStore};
use oxbow_types::{Distance, Key};
use oxbow_wire::Operation;

use crate::broker::BrokerCommand;
use crate::context::NodeContext;

/// Requests served by the store component.
pub enum StoreCommand {
    /// Insert a value into the cache tier and evaluate long-term placement.
    Put {
        key: Key,
        data: Vec<u8>,
        reply: Option<oneshot::Sender<()>>,
    },
    /// Place a value in the long-term tier. Internal: sent by the placement
    /// evaluation spawned from `Put`.
    Promote {
        key: Key,
        data: Vec<u8>,
        primary: bool,
    },
    /// Look up a value.
    Get {
        key: Key,
        reply: oneshot::Sender<Option<Vec<u8>>>,
    },
    /// Sweep expired values from both tiers.
    Expire,
    /// Current counters.
    Stats { reply: oneshot::Sender<StoreStats> },
}

/// Run the store loop until the inbox closes.
pub async fn run(ctx: NodeContext, mut inbox: mpsc::Receiver<StoreCommand>) {
    let mut store = ValueStore::new(ctx.config.store_size, ctx.config.max_age());
    while let Some(command) = inbox.recv().await {
        match command {
            StoreCommand::Put { key, data, reply } => {
                store.insert_cache(key, data.clone());
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
                tokio::spawn(evaluate_placement(ctx.clone(), key, data));
            }
            StoreCommand::Promote { key, data, primary } => {
                debug!(key = %key, primary, "value promoted to long-term tier");
                store.promote(key, data.clone(), primary);
                if primary && ctx.config.broadcast_replicas {
                    tokio::spawn(broadcast_to_replicas(ctx.clone(), key, data));
                }
            }
            StoreCommand::Get { key, reply } => {
                let _ = reply.send(store.get(&key).map(|data| data.to_vec()));
            }
            StoreCommand::Expire => {
                store.expire();
            }
            StoreCommand::Stats { reply } => {
                let _ = reply.send(store.stats());
            }
        }
    }
}

/// Decide whether the owner belongs among the k closest known peers to the
/// key, and if so promote the value.
///
/// The routing table never contains the owner itself, so the test is
/// against the distances of the returned set: the owner qualifies when the
/// set has room below k or the owner is strictly closer than its worst
/// member, and is primary when strictly closer than its best member.
async fn evaluate_placement(ctx: NodeContext, key: Key, data: Vec<u8>) {
    let closest = ctx.nearest(key, ctx.config.k, true).await;
    let own_distance = key.distance(&ctx.owner_key());
    let distances: Vec<Distance> = closest
        .iter()
        .filter_map(|p| p.key)
        .map(|pk| key.distance(&pk))
        .collect();

    let qualifies = distances.len() < ctx.config.k
        || distances.last().map_or(true, |worst| own_distance < *worst);
    if !qualifies {
        return;
    }
    let primary = distances.first().map_or(true, |best| own_distance < *best);
    let _ = ctx
        .store
        .send(StoreCommand::Promote { key, data, primary })
        .await;
}

/// Re-broadcast a value this node is primary for to the remaining closest
/// peers. Gated behind `DhtConfig::broadcast_replicas`, which is off.
// TODO: deduplicate against the peer the value arrived from before this can
// be enabled by default; a STORE echoed back to its origin loops.
async fn broadcast_to_replicas(ctx: NodeContext, key: Key, data: Vec<u8>) {
    let replicas = ctx
        .nearest(key, ctx.config.k.saturating_sub(1), false)
        .await;
    debug!(key = %key, replicas = replicas.len(), "broadcasting to replicas");
    for peer in replicas {
        let (reply, rx) = oneshot::channel();
        let sent = ctx
            .broker
            .send(BrokerCommand::Send {
                peer,
                operation: Operation::Store,
                target: key,
                data: Some(data.clone()),
                reply,
            })
            .await;
        if sent.is_ok() {
            let _ = rx.await;
        }
    }
}

/// Spawn the periodic expiry driver: one `Expire` every `max_age / 3`.
pub fn spawn_expiry_driver(ctx: NodeContext) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = (ctx.config.max_age() / 3).max(Duration::from_millis(500));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if ctx.store.send(StoreCommand::Expire).await.is_err() {
                break;
            }
        }
    })
}
