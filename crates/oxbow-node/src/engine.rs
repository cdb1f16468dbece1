//! Iterative closest-nodes lookup engine.
//!
//! [`visit_closest`] realises the Kademlia iterative search: starting from
//! the routing table's nearest peers, each round queries the working set in
//! distance order with parallelism alpha, merges every learned peer into
//! the next round's candidates, and stops when enough successes have
//! accumulated, a round teaches nothing new, or the candidate space is
//! exhausted. Round participants race to update shared state from
//! different peer replies, so it lives under a local mutex.
//!
//! Three drivers share the engine: [`put`], [`get`] and [`refresh`].

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinSet;
use tracing::debug;

use oxbow_types::{Distance, Key, PeerInfo};
use oxbow_wire::{Operation, RpcResponse};

use crate::broker::BrokerCommand;
use crate::context::NodeContext;
use crate::store::StoreCommand;

/// What a lookup produced.
pub struct LookupOutcome {
    /// Successful responses, at most `need_successes`-ish (a final round's
    /// stragglers may push slightly past the target).
    pub responses: Vec<RpcResponse>,
    /// Number of distinct peers queried.
    pub visited: usize,
}

/// Result of a PUT.
pub struct PutOutcome {
    /// The content key the value is stored under.
    pub key: Key,
    /// Number of peers (the owner included) that acknowledged the STORE.
    pub stored: usize,
    /// Number of distinct peers queried.
    pub visited: usize,
}

/// Result of a GET.
pub struct GetOutcome {
    /// The value, if any peer (or the local store) had it.
    pub data: Option<Vec<u8>>,
    /// Number of distinct peers queried.
    pub visited: usize,
}

struct LookupState {
    used: HashSet<Key>,
    successes: Vec<RpcResponse>,
    new_candidates: Vec<PeerInfo>,
    /// Smallest distance of any peer actually queried; FIND_VALUE refuses
    /// to regress past it.
    closest_tried: Option<Distance>,
}

/// Drive an iterative lookup toward `target`.
///
/// `fanout` sizes the initial candidate set taken from the routing table;
/// `include_self` additionally seeds the owner, whose queries travel the
/// broker's self-short-circuit (used by PUT so a node stores its own
/// values).
pub async fn visit_closest(
    ctx: &NodeContext,
    target: Key,
    fanout: usize,
    need_successes: usize,
    operation: Operation,
    data: Option<Vec<u8>>,
    include_self: bool,
) -> LookupOutcome {
    let alpha = ctx.config.alpha.max(1);
    let mut candidates = ctx.nearest(target, fanout, false).await;
    if include_self {
        candidates.push(ctx.owner.clone());
    }
    let state = Arc::new(Mutex::new(LookupState {
        used: HashSet::new(),
        successes: Vec::new(),
        new_candidates: Vec::new(),
        closest_tried: None,
    }));

    loop {
        // Build this round's query set: deduplicated, unqueried, and for
        // FIND_VALUE no farther than the closest peer already tried.
        let round = {
            let state = state.lock().await;
            let mut round: Vec<PeerInfo> = Vec::new();
            for peer in candidates.drain(..) {
                let Some(key) = peer.key else { continue };
                if state.used.contains(&key) {
                    continue;
                }
                if round.iter().any(|p| p.key == Some(key)) {
                    continue;
                }
                if operation == Operation::FindValue {
                    if let Some(limit) = state.closest_tried {
                        if target.distance(&key) > limit {
                            continue;
                        }
                    }
                }
                round.push(peer);
            }
            round.sort_by_key(|p| p.key.map(|k| target.distance(&k)));
            round
        };
        if round.is_empty() {
            break;
        }

        let mut reached = false;
        for chunk in round.chunks(alpha) {
            let mut queries = JoinSet::new();
            for peer in chunk {
                let peer = peer.clone();
                if let Some(key) = peer.key {
                    state.lock().await.used.insert(key);
                }
                queries.spawn(query_peer(
                    ctx.clone(),
                    state.clone(),
                    target,
                    operation,
                    data.clone(),
                    peer,
                ));
            }
            while queries.join_next().await.is_some() {}
            if state.lock().await.successes.len() >= need_successes {
                reached = true;
                break;
            }
        }
        if reached {
            break;
        }

        let mut state = state.lock().await;
        if state.new_candidates.is_empty() {
            break;
        }
        candidates = std::mem::take(&mut state.new_candidates);
    }

    let mut state = state.lock().await;
    LookupOutcome {
        responses: std::mem::take(&mut state.successes),
        visited: state.used.len(),
    }
}

async fn query_peer(
    ctx: NodeContext,
    state: Arc<Mutex<LookupState>>,
    target: Key,
    operation: Operation,
    data: Option<Vec<u8>>,
    peer: PeerInfo,
) {
    let (reply, rx) = oneshot::channel();
    let sent = ctx
        .broker
        .send(BrokerCommand::Send {
            peer: peer.clone(),
            operation,
            target,
            data,
            reply,
        })
        .await;
    if sent.is_err() {
        return;
    }
    match rx.await {
        Ok(Ok(response)) => {
            let mut state = state.lock().await;
            if operation == Operation::FindValue {
                if let Some(key) = peer.key {
                    let distance = target.distance(&key);
                    if state.closest_tried.map_or(true, |current| distance < current) {
                        state.closest_tried = Some(distance);
                    }
                }
            }
            for candidate in &response.peers {
                let Some(key) = candidate.key else { continue };
                if state.used.contains(&key) {
                    continue;
                }
                if state.new_candidates.iter().any(|p| p.key == Some(key)) {
                    continue;
                }
                state.new_candidates.push(candidate.clone());
            }
            if response.success {
                state.successes.push(response);
            }
        }
        Ok(Err(error)) => debug!(peer = ?peer, error = %error, "lookup query failed"),
        Err(_) => debug!(peer = ?peer, "lookup reply dropped"),
    }
}

/// Store a value on the k peers closest to its content key.
///
/// The owner is seeded into the candidate set, so a node with an empty
/// routing table still stores its own value through the broker's
/// self-short-circuit.
pub async fn put(ctx: &NodeContext, data: Vec<u8>) -> PutOutcome {
    let key = Key::compute(&data);
    let outcome = visit_closest(
        ctx,
        key,
        ctx.config.k,
        ctx.config.k,
        Operation::Store,
        Some(data),
        true,
    )
    .await;
    debug!(key = %key, stored = outcome.responses.len(), visited = outcome.visited, "put complete");
    PutOutcome {
        key,
        stored: outcome.responses.len(),
        visited: outcome.visited,
    }
}

/// Fetch a value by key: the local store first, then FIND_VALUE toward the
/// key until the first data-bearing success, which is re-inserted locally.
pub async fn get(ctx: &NodeContext, key: Key) -> GetOutcome {
    let (reply, rx) = oneshot::channel();
    if ctx
        .store
        .send(StoreCommand::Get { key, reply })
        .await
        .is_ok()
    {
        if let Ok(Some(data)) = rx.await {
            return GetOutcome {
                data: Some(data),
                visited: 0,
            };
        }
    }

    let outcome = visit_closest(
        ctx,
        key,
        ctx.config.k,
        1,
        Operation::FindValue,
        None,
        false,
    )
    .await;
    let data = outcome.responses.into_iter().find_map(|r| r.data);
    if let Some(data) = &data {
        let _ = ctx
            .store
            .send(StoreCommand::Put {
                key,
                data: data.clone(),
                reply: None,
            })
            .await;
    }
    GetOutcome {
        data,
        visited: outcome.visited,
    }
}

/// Walk the network toward a key to exercise and populate the routing
/// table. With no target, the owner's own key is refreshed.
pub async fn refresh(ctx: &NodeContext, target: Option<Key>) -> usize {
    let (target, fanout) = match target {
        Some(key) => (key, 1),
        None => (ctx.owner_key(), ctx.config.k),
    };
    let outcome = visit_closest(ctx, target, fanout, 1, Operation::FindPeer, None, false).await;
    outcome.visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use tokio::sync::mpsc;

    use oxbow_types::DhtConfig;

    use crate::handler::InboundRequest;
    use crate::routing::RoutingCommand;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    /// A context whose routing table knows `seeds` and whose broker
    /// answers every query with success and the fixed `learned` peer list.
    fn stub_context(seeds: Vec<PeerInfo>, learned: Vec<PeerInfo>) -> NodeContext {
        let owner = PeerInfo::new(Key::compute(b"engine-owner"), addr(1));
        let (routing_tx, mut routing_rx) = mpsc::channel(64);
        let (store_tx, mut store_rx) = mpsc::channel::<StoreCommand>(64);
        let (broker_tx, mut broker_rx) = mpsc::channel(64);
        let (handler_tx, _handler_rx) = mpsc::channel::<InboundRequest>(8);

        tokio::spawn(async move {
            while let Some(command) = routing_rx.recv().await {
                if let RoutingCommand::Nearest { n, reply, .. } = command {
                    let mut peers = seeds.clone();
                    peers.truncate(n);
                    let _ = reply.send(peers);
                }
            }
        });
        tokio::spawn(async move { while store_rx.recv().await.is_some() {} });
        tokio::spawn(async move {
            while let Some(command) = broker_rx.recv().await {
                if let BrokerCommand::Send { peer, reply, .. } = command {
                    let _ = reply.send(Ok(RpcResponse {
                        request_id: 0,
                        sender: peer,
                        success: true,
                        data: None,
                        peers: learned.clone(),
                        error: None,
                    }));
                }
            }
        });

        NodeContext {
            owner,
            config: Arc::new(DhtConfig::default()),
            routing: routing_tx,
            store: store_tx,
            broker: broker_tx,
            handler: handler_tx,
        }
    }

    #[tokio::test]
    async fn test_empty_table_visits_nothing() {
        let ctx = stub_context(Vec::new(), Vec::new());
        let outcome = visit_closest(
            &ctx,
            Key::compute(b"t"),
            20,
            1,
            Operation::FindPeer,
            None,
            false,
        )
        .await;
        assert_eq!(outcome.visited, 0);
        assert!(outcome.responses.is_empty());
    }

    #[tokio::test]
    async fn test_each_peer_queried_once() {
        // Every response repeats the full peer set; the used set must keep
        // the lookup from querying anyone twice.
        let peers: Vec<PeerInfo> = (0..4u16)
            .map(|i| PeerInfo::new(Key::compute(&i.to_be_bytes()), addr(100 + i)))
            .collect();
        let ctx = stub_context(peers.clone(), peers.clone());
        let outcome = visit_closest(
            &ctx,
            Key::compute(b"t"),
            peers.len(),
            usize::MAX,
            Operation::FindPeer,
            None,
            false,
        )
        .await;
        assert_eq!(outcome.visited, 4);
        assert_eq!(outcome.responses.len(), 4);
    }

    #[tokio::test]
    async fn test_find_value_never_regresses() {
        // The near peer teaches a farther one; FIND_VALUE must not walk
        // outward past the closest peer already tried.
        let target = Key::ZERO;
        let near = PeerInfo::new(Key::from_words([0, 0, 0, 1]), addr(10));
        let farther = PeerInfo::new(Key::from_words([0, 0, 0, 8]), addr(11));
        let ctx = stub_context(vec![near], vec![farther]);
        let outcome = visit_closest(&ctx, target, 4, 2, Operation::FindValue, None, false).await;
        assert_eq!(outcome.visited, 1);
    }

    #[tokio::test]
    async fn test_include_self_reaches_the_owner() {
        let ctx = stub_context(Vec::new(), Vec::new());
        let outcome =
            visit_closest(&ctx, Key::compute(b"t"), 4, 1, Operation::Store, None, true).await;
        assert_eq!(outcome.visited, 1);
        assert_eq!(outcome.responses.len(), 1);
    }
}
