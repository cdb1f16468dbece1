//! The connection broker: a bounded pool of peer sessions.
//!
//! Maps peer addresses to live sessions and peer keys to addresses. An MRU
//! list sized `max_connections` tracks recency of use; creating or touching
//! a session past the cap retires the least-recently-used one (closing it
//! and removing its peer from the routing table).
//!
//! Requests addressed to the owner — by key or by address — never touch a
//! socket: they are dispatched straight to the local remote handler.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use oxbow_dht::MruCache;
use oxbow_types::{Key, PeerInfo};
use oxbow_wire::{Operation, RpcRequest, RpcResponse};

use crate::context::NodeContext;
use crate::error::{NodeError, Result};
use crate::handler::InboundRequest;
use crate::routing::RoutingCommand;
use crate::session::{self, SessionHandle};

/// Requests served by the broker component.
pub enum BrokerCommand {
    /// Forward a request to a peer, creating the session if needed.
    Send {
        peer: PeerInfo,
        operation: Operation,
        target: Key,
        data: Option<Vec<u8>>,
        reply: oneshot::Sender<Result<RpcResponse>>,
    },
    /// Install a session for an identified peer.
    Register {
        peer: PeerInfo,
        session: SessionHandle,
        update_routing: bool,
    },
    /// Remove a dead session's mappings.
    Deregister {
        addr: SocketAddr,
        key: Option<Key>,
        session_id: u64,
        update_routing: bool,
    },
    /// Current counters.
    Stats { reply: oneshot::Sender<BrokerStats> },
    /// Close every session.
    Shutdown { reply: oneshot::Sender<()> },
}

/// Counters reported by the broker.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct BrokerStats {
    /// Live peer sessions.
    pub sessions: usize,
    /// Peers with a known key-to-address mapping.
    pub known_keys: usize,
}

/// Run the broker loop until the inbox closes.
pub async fn run(ctx: NodeContext, mut inbox: mpsc::Receiver<BrokerCommand>) {
    let mut broker = Broker {
        sessions: HashMap::new(),
        by_key: HashMap::new(),
        // Sessions age out by use, never by time.
        mru: MruCache::new(ctx.config.max_connections, Duration::MAX),
        ctx,
    };
    while let Some(command) = inbox.recv().await {
        match command {
            BrokerCommand::Send {
                peer,
                operation,
                target,
                data,
                reply,
            } => broker.send(peer, operation, target, data, reply).await,
            BrokerCommand::Register {
                peer,
                session,
                update_routing,
            } => broker.register(peer, session, update_routing).await,
            BrokerCommand::Deregister {
                addr,
                key,
                session_id,
                update_routing,
            } => broker.deregister(addr, key, session_id, update_routing).await,
            BrokerCommand::Stats { reply } => {
                let _ = reply.send(BrokerStats {
                    sessions: broker.sessions.len(),
                    known_keys: broker.by_key.len(),
                });
            }
            BrokerCommand::Shutdown { reply } => {
                for (_, session) in broker.sessions.drain() {
                    session.close();
                }
                broker.by_key.clear();
                let _ = reply.send(());
            }
        }
    }
}

struct Broker {
    sessions: HashMap<SocketAddr, SessionHandle>,
    by_key: HashMap<Key, SocketAddr>,
    mru: MruCache<SocketAddr, Option<Key>>,
    ctx: NodeContext,
}

impl Broker {
    async fn send(
        &mut self,
        peer: PeerInfo,
        operation: Operation,
        target: Key,
        data: Option<Vec<u8>>,
        reply: oneshot::Sender<Result<RpcResponse>>,
    ) {
        let owner = &self.ctx.owner;
        let to_self =
            peer.addr == owner.addr || (peer.key.is_some() && peer.key == owner.key);
        if to_self {
            // Requests for the owner never touch the network.
            let request = RpcRequest {
                request_id: 0,
                operation,
                sender: owner.clone(),
                target,
                data,
            };
            let handler = self.ctx.handler.clone();
            tokio::spawn(async move {
                let (respond, rx) = oneshot::channel();
                let result = if handler
                    .send(InboundRequest {
                        request,
                        reply: respond,
                    })
                    .await
                    .is_ok()
                {
                    rx.await
                        .map_err(|_| NodeError::ChannelClosed("handler"))
                        .and_then(session::reject_remote_failure)
                } else {
                    Err(NodeError::ChannelClosed("handler"))
                };
                let _ = reply.send(result);
            });
            return;
        }

        if let Some(evicted) = self.mru.add(peer.addr, peer.key) {
            self.retire(evicted, true).await;
        }
        let session = match self.sessions.get(&peer.addr) {
            Some(session) => session.clone(),
            None => {
                debug!(addr = %peer.addr, "opening session");
                let ctx = self.ctx.clone();
                let session = session::connect(peer.addr, ctx);
                self.sessions.insert(peer.addr, session.clone());
                session
            }
        };
        tokio::spawn(async move {
            let _ = reply.send(session.request(operation, target, data).await);
        });
    }

    async fn register(&mut self, peer: PeerInfo, session: SessionHandle, update_routing: bool) {
        match self.sessions.get(&peer.addr) {
            Some(existing) if existing.id() != session.id() => {
                // A live session already owns this address; the newcomer
                // keeps serving its own stream unmapped.
                debug!(addr = %peer.addr, "address already has a session");
            }
            _ => {
                self.sessions.insert(peer.addr, session);
            }
        }
        if let Some(key) = peer.key {
            self.by_key.insert(key, peer.addr);
        }
        if let Some(evicted) = self.mru.add(peer.addr, peer.key) {
            self.retire(evicted, true).await;
        }
        if update_routing {
            self.ctx.add_peer(peer).await;
        }
    }

    async fn deregister(
        &mut self,
        addr: SocketAddr,
        key: Option<Key>,
        session_id: u64,
        update_routing: bool,
    ) {
        let owned = self
            .sessions
            .get(&addr)
            .map_or(false, |s| s.id() == session_id);
        if !owned {
            return;
        }
        if let Some(session) = self.sessions.remove(&addr) {
            session.close();
        }
        self.mru.remove(&addr);
        if let Some(key) = key {
            if self.by_key.get(&key) == Some(&addr) {
                self.by_key.remove(&key);
            }
            if update_routing {
                let _ = self.ctx.routing.send(RoutingCommand::Remove { key }).await;
            }
        }
        debug!(addr = %addr, "session deregistered");
    }

    /// Close the session for an address evicted from the MRU list.
    async fn retire(&mut self, addr: SocketAddr, update_routing: bool) {
        if let Some(session) = self.sessions.remove(&addr) {
            session.close();
        }
        let keys: Vec<Key> = self
            .by_key
            .iter()
            .filter(|(_, mapped)| **mapped == addr)
            .map(|(key, _)| *key)
            .collect();
        for key in keys {
            self.by_key.remove(&key);
            if update_routing {
                let _ = self.ctx.routing.send(RoutingCommand::Remove { key }).await;
            }
        }
        debug!(addr = %addr, "session retired");
    }
}
