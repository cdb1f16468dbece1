//! Node supervisor: starts every component, wires their channels, and
//! exposes the local peer API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use oxbow_dht::StoreStats;
use oxbow_types::{Key, PeerInfo};
use oxbow_wire::{Operation, RpcResponse};

use crate::bootstrap;
use crate::broker::{self, BrokerCommand, BrokerStats};
use crate::config::NodeConfig;
use crate::context::NodeContext;
use crate::engine;
use crate::error::{NodeError, Result};
use crate::handler;
use crate::routing::{self, RoutingCommand};
use crate::session;
use crate::store::{self, StoreCommand};

/// Local operations a caller can submit to a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerOp {
    /// Store a value; the key is the hash of its bytes.
    Add,
    /// Fetch a value by key.
    Find,
    /// Gather node counters.
    Stats,
    /// Refresh the routing table toward a key (or the owner's own).
    Refresh,
}

/// A request on the node's local API channel.
pub struct PeerRequest {
    /// The operation.
    pub op: PeerOp,
    /// Key argument (Find, optionally Refresh).
    pub key: Option<Key>,
    /// Value argument (Add).
    pub data: Option<Vec<u8>>,
    /// Reply channel.
    pub reply: oneshot::Sender<Result<PeerResponse>>,
}

/// The reply to a [`PeerRequest`].
#[derive(Clone, Debug, Default)]
pub struct PeerResponse {
    /// The key the operation acted on (computed for Add).
    pub key: Option<Key>,
    /// The fetched value (Find).
    pub data: Option<Vec<u8>>,
    /// Number of peers that acknowledged the operation.
    pub success_count: usize,
    /// Distinct peers queried while serving the operation.
    pub visited: usize,
    /// Counters (Stats).
    pub stats: Option<NodeStats>,
}

/// Counters of one running node.
#[derive(Clone, Debug, Serialize)]
pub struct NodeStats {
    /// The node's key.
    pub key: Key,
    /// The node's advertised address.
    pub addr: SocketAddr,
    /// Peers in the routing table.
    pub peers: usize,
    /// Value store counters.
    pub store: StoreStats,
    /// Connection broker counters.
    pub broker: BrokerStats,
}

/// A running DHT node.
///
/// Dropping the handle leaves the background tasks running; call
/// [`Node::shutdown`] to stop them.
pub struct Node {
    ctx: NodeContext,
    api: mpsc::Sender<PeerRequest>,
    local_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Start a node: bind the listener, spawn every component, and contact
    /// the seeds.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Bind`] if the listen endpoint cannot be bound.
    pub async fn start(config: NodeConfig) -> Result<Node> {
        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|e| NodeError::Bind(format!("{}: {e}", config.listen)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| NodeError::Bind(e.to_string()))?;

        let key = Key::random();
        let owner = PeerInfo::new(key, local_addr);
        info!(key = %key, addr = %local_addr, "node starting");

        let (routing_tx, routing_rx) = mpsc::channel(128);
        let (store_tx, store_rx) = mpsc::channel(128);
        let (broker_tx, broker_rx) = mpsc::channel(128);
        let (handler_tx, handler_rx) = mpsc::channel(128);
        let (api_tx, api_rx) = mpsc::channel(32);
        let (new_peer_tx, new_peer_rx) = mpsc::channel(64);

        let ctx = NodeContext {
            owner,
            config: Arc::new(config.dht.clone()),
            routing: routing_tx,
            store: store_tx,
            broker: broker_tx,
            handler: handler_tx,
        };

        let tasks = vec![
            tokio::spawn(routing::run(ctx.clone(), routing_rx, new_peer_tx)),
            tokio::spawn(store::run(ctx.clone(), store_rx)),
            tokio::spawn(broker::run(ctx.clone(), broker_rx)),
            tokio::spawn(handler::run(ctx.clone(), handler_rx)),
            tokio::spawn(api_loop(ctx.clone(), api_rx)),
            spawn_accept_loop(ctx.clone(), listener),
            store::spawn_expiry_driver(ctx.clone()),
            bootstrap::spawn_refresh_timer(ctx.clone()),
            bootstrap::spawn_new_peer_refresh(ctx.clone(), new_peer_rx),
        ];

        bootstrap::contact_seeds(&ctx, &config.seeds);

        Ok(Node {
            ctx,
            api: api_tx,
            local_addr,
            tasks,
        })
    }

    /// The address the node is listening on (and advertises).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The node's key.
    pub fn key(&self) -> Key {
        self.ctx.owner_key()
    }

    /// Submit a request on the local API channel.
    pub async fn request(
        &self,
        op: PeerOp,
        key: Option<Key>,
        data: Option<Vec<u8>>,
    ) -> Result<PeerResponse> {
        let (reply, rx) = oneshot::channel();
        self.api
            .send(PeerRequest {
                op,
                key,
                data,
                reply,
            })
            .await
            .map_err(|_| NodeError::ChannelClosed("api"))?;
        rx.await.map_err(|_| NodeError::ChannelClosed("api"))?
    }

    /// Store a value in the DHT. Returns the content key and how many
    /// peers acknowledged.
    pub async fn put(&self, data: Vec<u8>) -> Result<PeerResponse> {
        self.request(PeerOp::Add, None, Some(data)).await
    }

    /// Fetch a value by key.
    pub async fn get(&self, key: Key) -> Result<Option<Vec<u8>>> {
        Ok(self.request(PeerOp::Find, Some(key), None).await?.data)
    }

    /// Refresh the routing table. Returns the number of peers visited.
    pub async fn refresh(&self, target: Option<Key>) -> Result<usize> {
        Ok(self.request(PeerOp::Refresh, target, None).await?.visited)
    }

    /// Gather node counters.
    pub async fn stats(&self) -> Result<NodeStats> {
        self.request(PeerOp::Stats, None, None)
            .await?
            .stats
            .ok_or(NodeError::ChannelClosed("stats"))
    }

    /// Probe an endpoint with a FIND_PEER for the owner's key, learning
    /// the peer (and being learned by it) on success.
    pub async fn connect(&self, addr: SocketAddr) -> Result<RpcResponse> {
        let (reply, rx) = oneshot::channel();
        self.ctx
            .broker
            .send(BrokerCommand::Send {
                peer: PeerInfo::unknown(addr),
                operation: Operation::FindPeer,
                target: self.ctx.owner_key(),
                data: None,
                reply,
            })
            .await
            .map_err(|_| NodeError::ChannelClosed("broker"))?;
        rx.await.map_err(|_| NodeError::ChannelClosed("broker"))?
    }

    /// Stop the node: close every session, then stop the component loops.
    pub async fn shutdown(self) {
        debug!(addr = %self.local_addr, "node shutting down");
        let (reply, rx) = oneshot::channel();
        if self
            .ctx
            .broker
            .send(BrokerCommand::Shutdown { reply })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
        drop(self.ctx);
        drop(self.api);
        for task in self.tasks {
            task.abort();
        }
    }
}

async fn api_loop(ctx: NodeContext, mut inbox: mpsc::Receiver<PeerRequest>) {
    while let Some(request) = inbox.recv().await {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let result = serve_api(&ctx, request.op, request.key, request.data).await;
            let _ = request.reply.send(result);
        });
    }
}

async fn serve_api(
    ctx: &NodeContext,
    op: PeerOp,
    key: Option<Key>,
    data: Option<Vec<u8>>,
) -> Result<PeerResponse> {
    match op {
        PeerOp::Add => {
            let data =
                data.ok_or_else(|| NodeError::InvalidRequest("add requires a value".into()))?;
            let outcome = engine::put(ctx, data).await;
            Ok(PeerResponse {
                key: Some(outcome.key),
                success_count: outcome.stored,
                visited: outcome.visited,
                ..Default::default()
            })
        }
        PeerOp::Find => {
            let key = key.ok_or_else(|| NodeError::InvalidRequest("find requires a key".into()))?;
            let outcome = engine::get(ctx, key).await;
            Ok(PeerResponse {
                key: Some(key),
                success_count: usize::from(outcome.data.is_some()),
                data: outcome.data,
                visited: outcome.visited,
                ..Default::default()
            })
        }
        PeerOp::Refresh => {
            let visited = engine::refresh(ctx, key).await;
            Ok(PeerResponse {
                key,
                visited,
                ..Default::default()
            })
        }
        PeerOp::Stats => {
            let (count_reply, count_rx) = oneshot::channel();
            let peers = if ctx
                .routing
                .send(RoutingCommand::Count { reply: count_reply })
                .await
                .is_ok()
            {
                count_rx.await.unwrap_or_default()
            } else {
                0
            };

            let (store_reply, store_rx) = oneshot::channel();
            let store_stats = if ctx
                .store
                .send(StoreCommand::Stats { reply: store_reply })
                .await
                .is_ok()
            {
                store_rx.await.unwrap_or_default()
            } else {
                StoreStats::default()
            };

            let (broker_reply, broker_rx) = oneshot::channel();
            let broker_stats = if ctx
                .broker
                .send(BrokerCommand::Stats {
                    reply: broker_reply,
                })
                .await
                .is_ok()
            {
                broker_rx.await.unwrap_or_default()
            } else {
                BrokerStats::default()
            };

            Ok(PeerResponse {
                stats: Some(NodeStats {
                    key: ctx.owner_key(),
                    addr: ctx.owner.addr,
                    peers,
                    store: store_stats,
                    broker: broker_stats,
                }),
                ..Default::default()
            })
        }
    }
}

fn spawn_accept_loop(ctx: NodeContext, listener: TcpListener) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    debug!(peer = %peer_addr, "accepted connection");
                    let session = session::accept(stream, peer_addr, ctx.clone());
                    let target = ctx.owner_key();
                    tokio::spawn(async move {
                        // The ping's response identifies the remote, making
                        // it routable.
                        if let Err(error) = session.request(Operation::Ping, target, None).await {
                            debug!(peer = %peer_addr, error = %error, "initial ping failed");
                        }
                    });
                }
                Err(error) => {
                    warn!(error = %error, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    })
}
