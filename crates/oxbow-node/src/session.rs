//! Per-peer session: one duplex framed stream to one remote peer.
//!
//! A session multiplexes concurrent outbound requests by request id and
//! serves inbound requests arriving on the same stream. Outbound
//! parallelism is bounded by a semaphore sized `req_buffer`; excess
//! requests wait for a permit.
//!
//! Dialing is lazy: [`connect`] returns a usable handle immediately and
//! requests queue until the TCP connection is up. A connect or transport
//! failure fails every pending request with the same error, closes the
//! session, and deregisters it from the broker, which removes the peer
//! from the routing table.
//!
//! Identification: the first successful response names the remote peer
//! (key and advertised address); the session then registers itself with the
//! broker. Every response's peer list is fed into the routing table.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

use oxbow_types::{Key, PeerInfo};
use oxbow_wire::{read_frame, write_frame, Frame, Operation, RpcRequest, RpcResponse};

use crate::broker::BrokerCommand;
use crate::context::NodeContext;
use crate::error::{NodeError, Result};
use crate::handler::InboundRequest;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

struct Pending {
    reply: oneshot::Sender<Result<RpcResponse>>,
    _permit: OwnedSemaphorePermit,
}

struct SessionShared {
    id: u64,
    /// The endpoint this session was dialed toward or accepted from.
    addr: SocketAddr,
    ctx: NodeContext,
    next_request: AtomicU64,
    pending: Mutex<HashMap<u64, Pending>>,
    permits: Arc<Semaphore>,
    write_tx: mpsc::Sender<Frame>,
    /// The identified remote peer, set on the first successful response.
    remote: Mutex<Option<PeerInfo>>,
    shutdown: Notify,
    closed: AtomicBool,
}

/// Cheap cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    /// Process-unique session identifier, used by the broker to tell
    /// sessions for the same address apart.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// The remote endpoint.
    pub fn addr(&self) -> SocketAddr {
        self.shared.addr
    }

    /// Send a request and wait for the matching response.
    ///
    /// Waits for an in-flight permit first, so at most `req_buffer`
    /// requests are outstanding per session.
    pub async fn request(
        &self,
        operation: Operation,
        target: Key,
        data: Option<Vec<u8>>,
    ) -> Result<RpcResponse> {
        let shared = &self.shared;
        if shared.closed.load(Ordering::Acquire) {
            return Err(NodeError::SessionClosed);
        }
        let permit = shared
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| NodeError::SessionClosed)?;
        let request_id = shared.next_request.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        shared.pending.lock().await.insert(
            request_id,
            Pending {
                reply,
                _permit: permit,
            },
        );
        let request = RpcRequest {
            request_id,
            operation,
            sender: shared.ctx.owner.clone(),
            target,
            data,
        };
        if shared.write_tx.send(Frame::Request(request)).await.is_err() {
            shared.pending.lock().await.remove(&request_id);
            return Err(NodeError::SessionClosed);
        }
        let deadline = shared.ctx.config.request_timeout();
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(result)) => result.and_then(reject_remote_failure),
            Ok(Err(_)) => Err(NodeError::SessionClosed),
            Err(_) => {
                shared.pending.lock().await.remove(&request_id);
                Err(NodeError::Timeout(deadline))
            }
        }
    }

    /// Close the session, failing anything still pending.
    pub fn close(&self) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            terminate(&shared, NodeError::SessionClosed).await;
        });
    }
}

/// Surface a response's protocol-failure diagnostic as [`NodeError::Remote`].
///
/// Logical misses (`success == false`, no diagnostic) pass through: callers
/// still need the candidate peers they carry.
pub(crate) fn reject_remote_failure(response: RpcResponse) -> Result<RpcResponse> {
    match &response.error {
        Some(diagnostic) if !response.success => Err(NodeError::Remote(diagnostic.clone())),
        _ => Ok(response),
    }
}

fn new_shared(addr: SocketAddr, ctx: NodeContext) -> (Arc<SessionShared>, mpsc::Receiver<Frame>) {
    let in_flight = ctx.config.req_buffer.max(1);
    let (write_tx, write_rx) = mpsc::channel(in_flight * 2);
    let shared = Arc::new(SessionShared {
        id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
        addr,
        ctx,
        next_request: AtomicU64::new(1),
        pending: Mutex::new(HashMap::new()),
        permits: Arc::new(Semaphore::new(in_flight)),
        write_tx,
        remote: Mutex::new(None),
        shutdown: Notify::new(),
        closed: AtomicBool::new(false),
    });
    (shared, write_rx)
}

/// Open a session toward a remote endpoint.
///
/// Returns immediately; the TCP connection is established in the
/// background and queued requests complete (or fail together) once it
/// resolves.
pub fn connect(addr: SocketAddr, ctx: NodeContext) -> SessionHandle {
    let (shared, write_rx) = new_shared(addr, ctx);
    let handle = SessionHandle {
        shared: shared.clone(),
    };
    tokio::spawn(async move {
        match TcpStream::connect(addr).await {
            Ok(stream) => run_session(shared, stream, write_rx).await,
            Err(error) => {
                terminate(
                    &shared,
                    NodeError::Transport(format!("connect {addr}: {error}")),
                )
                .await;
            }
        }
    });
    handle
}

/// Wrap an accepted connection in a session for an as-yet-unknown peer.
pub fn accept(stream: TcpStream, addr: SocketAddr, ctx: NodeContext) -> SessionHandle {
    let (shared, write_rx) = new_shared(addr, ctx);
    let handle = SessionHandle {
        shared: shared.clone(),
    };
    tokio::spawn(async move {
        run_session(shared, stream, write_rx).await;
    });
    handle
}

async fn run_session(
    shared: Arc<SessionShared>,
    stream: TcpStream,
    mut write_rx: mpsc::Receiver<Frame>,
) {
    if let Err(error) = stream.set_nodelay(true) {
        trace!(error = %error, "set_nodelay failed");
    }
    let (mut read_half, mut write_half) = stream.into_split();

    let writer_shared = shared.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = write_rx.recv() => match frame {
                    Some(frame) => {
                        if let Err(error) = write_frame(&mut write_half, &frame).await {
                            terminate(&writer_shared, error.into()).await;
                            break;
                        }
                    }
                    None => break,
                },
                _ = writer_shared.shutdown.notified() => break,
            }
        }
        let _ = write_half.shutdown().await;
    });

    loop {
        if shared.closed.load(Ordering::Acquire) {
            break;
        }
        tokio::select! {
            _ = shared.shutdown.notified() => break,
            frame = read_frame(&mut read_half) => match frame {
                Ok(Frame::Response(response)) => on_response(&shared, response).await,
                Ok(Frame::Request(request)) => on_request(&shared, request),
                Err(error) => {
                    terminate(&shared, error.into()).await;
                    break;
                }
            }
        }
    }
    terminate(&shared, NodeError::SessionClosed).await;
    writer.abort();
}

/// Tear the session down once: fail all pending requests, wake both loop
/// halves, and tell the broker. Idempotent.
async fn terminate(shared: &Arc<SessionShared>, error: NodeError) {
    if shared.closed.swap(true, Ordering::AcqRel) {
        return;
    }
    shared.permits.close();
    shared.shutdown.notify_waiters();

    let pending: Vec<Pending> = shared
        .pending
        .lock()
        .await
        .drain()
        .map(|(_, entry)| entry)
        .collect();
    if !pending.is_empty() {
        debug!(
            addr = %shared.addr,
            failed = pending.len(),
            error = %error,
            "session terminated with pending requests"
        );
    }
    for entry in pending {
        let _ = entry.reply.send(Err(error.clone()));
    }

    let remote = shared.remote.lock().await.clone();
    let (addr, key) = match remote {
        Some(peer) => (peer.addr, peer.key),
        None => (shared.addr, None),
    };
    let _ = shared
        .ctx
        .broker
        .send(BrokerCommand::Deregister {
            addr,
            key,
            session_id: shared.id,
            update_routing: true,
        })
        .await;
}

async fn on_response(shared: &Arc<SessionShared>, response: RpcResponse) {
    // The first successful response identifies the remote peer.
    if response.success && response.sender.key.is_some() {
        let mut remote = shared.remote.lock().await;
        if remote.is_none() {
            *remote = Some(response.sender.clone());
            drop(remote);
            debug!(peer = ?response.sender, "session identified remote peer");
            let _ = shared
                .ctx
                .broker
                .send(BrokerCommand::Register {
                    peer: response.sender.clone(),
                    session: SessionHandle {
                        shared: shared.clone(),
                    },
                    update_routing: true,
                })
                .await;
        }
    }

    // Candidate peers ride along on every response.
    for peer in &response.peers {
        if peer.key.is_some() {
            shared.ctx.add_peer(peer.clone()).await;
        }
    }

    match shared.pending.lock().await.remove(&response.request_id) {
        Some(entry) => {
            let _ = entry.reply.send(Ok(response));
        }
        None => trace!(
            request_id = response.request_id,
            "response for unknown request"
        ),
    }
}

fn on_request(shared: &Arc<SessionShared>, request: RpcRequest) {
    let ctx = shared.ctx.clone();
    let write_tx = shared.write_tx.clone();
    tokio::spawn(async move {
        let request_id = request.request_id;
        let owner = ctx.owner.clone();
        let (reply, rx) = oneshot::channel();
        let response = if ctx
            .handler
            .send(InboundRequest { request, reply })
            .await
            .is_ok()
        {
            match rx.await {
                Ok(response) => response,
                Err(_) => RpcResponse::failure(request_id, owner, "handler dropped the request"),
            }
        } else {
            RpcResponse::failure(request_id, owner, "handler unavailable")
        };
        let _ = write_tx.send(Frame::Response(response)).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> PeerInfo {
        PeerInfo::new(
            Key::compute(b"session-owner"),
            SocketAddr::from(([127, 0, 0, 1], 4100)),
        )
    }

    #[test]
    fn test_remote_failure_surfaces_the_diagnostic() {
        let response = RpcResponse::failure(7, owner(), "store request without payload");
        match reject_remote_failure(response) {
            Err(NodeError::Remote(diagnostic)) => {
                assert_eq!(diagnostic, "store request without payload");
            }
            other => unreachable!("expected a remote failure, got {other:?}"),
        }
    }

    #[test]
    fn test_logical_miss_passes_through() {
        let response = RpcResponse {
            request_id: 8,
            sender: owner(),
            success: false,
            data: None,
            peers: vec![owner()],
            error: None,
        };
        let passed = reject_remote_failure(response).expect("logical miss is not an error");
        assert!(!passed.success);
        assert_eq!(passed.peers.len(), 1);
    }

    #[test]
    fn test_success_passes_through() {
        let response = RpcResponse {
            request_id: 9,
            sender: owner(),
            success: true,
            data: Some(b"value".to_vec()),
            peers: Vec::new(),
            error: None,
        };
        let passed = reject_remote_failure(response).expect("success is not an error");
        assert_eq!(passed.data.as_deref(), Some(b"value".as_slice()));
    }
}
