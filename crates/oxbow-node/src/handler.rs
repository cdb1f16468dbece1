//! The remote-handler component: serves inbound PING / STORE / FIND_PEER /
//! FIND_VALUE requests.
//!
//! Requests arrive from peer sessions (and from the broker's
//! self-short-circuit) on one inbox and are served with bounded
//! concurrency. A request that cannot be served replies `success = false`
//! with a diagnostic; handler failures never cross a channel as anything
//! but a response.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::debug;

use oxbow_wire::{Operation, RpcRequest, RpcResponse};

use crate::context::NodeContext;
use crate::store::StoreCommand;

/// Maximum concurrently served inbound requests.
pub const MAX_INBOUND: usize = 10;

/// One inbound request and the channel its response goes back on.
pub struct InboundRequest {
    /// The decoded request.
    pub request: RpcRequest,
    /// Reply channel back to the session (or short-circuiting broker).
    pub reply: oneshot::Sender<RpcResponse>,
}

/// Run the handler loop until the inbox closes.
pub async fn run(ctx: NodeContext, mut inbox: mpsc::Receiver<InboundRequest>) {
    let permits = Arc::new(Semaphore::new(MAX_INBOUND));
    while let Some(inbound) = inbox.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let _permit = permit;
            serve(ctx, inbound).await;
        });
    }
}

async fn serve(ctx: NodeContext, inbound: InboundRequest) {
    let InboundRequest { request, reply } = inbound;
    let request_id = request.request_id;

    // A request from an identified peer teaches us that peer.
    if request.sender.key.is_some() {
        ctx.add_peer(request.sender.clone()).await;
    }

    debug!(
        operation = ?request.operation,
        target = %request.target,
        from = ?request.sender,
        "serving inbound request"
    );

    let response = match request.operation {
        Operation::Ping => {
            // A ping doubles as a find-peer toward our own key.
            let peers = ctx.nearest(ctx.owner_key(), ctx.config.k, false).await;
            RpcResponse {
                request_id,
                sender: ctx.owner.clone(),
                success: true,
                data: None,
                peers,
                error: None,
            }
        }
        Operation::Store => match request.data {
            Some(data) => {
                let (ack, ack_rx) = oneshot::channel();
                let sent = ctx
                    .store
                    .send(StoreCommand::Put {
                        key: request.target,
                        data,
                        reply: Some(ack),
                    })
                    .await;
                if sent.is_ok() && ack_rx.await.is_ok() {
                    RpcResponse {
                        request_id,
                        sender: ctx.owner.clone(),
                        success: true,
                        data: None,
                        peers: Vec::new(),
                        error: None,
                    }
                } else {
                    RpcResponse::failure(request_id, ctx.owner.clone(), "value store unavailable")
                }
            }
            None => {
                RpcResponse::failure(request_id, ctx.owner.clone(), "store request without payload")
            }
        },
        Operation::FindPeer => {
            let peers = ctx.nearest(request.target, ctx.config.k, false).await;
            let success = !peers.is_empty();
            RpcResponse {
                request_id,
                sender: ctx.owner.clone(),
                success,
                data: None,
                peers,
                error: None,
            }
        }
        Operation::FindValue => {
            let (lookup, lookup_rx) = oneshot::channel();
            let sent = ctx
                .store
                .send(StoreCommand::Get {
                    key: request.target,
                    reply: lookup,
                })
                .await;
            let data = if sent.is_ok() {
                lookup_rx.await.ok().flatten()
            } else {
                None
            };
            match data {
                Some(data) => RpcResponse {
                    request_id,
                    sender: ctx.owner.clone(),
                    success: true,
                    data: Some(data),
                    peers: Vec::new(),
                    error: None,
                },
                None => {
                    let peers = ctx.nearest(request.target, ctx.config.k, false).await;
                    RpcResponse {
                        request_id,
                        sender: ctx.owner.clone(),
                        success: false,
                        data: None,
                        peers,
                        error: None,
                    }
                }
            }
        }
    };

    let _ = reply.send(response);
}
