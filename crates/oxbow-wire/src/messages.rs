//! RPC message shapes exchanged between peers.

use serde::{Deserialize, Serialize};

use oxbow_types::{Key, PeerInfo};

use crate::WireError;

/// The four primitive operations a peer serves.
///
/// Encoded on the wire as its `u8` tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Operation {
    /// Aliveness probe; the reply carries the responder's nearest peers.
    Ping = 0,
    /// Store a value under the target key.
    Store = 1,
    /// Return the k peers nearest the target key.
    FindPeer = 2,
    /// Return the value for the target key, or the nearest peers.
    FindValue = 3,
}

impl From<Operation> for u8 {
    fn from(op: Operation) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for Operation {
    type Error = WireError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Operation::Ping),
            1 => Ok(Operation::Store),
            2 => Ok(Operation::FindPeer),
            3 => Ok(Operation::FindValue),
            other => Err(WireError::ProtocolViolation(format!(
                "unknown operation tag {other}"
            ))),
        }
    }
}

/// A request sent to a remote peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Session-unique identifier; responses echo it back.
    pub request_id: u64,
    /// The operation to perform.
    pub operation: Operation,
    /// The sending node's identity, so the receiver can route back to it.
    pub sender: PeerInfo,
    /// The key the operation acts on.
    pub target: Key,
    /// Value payload, present for STORE.
    pub data: Option<Vec<u8>>,
}

/// A reply to an [`RpcRequest`].
///
/// A response with `success == false` and no `error` is a logical miss
/// (value not found, empty candidate set); `error` is set only when the
/// request itself could not be served.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Echo of the request's identifier.
    pub request_id: u64,
    /// The responding node's identity.
    pub sender: PeerInfo,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Value payload, present for a FIND_VALUE hit.
    pub data: Option<Vec<u8>>,
    /// Candidate peers near the target, possibly empty.
    pub peers: Vec<PeerInfo>,
    /// Diagnostic for a request that could not be served.
    pub error: Option<String>,
}

impl RpcResponse {
    /// A failure response carrying a diagnostic.
    pub fn failure(request_id: u64, sender: PeerInfo, error: impl Into<String>) -> Self {
        Self {
            request_id,
            sender,
            success: false,
            data: None,
            peers: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Envelope carried by every frame on a session stream.
///
/// Both directions of a session are multiplexed on the same duplex stream,
/// so each frame declares whether it is a request or a response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Frame {
    /// An inbound or outbound request.
    Request(RpcRequest),
    /// A reply matched to a request by `request_id`.
    Response(RpcResponse),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbor;
    use std::net::SocketAddr;

    fn peer() -> PeerInfo {
        PeerInfo::new(
            Key::compute(b"sender"),
            SocketAddr::from(([127, 0, 0, 1], 4100)),
        )
    }

    #[test]
    fn test_operation_tags() {
        assert_eq!(u8::from(Operation::Ping), 0);
        assert_eq!(u8::from(Operation::Store), 1);
        assert_eq!(u8::from(Operation::FindPeer), 2);
        assert_eq!(u8::from(Operation::FindValue), 3);
        assert_eq!(Operation::try_from(2).expect("tag"), Operation::FindPeer);
        assert!(Operation::try_from(4).is_err());
    }

    #[test]
    fn test_request_roundtrip() {
        let req = RpcRequest {
            request_id: 42,
            operation: Operation::Store,
            sender: peer(),
            target: Key::compute(b"value"),
            data: Some(b"value".to_vec()),
        };
        let bytes = cbor::to_vec(&Frame::Request(req.clone())).expect("serialize");
        let frame: Frame = cbor::from_slice(&bytes).expect("deserialize");
        match frame {
            Frame::Request(back) => {
                assert_eq!(back.request_id, 42);
                assert_eq!(back.operation, Operation::Store);
                assert_eq!(back.target, req.target);
                assert_eq!(back.data.as_deref(), Some(b"value".as_slice()));
            }
            Frame::Response(_) => unreachable!("expected a request frame"),
        }
    }

    #[test]
    fn test_response_roundtrip() {
        let resp = RpcResponse {
            request_id: 9,
            sender: peer(),
            success: true,
            data: None,
            peers: vec![peer()],
            error: None,
        };
        let bytes = cbor::to_vec(&Frame::Response(resp)).expect("serialize");
        let frame: Frame = cbor::from_slice(&bytes).expect("deserialize");
        match frame {
            Frame::Response(back) => {
                assert_eq!(back.request_id, 9);
                assert!(back.success);
                assert_eq!(back.peers.len(), 1);
            }
            Frame::Request(_) => unreachable!("expected a response frame"),
        }
    }

    #[test]
    fn test_failure_response() {
        let resp = RpcResponse::failure(7, peer(), "store without payload");
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("store without payload"));
        assert!(resp.peers.is_empty());
    }
}
