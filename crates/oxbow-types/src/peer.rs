//! Peer identity: a key plus a reachable TCP address.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::Key;

/// A peer known to the node.
///
/// The key is `None` only for a freshly accepted inbound connection whose
/// owner has not yet identified itself; once learned it never changes.
/// Equality is key-and-address: the same key at a different address is a
/// different (and suspect) peer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// The peer's 256-bit identifier, if known.
    pub key: Option<Key>,
    /// The peer's advertised TCP endpoint.
    #[serde(with = "socket_addr_serde")]
    pub addr: SocketAddr,
}

impl PeerInfo {
    /// A peer with a known key.
    pub fn new(key: Key, addr: SocketAddr) -> Self {
        Self {
            key: Some(key),
            addr,
        }
    }

    /// A peer whose key has not been learned yet.
    pub fn unknown(addr: SocketAddr) -> Self {
        Self { key: None, addr }
    }
}

impl fmt::Debug for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key {
            Some(key) => write!(f, "PeerInfo({key:?} @ {})", self.addr),
            None => write!(f, "PeerInfo(? @ {})", self.addr),
        }
    }
}

/// Serde support for `SocketAddr` as an `(ip string, port)` pair, the wire
/// form required of peer addresses.
mod socket_addr_serde {
    use std::net::{IpAddr, SocketAddr};

    use serde::{self, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (addr.ip().to_string(), addr.port()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (ip, port): (String, u16) = Deserialize::deserialize(deserializer)?;
        let ip: IpAddr = ip.parse().map_err(serde::de::Error::custom)?;
        Ok(SocketAddr::new(ip, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_equality_is_key_and_address() {
        let key = Key::compute(b"peer");
        let a = PeerInfo::new(key, addr(4100));
        let b = PeerInfo::new(key, addr(4100));
        let c = PeerInfo::new(key, addr(4101));
        let d = PeerInfo::new(Key::compute(b"other"), addr(4100));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_serde_roundtrip() {
        let peer = PeerInfo::new(Key::compute(b"peer"), addr(4100));
        let json = serde_json::to_string(&peer).expect("serialize");
        assert!(json.contains("127.0.0.1"));
        let back: PeerInfo = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, peer);
    }

    #[test]
    fn test_unknown_peer_roundtrip() {
        let peer = PeerInfo::unknown(addr(9));
        let json = serde_json::to_string(&peer).expect("serialize");
        let back: PeerInfo = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.key, None);
        assert_eq!(back.addr, peer.addr);
    }
}
