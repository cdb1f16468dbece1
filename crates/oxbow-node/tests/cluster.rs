//! End-to-end tests driving real nodes over loopback TCP.

use std::time::Duration;

use oxbow_node::{Node, NodeConfig, NodeError};
use oxbow_types::{DhtConfig, Key};

fn test_config() -> NodeConfig {
    NodeConfig {
        listen: "127.0.0.1:0".parse().expect("loopback"),
        seeds: Vec::new(),
        dht: DhtConfig {
            request_timeout_secs: 5,
            ..DhtConfig::default()
        },
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_lone_node_stores_its_own_value_without_sockets() {
    let node = Node::start(test_config()).await.expect("start");

    let response = node.put(b"solo value".to_vec()).await.expect("put");
    assert_eq!(response.success_count, 1);
    assert_eq!(response.key, Some(Key::compute(b"solo value")));

    let data = node
        .get(Key::compute(b"solo value"))
        .await
        .expect("get");
    assert_eq!(data.as_deref(), Some(b"solo value".as_slice()));

    // The store travelled the broker's self-short-circuit: no session was
    // ever opened.
    let stats = node.stats().await.expect("stats");
    assert_eq!(stats.broker.sessions, 0);
    assert_eq!(stats.store.cache_items, 1);

    node.shutdown().await;
}

#[tokio::test]
async fn test_get_of_unknown_key_returns_none() {
    let node = Node::start(test_config()).await.expect("start");
    let data = node.get(Key::compute(b"never stored")).await.expect("get");
    assert_eq!(data, None);
    node.shutdown().await;
}

#[tokio::test]
async fn test_three_node_bootstrap_put_get() {
    let node1 = Node::start(test_config()).await.expect("node1");
    let node2 = Node::start(test_config()).await.expect("node2");
    let node3 = Node::start(test_config()).await.expect("node3");

    node2.connect(node1.local_addr()).await.expect("node2->node1");
    node3.connect(node1.local_addr()).await.expect("node3->node1");
    settle().await;
    node3.refresh(None).await.expect("refresh");

    let response = node1.put(b"hello world".to_vec()).await.expect("put");
    assert!(
        (1..=3).contains(&response.success_count),
        "success_count = {}",
        response.success_count
    );

    let key = Key::compute(b"hello world");
    let data = node3.get(key).await.expect("get");
    assert_eq!(data.as_deref(), Some(b"hello world".as_slice()));

    // Everyone learned everyone through the lookups.
    let stats1 = node1.stats().await.expect("stats");
    assert!(stats1.peers >= 1);

    node1.shutdown().await;
    node2.shutdown().await;
    node3.shutdown().await;
}

#[tokio::test]
async fn test_value_survives_origin_shutdown() {
    let node1 = Node::start(test_config()).await.expect("node1");
    let node2 = Node::start(test_config()).await.expect("node2");

    node2.connect(node1.local_addr()).await.expect("connect");
    settle().await;

    let response = node1.put(b"durable".to_vec()).await.expect("put");
    assert!(response.success_count >= 2, "value not replicated");
    node1.shutdown().await;
    settle().await;

    let data = node2.get(Key::compute(b"durable")).await.expect("get");
    assert_eq!(data.as_deref(), Some(b"durable".as_slice()));

    node2.shutdown().await;
}

#[tokio::test]
async fn test_broker_retires_least_recent_session() {
    let mut hub_config = test_config();
    hub_config.dht.max_connections = 2;
    let hub = Node::start(hub_config).await.expect("hub");

    let peer1 = Node::start(test_config()).await.expect("peer1");
    let peer2 = Node::start(test_config()).await.expect("peer2");
    let peer3 = Node::start(test_config()).await.expect("peer3");

    hub.connect(peer1.local_addr()).await.expect("peer1");
    settle().await;
    hub.connect(peer2.local_addr()).await.expect("peer2");
    settle().await;
    hub.connect(peer3.local_addr()).await.expect("peer3");
    settle().await;

    let stats = hub.stats().await.expect("stats");
    assert_eq!(stats.broker.sessions, 2, "oldest session not retired");
    // Retiring peer1's session also removed it from the routing table.
    assert_eq!(stats.peers, 2);

    hub.shutdown().await;
    peer1.shutdown().await;
    peer2.shutdown().await;
    peer3.shutdown().await;
}

#[tokio::test]
async fn test_session_failure_removes_peer() {
    let node1 = Node::start(test_config()).await.expect("node1");
    let node2 = Node::start(test_config()).await.expect("node2");

    node1.connect(node2.local_addr()).await.expect("connect");
    settle().await;
    assert_eq!(node1.stats().await.expect("stats").peers, 1);

    node2.shutdown().await;
    settle().await;

    // The dead session cascades: broker deregisters, routing forgets.
    let stats = node1.stats().await.expect("stats");
    assert_eq!(stats.broker.sessions, 0);
    assert_eq!(stats.peers, 0);

    node1.shutdown().await;
}

#[tokio::test]
async fn test_bind_failure_is_reported() {
    let node = Node::start(test_config()).await.expect("node");
    let mut config = test_config();
    config.listen = node.local_addr();
    match Node::start(config).await {
        Err(NodeError::Bind(_)) => {}
        Err(other) => unreachable!("expected a bind error, got {other}"),
        Ok(_) => unreachable!("bind to an occupied port succeeded"),
    }
    node.shutdown().await;
}

#[tokio::test]
async fn test_refresh_reports_visited_peers() {
    let node1 = Node::start(test_config()).await.expect("node1");
    let node2 = Node::start(test_config()).await.expect("node2");

    node2.connect(node1.local_addr()).await.expect("connect");
    settle().await;

    let visited = node2.refresh(None).await.expect("refresh");
    assert!(visited >= 1);

    node1.shutdown().await;
    node2.shutdown().await;
}

#[tokio::test]
async fn test_seed_bootstrap_populates_routing_table() {
    let seed = Node::start(test_config()).await.expect("seed");

    let mut config = test_config();
    config.seeds = vec![seed.local_addr()];
    let joiner = Node::start(config).await.expect("joiner");
    settle().await;

    let stats = joiner.stats().await.expect("stats");
    assert_eq!(stats.peers, 1);

    seed.shutdown().await;
    joiner.shutdown().await;
}
