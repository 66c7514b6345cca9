//! Cluster integration tests
//!
//! Nodes run in-process and talk over loopback TCP, so these exercise the
//! full relay handshake and the Propose/Schedule/Commit rounds.

mod common;

use std::time::Duration;

use common::{TestClient, TestCluster};

#[tokio::test]
async fn test_cluster_grants_lock() {
    let cluster = TestCluster::start(3).await;
    let node = &cluster.nodes[0];
    assert_eq!(node.server.relays().quorum_need(), 2);

    let mut client = TestClient::connect(node.client_addr().await).await;
    assert_eq!(
        client.request("HELLO 1.0.0 n0").await.as_deref(),
        Some("HELLO n0 node-0 1.0.0")
    );

    let reply = client.request("ON mylock 5000 n1").await.unwrap();
    assert!(reply.starts_with("GIVE n1 "), "got {}", reply);

    // Every peer now holds the lock on behalf of node-0
    for peer in &cluster.nodes[1..] {
        assert_eq!(
            peer.server.locks().who_has("mylock").await.unwrap().as_deref(),
            Some("relay:node-0")
        );
    }

    cluster.stop().await;
}

#[tokio::test]
async fn test_lock_is_exclusive_across_nodes() {
    let cluster = TestCluster::start(3).await;

    let mut holder = TestClient::connect(cluster.nodes[0].client_addr().await).await;
    let reply = holder.request("ON mylock 1500 n1").await.unwrap();
    assert!(reply.starts_with("GIVE n1 "), "got {}", reply);

    let mut contender = TestClient::connect(cluster.nodes[1].client_addr().await).await;
    assert_eq!(
        contender.request("ON mylock 300 n2").await.as_deref(),
        Some("ERR timed out acquiring mylock")
    );
    assert_eq!(contender.recv().await, None);

    // Peers keep their copy until it expires, so the next attempt succeeds
    // only after the holder's lifetime has passed.
    holder.send("OFF mylock n3").await;
    let mut contender = TestClient::connect(cluster.nodes[1].client_addr().await).await;
    let reply = contender.request("ON mylock 8000 n4").await.unwrap();
    assert!(reply.starts_with("GIVE n4 "), "got {}", reply);

    cluster.stop().await;
}

#[tokio::test]
async fn test_disconnect_releases_client_locks() {
    let cluster = TestCluster::start(3).await;
    let node = &cluster.nodes[0];

    let mut client = TestClient::connect(node.client_addr().await).await;
    let reply = client.request("ON mylock 5000 n1").await.unwrap();
    assert!(reply.starts_with("GIVE"), "got {}", reply);
    drop(client);

    let released = tokio::time::timeout(common::WAIT, async {
        loop {
            if node.server.locks().check("mylock").await.unwrap().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(released.is_ok());

    cluster.stop().await;
}

#[tokio::test]
async fn test_quorum_loss_stops_grants() {
    let cluster = TestCluster::start(3).await;
    let mut nodes = cluster.nodes;
    let survivor_addr = nodes[0].client_addr().await;
    let mut client = TestClient::connect(survivor_addr).await;
    assert!(client.request("HELLO 1.0.0 n0").await.is_some());

    let third = nodes.pop().unwrap();
    let second = nodes.pop().unwrap();
    second.stop().await;
    third.stop().await;
    nodes[0].wait_for_quorum(false).await;

    let reply = client.request("ON mylock 300 n1").await.unwrap();
    assert_eq!(reply, "ERR timed out acquiring mylock");

    let mut late = TestClient::connect(survivor_addr).await;
    assert_eq!(late.recv().await.as_deref(), Some("ERR no quorum"));
    assert_eq!(late.recv().await, None);

    TestCluster { nodes }.stop().await;
}

#[tokio::test]
async fn test_no_clients_without_quorum() {
    let cluster = TestCluster::start_partial(3, 1).await;
    let node = &cluster.nodes[0];
    assert!(!node.server.relays().can_have_quorum());

    let mut addr = node.server.subscribe_client_addr();
    let opened = tokio::time::timeout(Duration::from_millis(500), addr.wait_for(Option::is_some))
        .await
        .is_ok();
    assert!(!opened);

    let lock = node
        .server
        .acquire_distributed("tester", "mylock", Duration::from_secs(5))
        .await
        .unwrap();
    assert!(lock.is_none());
    assert_eq!(node.server.locks().check("mylock").await.unwrap(), None);

    cluster.stop().await;
}
