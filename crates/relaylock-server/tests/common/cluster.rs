//! In-process relaylock clusters on loopback ports

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relaylock_core::RelayManagerConfig;
use relaylock_server::startup::ShutdownSignal;
use relaylock_server::{Server, ServerConfig};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::WAIT;

pub struct TestNode {
    pub server: Arc<Server>,
    pub relay_addr: SocketAddr,
    pub shutdown: ShutdownSignal,
    pub task: JoinHandle<anyhow::Result<()>>,
}

impl TestNode {
    /// Client listener address; waits until quorum opened it
    pub async fn client_addr(&self) -> SocketAddr {
        let mut addr = self.server.subscribe_client_addr();
        let published = *timeout(WAIT, addr.wait_for(Option::is_some))
            .await
            .expect("client listener did not open")
            .expect("server dropped");
        published.expect("address published")
    }

    pub async fn wait_for_quorum(&self, available: bool) {
        let mut quorum = self.server.relays().subscribe_quorum();
        timeout(WAIT, quorum.wait_for(|v| *v == available))
            .await
            .expect("quorum state did not change")
            .expect("relay manager dropped");
    }

    pub async fn stop(self) {
        self.shutdown.shutdown();
        let _ = timeout(WAIT, self.task).await;
    }
}

pub struct TestCluster {
    pub nodes: Vec<TestNode>,
}

impl TestCluster {
    /// Start `size` nodes that all list each other as members
    pub async fn start(size: usize) -> Self {
        Self::start_partial(size, size).await
    }

    /// Configure a cluster of `size` members but only start the first `running`
    pub async fn start_partial(size: usize, running: usize) -> Self {
        let mut listeners = Vec::with_capacity(size);
        for _ in 0..size {
            listeners.push(TcpListener::bind("127.0.0.1:0").await.expect("bind relay"));
        }
        let members: Vec<String> = listeners
            .iter()
            .map(|l| l.local_addr().expect("relay addr").to_string())
            .collect();

        let mut nodes = Vec::with_capacity(running);
        for (i, listener) in listeners.into_iter().enumerate() {
            if i >= running {
                continue;
            }
            let relay_addr = listener.local_addr().expect("relay addr");
            let server = Server::new(ServerConfig {
                id: format!("node-{}", i),
                client_addr: "127.0.0.1:0".to_string(),
                relay_addr: relay_addr.to_string(),
                retry_interval: Duration::from_millis(50),
                relay: RelayManagerConfig {
                    members: members.clone(),
                    check_interval: Duration::from_millis(100),
                    ..Default::default()
                },
                ..Default::default()
            });
            let shutdown = ShutdownSignal::new();
            let task = tokio::spawn(server.clone().serve(listener, shutdown.clone()));
            nodes.push(TestNode {
                server,
                relay_addr,
                shutdown,
                task,
            });
        }

        Self { nodes }
    }

    pub async fn stop(self) {
        for node in self.nodes {
            node.stop().await;
        }
    }
}
