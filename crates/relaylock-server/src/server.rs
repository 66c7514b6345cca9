//! Lock coordinator
//!
//! Wires the local lock store to the peer directory and runs the distributed
//! acquisition used by client sessions. The client listener only opens once
//! the directory reports quorum; the relay listener serves peers from the
//! start.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relaylock_api::ProtocolRegistry;
use relaylock_common::{DEFAULT_VERSION, RelayLockError, Result, is_valid_token};
use relaylock_consistency::{Lock, LockManager, LockManagerConfig};
use relaylock_core::{RelayManager, RelayManagerConfig};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::client;
use crate::startup::{ShutdownSignal, run_with_shutdown};

const SELF_TEST_OWNER: &str = "self-test";
const SELF_TEST_LOCK: &str = "self-test-lock";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub id: String,
    pub version: String,
    /// Client listener bind address
    pub client_addr: String,
    /// Relay listener bind address, used by [`Server::run`]
    pub relay_addr: String,
    /// Lifetime of the local reservation taken before peers agree
    pub provisional_timeout: Duration,
    /// Delay between attempts while a client waits for a lock
    pub retry_interval: Duration,
    /// Periodically acquire a test lock and log the result
    pub testing: bool,
    pub testing_interval: Duration,
    pub lock: LockManagerConfig,
    pub relay: RelayManagerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            id: "server-on-port-20000".to_string(),
            version: DEFAULT_VERSION.to_string(),
            client_addr: "0.0.0.0:10000".to_string(),
            relay_addr: "0.0.0.0:20000".to_string(),
            provisional_timeout: Duration::from_secs(1),
            retry_interval: Duration::from_millis(100),
            testing: false,
            testing_interval: Duration::from_secs(5),
            lock: LockManagerConfig::default(),
            relay: RelayManagerConfig::default(),
        }
    }
}

pub struct Server {
    config: ServerConfig,
    locks: LockManager,
    relays: Arc<RelayManager>,
    registry: ProtocolRegistry,
    client_addr: watch::Sender<Option<SocketAddr>>,
}

impl Server {
    /// Build the node and start its lock worker; must run inside a runtime
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let registry = ProtocolRegistry::new();
        let (locks, _) = LockManager::start(config.lock.clone());

        let relay_config = RelayManagerConfig {
            node_id: config.id.clone(),
            version: config.version.clone(),
            provisional_timeout: config.provisional_timeout,
            ..config.relay.clone()
        };
        let relays = RelayManager::new(relay_config, locks.clone(), registry.relay.clone());
        let (client_addr, _) = watch::channel(None);

        Arc::new(Self {
            config,
            locks,
            relays,
            registry,
            client_addr,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn relays(&self) -> &Arc<RelayManager> {
        &self.relays
    }

    pub fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    /// Watch the client listener address; `None` until quorum opened it
    pub fn subscribe_client_addr(&self) -> watch::Receiver<Option<SocketAddr>> {
        self.client_addr.subscribe()
    }

    /// Acquire `name` for `owner` across the cluster
    ///
    /// Reserves the lock locally, then runs Propose, Schedule and Commit
    /// against the peers, extending the local reservation to `timeout` after
    /// each phase. Any failure releases the local reservation and returns
    /// `None`. Names that cannot travel as a single wire token are rejected.
    pub async fn acquire_distributed(
        &self,
        owner: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<Lock>> {
        if !is_valid_token(name) {
            return Err(RelayLockError::IllegalArgument(format!(
                "invalid lock name: {:?}",
                name
            )));
        }
        let locks = &self.locks;

        if locks
            .try_acquire(owner, name, self.config.provisional_timeout)
            .await?
            .is_none()
        {
            debug!(lock = %name, owner, "Lock is held locally by someone else");
            return Ok(None);
        }

        if !self.relays.propose(name).await {
            return self.abandon(owner, name, "propose").await;
        }
        if locks.refresh(owner, name, timeout).await?.is_none() {
            return self.abandon(owner, name, "extend after propose").await;
        }

        if !self.relays.schedule(name).await {
            return self.abandon(owner, name, "schedule").await;
        }
        if locks.refresh(owner, name, timeout).await?.is_none() {
            return self.abandon(owner, name, "extend after schedule").await;
        }

        if !self.relays.commit(name, timeout).await {
            return self.abandon(owner, name, "commit").await;
        }
        match locks.refresh(owner, name, timeout).await? {
            Some(lock) => {
                info!(lock = %name, owner, fence = %lock.fence, "Lock acquired");
                Ok(Some(lock))
            }
            None => self.abandon(owner, name, "extend after commit").await,
        }
    }

    async fn abandon(&self, owner: &str, name: &str, step: &str) -> Result<Option<Lock>> {
        debug!(lock = %name, owner, step, "Distributed acquisition failed");
        self.locks.release(owner, name).await?;
        Ok(None)
    }

    /// Release a lock held locally by `owner`
    pub async fn release(&self, owner: &str, name: &str) -> Result<()> {
        self.locks.release(owner, name).await
    }

    /// Bind the relay listener from configuration and serve until shutdown
    pub async fn run(self: Arc<Self>, shutdown: ShutdownSignal) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.config.relay_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve peers on `relay_listener` and clients once quorum is reached
    pub async fn serve(
        self: Arc<Self>,
        relay_listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> anyhow::Result<()> {
        let relay_addr = relay_listener.local_addr()?;
        info!(
            id = %self.config.id,
            version = %self.config.version,
            %relay_addr,
            members = ?self.config.relay.members,
            "Starting relaylock server"
        );

        let relay_task = tokio::spawn(self.relays.clone().serve(relay_listener));
        let maintenance = self.relays.start();
        if self.config.testing {
            tokio::spawn(self.clone().self_test(shutdown.clone()));
        }

        let result = self.clone().serve_clients(&shutdown).await;

        self.relays.stop();
        self.locks.stop().await;
        let _ = relay_task.await;
        let _ = maintenance.await;
        info!(id = %self.config.id, "Relaylock server stopped");
        result
    }

    async fn serve_clients(self: Arc<Self>, shutdown: &ShutdownSignal) -> anyhow::Result<()> {
        let mut quorum = self.relays.subscribe_quorum();
        info!("Waiting for relay quorum before accepting clients");
        let ready = run_with_shutdown(
            async { quorum.wait_for(|available| *available).await.is_ok() },
            shutdown,
        )
        .await;
        if ready != Some(true) {
            return Ok(());
        }

        let listener = TcpListener::bind(&self.config.client_addr).await?;
        let addr = listener.local_addr()?;
        self.client_addr.send_replace(Some(addr));
        info!(%addr, "Listening for clients");

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        if self.relays.can_have_quorum() {
                            tokio::spawn(client::handle_client(
                                self.clone(),
                                stream,
                                peer.to_string(),
                                shutdown.clone(),
                            ));
                        } else {
                            tokio::spawn(client::reject_client(stream, peer, "no quorum"));
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to accept client connection"),
                },
            }
        }

        Ok(())
    }

    async fn self_test(self: Arc<Self>, shutdown: ShutdownSignal) {
        let mut ticker = interval(self.config.testing_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    let result = self
                        .acquire_distributed(SELF_TEST_OWNER, SELF_TEST_LOCK, Duration::from_secs(60))
                        .await;
                    match result {
                        Ok(Some(lock)) => info!(fence = %lock.fence, "Self-test lock acquired"),
                        Ok(None) => info!("Self-test lock not acquired"),
                        Err(e) => warn!(error = %e, "Self-test lock failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standalone() -> Arc<Server> {
        Server::new(ServerConfig {
            id: "solo".to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_standalone_acquire() {
        let server = standalone();
        assert_eq!(server.relays().node_id(), "solo");

        let lock = server
            .acquire_distributed("client-1", "mylock", Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lock.owner, "client-1");
        assert!(lock.remaining() > Duration::from_secs(4));

        let denied = server
            .acquire_distributed("client-2", "mylock", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(denied.is_none());

        server.release("client-1", "mylock").await.unwrap();
        assert!(
            server
                .acquire_distributed("client-2", "mylock", Duration::from_secs(5))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_acquire_rejects_invalid_name() {
        let server = standalone();
        let err = server
            .acquire_distributed("client-1", "my lock", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayLockError::IllegalArgument(_)));
    }

    #[tokio::test]
    async fn test_acquire_without_quorum_releases_reservation() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let unreachable = listener.local_addr().unwrap().to_string();
        drop(listener);

        let server = Server::new(ServerConfig {
            id: "lonely".to_string(),
            relay: RelayManagerConfig {
                members: vec![unreachable],
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(!server.relays().can_have_quorum());

        let lock = server
            .acquire_distributed("client-1", "mylock", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(lock.is_none());
        assert_eq!(server.locks().check("mylock").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let server = Server::new(ServerConfig {
            id: "solo".to_string(),
            client_addr: "127.0.0.1:0".to_string(),
            ..Default::default()
        });
        let shutdown = ShutdownSignal::new();
        let relay_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut client_addr = server.subscribe_client_addr();

        let task = tokio::spawn(server.clone().serve(relay_listener, shutdown.clone()));
        tokio::time::timeout(Duration::from_secs(5), client_addr.wait_for(Option::is_some))
            .await
            .unwrap()
            .unwrap();

        shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(server.relays().is_stopped());
        assert!(server.locks().check("mylock").await.is_err());
    }

    #[tokio::test]
    async fn test_self_test_acquires_test_lock() {
        let server = Server::new(ServerConfig {
            id: "solo".to_string(),
            client_addr: "127.0.0.1:0".to_string(),
            testing: true,
            testing_interval: Duration::from_millis(20),
            ..Default::default()
        });
        let shutdown = ShutdownSignal::new();
        let relay_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let task = tokio::spawn(server.clone().serve(relay_listener, shutdown.clone()));

        let acquired = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let owner = server.locks().who_has(SELF_TEST_LOCK).await.unwrap();
                if owner.as_deref() == Some(SELF_TEST_OWNER) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(acquired.is_ok());

        shutdown.shutdown();
        task.await.unwrap().unwrap();
    }
}
