//! Peer directory
//!
//! Keeps one live link per configured peer, tracks whether enough peers are
//! reachable to form a quorum and runs the Propose, Schedule and Commit
//! phases of a distributed lock attempt against every live link.
//!
//! This is a quorum handshake, not consensus. Two nodes proposing the same
//! lock at the same time may both see it as free; the per-peer reservation
//! taken while answering is the only tie-breaker.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use relaylock_api::{MessageRegistry, PhaseStatus, ProposeStatus, RelayMessage};
use relaylock_common::{DEFAULT_VERSION, RelayLockError, Result};
use relaylock_consistency::LockManager;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};

use super::relay::{Relay, RelayContext, RelayObserver};

/// Smallest number of agreeing nodes forming a strict majority of `servers`
///
/// Exact halves round up, so two nodes need both.
pub fn quorum(servers: usize) -> usize {
    (servers as f64 / 100.0 * 50.01).ceil() as usize
}

#[derive(Debug, Clone)]
pub struct RelayManagerConfig {
    pub node_id: String,
    pub version: String,
    /// Configured peer addresses, possibly including this node
    pub members: Vec<String>,
    /// How long each phase waits for a peer answer
    pub wait_timeout: Duration,
    /// Period of the connectivity check
    pub check_interval: Duration,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Lifetime of reservations taken while answering PROP and SCHED
    pub provisional_timeout: Duration,
    /// Log connected relays every this many checks; 0 disables
    pub status_log_every: u64,
}

impl Default for RelayManagerConfig {
    fn default() -> Self {
        Self {
            node_id: "server-on-port-20000".to_string(),
            version: DEFAULT_VERSION.to_string(),
            members: Vec::new(),
            wait_timeout: Duration::from_secs(1),
            check_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(1),
            provisional_timeout: Duration::from_secs(1),
            status_log_every: 60,
        }
    }
}

#[derive(Default)]
struct DirectoryState {
    /// Learned address -> node id
    ids: HashMap<String, String>,
    /// Node id -> registered link
    relays: HashMap<String, Arc<Relay>>,
    /// Addresses with a dial in flight
    dialing: HashSet<String>,
    quorum_need: usize,
    self_seen: bool,
}

impl DirectoryState {
    fn live_count(&self) -> usize {
        self.relays.values().filter(|relay| relay.is_alive()).count()
    }

    fn missing(&self, members: &[String], node_id: &str) -> Vec<String> {
        members
            .iter()
            .filter(|addr| !self.dialing.contains(*addr))
            .filter(|addr| match self.ids.get(*addr) {
                None => true,
                Some(id) if id == node_id => false,
                Some(id) => !self.relays.get(id).is_some_and(|relay| relay.is_alive()),
            })
            .cloned()
            .collect()
    }
}

pub struct RelayManager {
    config: RelayManagerConfig,
    context: Arc<RelayContext>,
    state: Mutex<DirectoryState>,
    quorum_tx: watch::Sender<bool>,
    shutdown_tx: watch::Sender<bool>,
    checking: AtomicBool,
    cycles: AtomicU64,
    weak_self: Weak<RelayManager>,
}

impl RelayManager {
    pub fn new(
        config: RelayManagerConfig,
        locks: LockManager,
        registry: Arc<MessageRegistry<RelayMessage>>,
    ) -> Arc<Self> {
        let standalone = config.members.is_empty();
        let quorum_need = if standalone {
            0
        } else {
            quorum(config.members.len() + 1)
        };
        let (quorum_tx, _) = watch::channel(standalone);
        let (shutdown_tx, shutdown) = watch::channel(false);

        let context = Arc::new(RelayContext {
            node_id: config.node_id.clone(),
            version: config.version.clone(),
            locks,
            registry,
            provisional_timeout: config.provisional_timeout,
            shutdown,
        });

        info!(
            id = %config.node_id,
            members = config.members.len(),
            quorum_need,
            standalone,
            "Relay manager created"
        );

        Arc::new_cyclic(|weak_self| Self {
            config,
            context,
            state: Mutex::new(DirectoryState {
                quorum_need,
                ..Default::default()
            }),
            quorum_tx,
            shutdown_tx,
            checking: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            weak_self: weak_self.clone(),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn is_standalone(&self) -> bool {
        self.config.members.is_empty()
    }

    pub fn quorum_need(&self) -> usize {
        self.state.lock().quorum_need
    }

    pub fn can_have_quorum(&self) -> bool {
        *self.quorum_tx.borrow()
    }

    /// Watch quorum availability
    pub fn subscribe_quorum(&self) -> watch::Receiver<bool> {
        self.quorum_tx.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Live registered links
    pub fn relays(&self) -> Vec<Arc<Relay>> {
        self.state
            .lock()
            .relays
            .values()
            .filter(|relay| relay.is_alive())
            .cloned()
            .collect()
    }

    pub fn relay_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .relays()
            .iter()
            .filter_map(|relay| relay.peer_id())
            .collect();
        ids.sort();
        ids
    }

    fn observer(&self) -> Weak<dyn RelayObserver> {
        let observer: Weak<dyn RelayObserver> = self.weak_self.clone();
        observer
    }

    /// Start the periodic connectivity check
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = self.clone();
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(manager.config.check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.wait_for(|stop| *stop) => break,
                    _ = ticker.tick() => {
                        tokio::spawn(manager.clone().check_relays());
                    }
                }
            }

            debug!("Relay maintenance stopped");
        })
    }

    /// Accept peer connections until the manager stops
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown_tx.subscribe();
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "Listening for relays");
        }

        loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        self.accept(stream, peer.to_string());
                    }
                    Err(e) => warn!(error = %e, "Failed to accept relay connection"),
                },
            }
        }
    }

    /// Wrap an inbound connection; it registers itself once the peer says HELLO
    pub fn accept<S>(&self, stream: S, addr: String) -> Arc<Relay>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        debug!(relay = %addr, "Incoming relay connection");
        Relay::spawn(stream, addr, false, self.context.clone(), self.observer())
    }

    /// Dial every configured peer without a live link
    pub async fn check_relays(self: Arc<Self>) {
        if self.checking.swap(true, Ordering::AcqRel) {
            return;
        }

        let missing = {
            let mut state = self.state.lock();
            let missing = state.missing(&self.config.members, &self.config.node_id);
            state.dialing.extend(missing.iter().cloned());
            missing
        };

        join_all(missing.into_iter().map(|addr| self.clone().connect(addr))).await;
        self.update_quorum();

        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let every = self.config.status_log_every;
        if every > 0 && cycle % every == 0 {
            let ids = self.relay_ids();
            info!(count = ids.len(), relays = ?ids, "Relays connected");
        }

        self.checking.store(false, Ordering::Release);
    }

    async fn connect(self: Arc<Self>, addr: String) {
        debug!(relay = %addr, "Connecting to relay");
        if let Err(e) = self.try_connect(&addr).await {
            debug!(relay = %addr, error = %e, "Failed to connect to relay");
        }
        self.state.lock().dialing.remove(&addr);
    }

    async fn try_connect(&self, addr: &str) -> Result<()> {
        let stream = timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RelayLockError::Timeout(format!("connecting to {}", addr)))??;
        let _ = stream.set_nodelay(true);

        let relay = Relay::spawn(stream, addr, true, self.context.clone(), self.observer());
        let id = match relay.greet(self.config.handshake_timeout).await {
            Ok(id) => id,
            Err(e) => {
                relay.close();
                return Err(e);
            }
        };
        debug!(relay = %addr, peer = %id, "Finished saying hellos");

        self.state.lock().ids.insert(addr.to_string(), id.clone());

        if id == self.config.node_id {
            self.mark_self_seen();
            relay.close();
        } else if self.register(&relay) {
            info!(relay = %addr, peer = %id, "Outgoing relay connection established");
        } else {
            debug!(peer = %id, "Already had a connection, disconnecting");
            relay.close();
        }
        Ok(())
    }

    /// Node id of whichever side dialed `relay`
    fn dialer_of<'a>(&'a self, relay: &Relay, peer_id: &'a str) -> &'a str {
        if relay.is_outbound() {
            &self.config.node_id
        } else {
            peer_id
        }
    }

    /// Add an identified link to the table
    ///
    /// Links to this node are refused. When a live link to the same peer
    /// already exists, both ends keep the connection dialed by the node with
    /// the smaller id, so simultaneous dials settle on one connection.
    fn register(&self, relay: &Arc<Relay>) -> bool {
        let Some(id) = relay.peer_id() else {
            return false;
        };

        if id == self.config.node_id {
            self.mark_self_seen();
            return false;
        }
        if !relay.is_alive() {
            return false;
        }

        let replaced = {
            let mut state = self.state.lock();
            match state.relays.get(&id) {
                Some(existing) if Arc::ptr_eq(existing, relay) => return true,
                Some(existing) if existing.is_alive() => {
                    let keep_new = self.dialer_of(relay, &id) < self.dialer_of(existing, &id);
                    if !keep_new {
                        return false;
                    }
                    state.relays.insert(id.clone(), relay.clone())
                }
                _ => state.relays.insert(id.clone(), relay.clone()),
            }
        };

        if let Some(old) = replaced {
            if !Arc::ptr_eq(&old, relay) {
                old.close();
            }
        }
        self.update_quorum();
        true
    }

    fn mark_self_seen(&self) {
        {
            let mut state = self.state.lock();
            if state.self_seen {
                return;
            }
            state.self_seen = true;
            state.quorum_need = quorum(self.config.members.len());
            info!(quorum_need = state.quorum_need, "Found self in member list");
        }
        self.update_quorum();
    }

    fn update_quorum(&self) {
        let (live, need) = {
            let state = self.state.lock();
            (state.live_count(), state.quorum_need)
        };
        let available = self.is_standalone() || live >= need;

        metrics::gauge!("relaylock_relays_connected").set(live as f64);
        metrics::gauge!("relaylock_quorum_available").set(if available { 1.0 } else { 0.0 });

        let changed = self.quorum_tx.send_if_modified(|current| {
            if *current == available {
                false
            } else {
                *current = available;
                true
            }
        });
        if changed {
            if available {
                info!(live, need, "Quorum available");
            } else {
                warn!(live, need, "Quorum lost");
            }
        }
    }

    /// Send one request over every live link and collect the answers
    ///
    /// Each entry is `None` when that peer did not answer within the wait
    /// timeout.
    pub async fn get_relay_responses(&self, request: RelayMessage) -> Vec<Option<RelayMessage>> {
        let relays = self.relays();
        let wait = self.config.wait_timeout;
        join_all(relays.iter().map(|relay| relay.request(request.clone(), wait))).await
    }

    /// Ask every peer whether `name` is free
    pub async fn propose(&self, name: &str) -> bool {
        if !self.can_have_quorum() {
            warn!(lock = %name, "Can't have quorum, not going to propose locking");
            return false;
        }
        let responses = self
            .get_relay_responses(RelayMessage::Prop {
                lock: name.to_string(),
                nonce: String::new(),
            })
            .await;
        let ok = responses
            .iter()
            .filter(|response| {
                matches!(
                    response,
                    Some(RelayMessage::Stat {
                        status: ProposeStatus::Free,
                        ..
                    })
                )
            })
            .count();
        self.phase_outcome("propose", name, ok, responses.len())
    }

    /// Ask every peer to confirm `name` is still free
    pub async fn schedule(&self, name: &str) -> bool {
        if !self.can_have_quorum() {
            warn!(lock = %name, "Can't have quorum, not going to schedule locking");
            return false;
        }
        let responses = self
            .get_relay_responses(RelayMessage::Sched {
                lock: name.to_string(),
                nonce: String::new(),
            })
            .await;
        let ok = responses
            .iter()
            .filter(|response| {
                matches!(
                    response,
                    Some(RelayMessage::Ack {
                        status: PhaseStatus::Ok,
                        ..
                    })
                )
            })
            .count();
        self.phase_outcome("schedule", name, ok, responses.len())
    }

    /// Ask every peer to grant `name` to this node for `lock_timeout`
    pub async fn commit(&self, name: &str, lock_timeout: Duration) -> bool {
        if !self.can_have_quorum() {
            warn!(lock = %name, "Can't have quorum, can't commit lock");
            return false;
        }
        let responses = self
            .get_relay_responses(RelayMessage::Comm {
                lock: name.to_string(),
                timeout: lock_timeout,
                nonce: String::new(),
            })
            .await;
        let ok = responses
            .iter()
            .filter(|response| {
                matches!(
                    response,
                    Some(RelayMessage::Conf {
                        status: PhaseStatus::Ok,
                        ..
                    })
                )
            })
            .count();
        self.phase_outcome("commit", name, ok, responses.len())
    }

    fn phase_outcome(&self, phase: &'static str, name: &str, ok: usize, asked: usize) -> bool {
        let need = self.quorum_need();
        let reached = ok >= need;
        let outcome = if reached { "ok" } else { "failed" };
        metrics::counter!("relaylock_agreement_phase_total", "phase" => phase, "outcome" => outcome)
            .increment(1);
        debug!(lock = %name, phase, ok, asked, need, outcome, "Agreement phase finished");
        reached
    }

    /// Stop dialing and accepting, and close every link
    pub fn stop(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        let relays: Vec<Arc<Relay>> = self.state.lock().relays.drain().map(|(_, r)| r).collect();
        info!(count = relays.len(), "Stopping relay manager");
        for relay in relays {
            relay.close();
        }
        self.update_quorum();
    }
}

impl RelayObserver for RelayManager {
    fn on_identified(&self, relay: &Arc<Relay>) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.register(relay)
    }

    fn on_closed(&self, relay: &Relay) {
        let removed = {
            let mut state = self.state.lock();
            match relay.peer_id() {
                Some(id)
                    if state
                        .relays
                        .get(&id)
                        .is_some_and(|current| std::ptr::eq(current.as_ref(), relay)) =>
                {
                    state.relays.remove(&id);
                    true
                }
                _ => false,
            }
        };
        if removed {
            info!(relay = %relay.addr(), peer = ?relay.peer_id(), "Relay disconnected");
            self.update_quorum();
        }
    }
}
