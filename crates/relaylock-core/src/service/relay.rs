//! Peer link
//!
//! One `Relay` wraps one peer connection. A reader task decodes frames and
//! either hands responses to whoever is waiting on their nonce or answers
//! peer requests against the local lock store. A writer task drains a single
//! outbound queue, so frames leave in the order they were sent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use relaylock_api::frame::to_bytes;
use relaylock_api::{
    Correlated, Message, MessageRegistry, PhaseStatus, ProposeStatus, RelayMessage,
};
use relaylock_common::{
    NonceGenerator, RelayLockError, Result, is_relay_owner, relay_owner_id,
};
use relaylock_consistency::LockManager;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Receives identity and close notifications from links
pub trait RelayObserver: Send + Sync {
    /// An inbound peer introduced itself; returning false rejects the link
    fn on_identified(&self, relay: &Arc<Relay>) -> bool;

    /// The link closed; called once per link
    fn on_closed(&self, relay: &Relay);
}

/// Node-wide state every link needs to answer peer requests
pub struct RelayContext {
    pub node_id: String,
    pub version: String,
    pub locks: LockManager,
    pub registry: Arc<MessageRegistry<RelayMessage>>,
    /// Lifetime of reservations taken for PROP and SCHED
    pub provisional_timeout: Duration,
    /// Flips to true when the node shuts down
    pub shutdown: watch::Receiver<bool>,
}

struct Outgoing {
    frame: Vec<u8>,
    done: oneshot::Sender<Result<()>>,
}

pub struct Relay {
    addr: String,
    outbound: bool,
    id: RwLock<Option<String>>,
    context: Arc<RelayContext>,
    observer: Weak<dyn RelayObserver>,
    writer: mpsc::Sender<Outgoing>,
    pending: DashMap<String, oneshot::Sender<RelayMessage>>,
    nonces: NonceGenerator,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl Relay {
    /// Wrap a connected stream and start its reader and writer tasks
    pub fn spawn<S>(
        stream: S,
        addr: impl Into<String>,
        outbound: bool,
        context: Arc<RelayContext>,
        observer: Weak<dyn RelayObserver>,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::channel(64);
        let (closed_tx, _) = watch::channel(false);

        let relay = Arc::new(Self {
            addr: addr.into(),
            outbound,
            id: RwLock::new(None),
            context,
            observer,
            writer: tx,
            pending: DashMap::new(),
            nonces: NonceGenerator::new(),
            closed: AtomicBool::new(false),
            closed_tx,
        });

        tokio::spawn(relay.clone().write_loop(writer, rx));
        tokio::spawn(relay.clone().read_loop(reader));
        relay
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_outbound(&self) -> bool {
        self.outbound
    }

    /// Identity learned from the handshake
    pub fn peer_id(&self) -> Option<String> {
        self.id.read().clone()
    }

    pub fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    pub fn next_nonce(&self) -> String {
        self.nonces.next_nonce()
    }

    /// Register interest in the response carrying `nonce`
    ///
    /// Must be called before the request is sent. The first matching response
    /// consumes the registration.
    pub fn expect(&self, nonce: &str) -> oneshot::Receiver<RelayMessage> {
        let (tx, rx) = oneshot::channel();
        if self.pending.insert(nonce.to_string(), tx).is_some() {
            debug!(relay = %self.addr, nonce, "Replaced an earlier waiter for nonce");
        }
        rx
    }

    /// Drop a registration, e.g. after the caller gave up waiting
    pub fn forget(&self, nonce: &str) {
        self.pending.remove(nonce);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn got_response(&self, msg: RelayMessage) {
        match self.pending.remove(msg.nonce()) {
            Some((_, waiter)) => {
                let _ = waiter.send(msg);
            }
            None => debug!(relay = %self.addr, response = %msg, "No one waiting for response"),
        }
    }

    /// Queue a message and wait until it has been written
    pub async fn send<M: Message>(&self, msg: &M) -> Result<()> {
        self.send_frame(msg.to_bytes()).await
    }

    async fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        if !self.is_alive() {
            return Err(self.closed_error());
        }
        let (done, written) = oneshot::channel();
        self.writer
            .send(Outgoing { frame, done })
            .await
            .map_err(|_| self.closed_error())?;
        written.await.map_err(|_| self.closed_error())?
    }

    /// Send a request and wait up to `wait` for its response
    ///
    /// The nonce is assigned here. `wait` bounds the write as well as the
    /// answer, so a peer that stops reading cannot stall the caller. Returns
    /// `None` on timeout or if the link closes first.
    pub async fn request(&self, mut msg: RelayMessage, wait: Duration) -> Option<RelayMessage> {
        let nonce = self.next_nonce();
        msg.set_nonce(nonce.clone());
        let response = self.expect(&nonce);

        let exchange = async {
            if let Err(e) = self.send(&msg).await {
                debug!(relay = %self.addr, error = %e, "Failed to send request");
                return None;
            }
            response.await.ok()
        };

        match tokio::time::timeout(wait, exchange).await {
            Ok(Some(response)) => Some(response),
            Ok(None) => {
                self.forget(&nonce);
                None
            }
            Err(_) => {
                debug!(relay = %self.addr, request = %msg, "Timed out waiting for response");
                self.forget(&nonce);
                None
            }
        }
    }

    /// Introduce this node on an outbound link and learn the peer's id
    pub async fn greet(&self, wait: Duration) -> Result<String> {
        let hello = RelayMessage::Hello {
            id: self.context.node_id.clone(),
            version: self.context.version.clone(),
            nonce: String::new(),
        };
        match self.request(hello, wait).await {
            Some(RelayMessage::Howdy { id, version, .. }) => {
                if version != self.context.version {
                    warn!(relay = %self.addr, peer = %id, %version, "Peer runs a different version");
                }
                *self.id.write() = Some(id.clone());
                Ok(id)
            }
            Some(other) => Err(RelayLockError::Protocol(format!(
                "expected HOWDY from {}, got {}",
                self.addr, other
            ))),
            None => Err(RelayLockError::Timeout(format!(
                "no handshake reply from {}",
                self.addr
            ))),
        }
    }

    /// Close the link; only the first call has an effect
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closed_tx.send_replace(true);
        // Dropping the senders wakes every waiter with "no response"
        self.pending.clear();
        debug!(relay = %self.addr, id = ?self.peer_id(), "Relay closed");
        if let Some(observer) = self.observer.upgrade() {
            observer.on_closed(self);
        }
    }

    fn closed_error(&self) -> RelayLockError {
        RelayLockError::Closed(self.addr.clone())
    }

    async fn write_loop<W>(self: Arc<Self>, mut writer: W, mut rx: mpsc::Receiver<Outgoing>)
    where
        W: AsyncWrite + Unpin,
    {
        let mut closed = self.closed_tx.subscribe();
        loop {
            let outgoing = tokio::select! {
                _ = closed.wait_for(|closed| *closed) => break,
                outgoing = rx.recv() => match outgoing {
                    Some(outgoing) => outgoing,
                    None => break,
                },
            };

            let mut frame = outgoing.frame;
            frame.push(b'\n');
            let result = match writer.write_all(&frame).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            };
            let failed = result.is_err();
            let _ = outgoing.done.send(result.map_err(RelayLockError::from));
            if failed {
                warn!(relay = %self.addr, "Failed to write to relay");
                break;
            }
        }

        let _ = writer.shutdown().await;
        self.close();
    }

    async fn read_loop<R>(self: Arc<Self>, reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        let mut closed = self.closed_tx.subscribe();
        let mut shutdown = self.context.shutdown.clone();

        loop {
            let line = tokio::select! {
                _ = closed.wait_for(|closed| *closed) => break,
                _ = shutdown.wait_for(|stop| *stop) => break,
                line = lines.next_line() => line,
            };

            match line {
                Ok(Some(line)) => {
                    if !self.dispatch(&line).await {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(relay = %self.addr, "Relay disconnected");
                    break;
                }
                Err(e) => {
                    debug!(relay = %self.addr, error = %e, "Failed to read from relay");
                    break;
                }
            }
        }

        self.close();
    }

    /// Handle one inbound frame; returns false when the link must close
    async fn dispatch(self: &Arc<Self>, line: &str) -> bool {
        if line.starts_with("ERR") {
            warn!(relay = %self.addr, message = %line, "Relay reported an error");
            return false;
        }

        let msg = match self.context.registry.decode(line.as_bytes()) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(relay = %self.addr, error = %e, "Invalid message from relay");
                let _ = self.send_frame(to_bytes("ERR", &[e.to_string()])).await;
                return false;
            }
        };

        if msg.is_response() {
            self.got_response(msg);
            return true;
        }

        match self.handle_request(msg).await {
            Ok(keep_open) => keep_open,
            Err(e) => {
                debug!(relay = %self.addr, error = %e, "Failed to answer relay request");
                false
            }
        }
    }

    /// Owner id used for locks taken on behalf of the peer
    fn peer_owner(&self) -> Option<String> {
        self.id.read().as_deref().map(relay_owner_id)
    }

    async fn handle_request(self: &Arc<Self>, msg: RelayMessage) -> Result<bool> {
        let locks = &self.context.locks;
        let provisional = self.context.provisional_timeout;

        match msg {
            RelayMessage::Hello { id, version, nonce } => {
                info!(relay = %self.addr, peer = %id, %version, "Relay introduced itself");
                *self.id.write() = Some(id);
                let accepted = match self.observer.upgrade() {
                    Some(observer) => observer.on_identified(self),
                    None => false,
                };
                self.send(&RelayMessage::Howdy {
                    nonce,
                    id: self.context.node_id.clone(),
                    version: self.context.version.clone(),
                })
                .await?;
                Ok(accepted)
            }
            RelayMessage::Prop { lock, nonce } => {
                let status = match self.peer_owner() {
                    Some(owner) => {
                        if locks.try_acquire(&owner, &lock, provisional).await?.is_some() {
                            ProposeStatus::Free
                        } else {
                            match locks.who_has(&lock).await? {
                                Some(holder) if is_relay_owner(&holder) => {
                                    ProposeStatus::HeldByOtherPeer
                                }
                                _ => ProposeStatus::HeldByResponder,
                            }
                        }
                    }
                    None => ProposeStatus::HeldByResponder,
                };
                debug!(relay = %self.addr, lock = %lock, ?status, "Answering proposal");
                self.send(&RelayMessage::Stat { nonce, status }).await?;
                Ok(true)
            }
            RelayMessage::Sched { lock, nonce } => {
                let ok = match self.peer_owner() {
                    Some(owner) => locks.try_acquire(&owner, &lock, provisional).await?.is_some(),
                    None => false,
                };
                debug!(relay = %self.addr, lock = %lock, ok, "Answering schedule");
                self.send(&RelayMessage::Ack {
                    nonce,
                    status: PhaseStatus::from_bool(ok),
                })
                .await?;
                Ok(true)
            }
            RelayMessage::Comm {
                lock,
                timeout,
                nonce,
            } => {
                let ok = match self.peer_owner() {
                    Some(owner) => {
                        locks.try_acquire(&owner, &lock, timeout).await?.is_some()
                            && locks.refresh(&owner, &lock, timeout).await?.is_some()
                    }
                    None => false,
                };
                debug!(relay = %self.addr, lock = %lock, ok, "Answering commit");
                self.send(&RelayMessage::Conf {
                    nonce,
                    status: PhaseStatus::from_bool(ok),
                })
                .await?;
                Ok(true)
            }
            RelayMessage::Off { lock, .. } => {
                debug!(relay = %self.addr, lock = %lock, "Ignoring relay release request");
                Ok(true)
            }
            response => {
                self.got_response(response);
                Ok(true)
            }
        }
    }
}
