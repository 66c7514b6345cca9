//! Lock manager
//!
//! Callers talk to a single worker task through a request channel and wait
//! on a oneshot reply. The worker owns the lock table and the per-name wait
//! queues and sweeps the queues on a short fixed interval.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use relaylock_common::{RelayLockError, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, info};

use super::model::{FenceGenerator, Lock, LockStats};

/// Lock manager settings
#[derive(Debug, Clone)]
pub struct LockManagerConfig {
    /// How often queued acquires are re-checked
    pub sweep_interval: Duration,
    /// Capacity of the request channel into the worker
    pub channel_capacity: usize,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_millis(10),
            channel_capacity: 1024,
        }
    }
}

enum LockCommand {
    Acquire {
        owner: String,
        name: String,
        timeout: Duration,
        reply: oneshot::Sender<Lock>,
    },
    TryAcquire {
        owner: String,
        name: String,
        timeout: Duration,
        reply: oneshot::Sender<Option<Lock>>,
    },
    Check {
        name: String,
        reply: oneshot::Sender<Option<String>>,
    },
    WhoHas {
        name: String,
        reply: oneshot::Sender<Option<String>>,
    },
    Refresh {
        owner: String,
        name: String,
        timeout: Duration,
        reply: oneshot::Sender<Option<Lock>>,
    },
    Release {
        owner: String,
        name: String,
        reply: oneshot::Sender<()>,
    },
    Stats {
        reply: oneshot::Sender<LockStats>,
    },
    Stop,
}

/// Handle to a running lock store
///
/// Cloning is cheap; all clones feed the same worker.
#[derive(Clone)]
pub struct LockManager {
    tx: mpsc::Sender<LockCommand>,
}

impl LockManager {
    /// Spawn the worker on the current runtime
    pub fn start(config: LockManagerConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let handle = tokio::spawn(run_worker(rx, config.sweep_interval));
        (Self { tx }, handle)
    }

    /// Wait until `name` is granted to `owner`
    ///
    /// Returns the existing lock unchanged when `owner` already holds it.
    pub async fn acquire(&self, owner: &str, name: &str, timeout: Duration) -> Result<Lock> {
        let (reply, rx) = oneshot::channel();
        self.send(LockCommand::Acquire {
            owner: owner.to_string(),
            name: name.to_string(),
            timeout,
            reply,
        })
        .await?;
        rx.await.map_err(|_| closed())
    }

    /// Grant `name` only if it is free or already held by `owner`
    pub async fn try_acquire(
        &self,
        owner: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<Lock>> {
        let (reply, rx) = oneshot::channel();
        self.send(LockCommand::TryAcquire {
            owner: owner.to_string(),
            name: name.to_string(),
            timeout,
            reply,
        })
        .await?;
        rx.await.map_err(|_| closed())
    }

    /// Fence token of the current unexpired holder
    pub async fn check(&self, name: &str) -> Result<Option<String>> {
        let (reply, rx) = oneshot::channel();
        self.send(LockCommand::Check {
            name: name.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| closed())
    }

    /// Owner id of the current unexpired holder
    pub async fn who_has(&self, name: &str) -> Result<Option<String>> {
        let (reply, rx) = oneshot::channel();
        self.send(LockCommand::WhoHas {
            name: name.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| closed())
    }

    /// Push the expiry of a held lock to `now + timeout`
    ///
    /// Returns `None` unless `owner` is the current unexpired holder.
    pub async fn refresh(
        &self,
        owner: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<Lock>> {
        let (reply, rx) = oneshot::channel();
        self.send(LockCommand::Refresh {
            owner: owner.to_string(),
            name: name.to_string(),
            timeout,
            reply,
        })
        .await?;
        rx.await.map_err(|_| closed())
    }

    /// Drop the lock if `owner` holds it; otherwise nothing happens
    pub async fn release(&self, owner: &str, name: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(LockCommand::Release {
            owner: owner.to_string(),
            name: name.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| closed())
    }

    pub async fn stats(&self) -> Result<LockStats> {
        let (reply, rx) = oneshot::channel();
        self.send(LockCommand::Stats { reply }).await?;
        rx.await.map_err(|_| closed())
    }

    /// Stop the worker; later calls fail with a closed error
    pub async fn stop(&self) {
        let _ = self.tx.send(LockCommand::Stop).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, command: LockCommand) -> Result<()> {
        self.tx.send(command).await.map_err(|_| closed())
    }
}

fn closed() -> RelayLockError {
    RelayLockError::Closed("lock manager stopped".to_string())
}

struct Waiter {
    owner: String,
    timeout: Duration,
    reply: oneshot::Sender<Lock>,
}

#[derive(Default)]
struct LockTable {
    locks: HashMap<String, Lock>,
    queues: HashMap<String, VecDeque<Waiter>>,
    fences: FenceGenerator,
    grants: u64,
}

impl LockTable {
    fn holder(&self, name: &str, now: Instant) -> Option<&Lock> {
        self.locks.get(name).filter(|lock| !lock.is_expired_at(now))
    }

    fn grant(&mut self, owner: String, name: &str, timeout: Duration, now: Instant) -> Lock {
        let lock = Lock {
            name: name.to_string(),
            fence: self.fences.next_fence().to_string(),
            owner,
            expires_at: now + timeout,
        };
        debug!(lock = %name, owner = %lock.owner, fence = %lock.fence, "Lock granted");
        self.locks.insert(name.to_string(), lock.clone());
        self.grants += 1;
        metrics::counter!("relaylock_lock_grants_total").increment(1);
        lock
    }

    /// Grant `name` to `owner` if possible, without queueing
    fn try_grant(&mut self, owner: &str, name: &str, timeout: Duration) -> Option<Lock> {
        self.drain_queue(name);
        let now = Instant::now();
        match self.holder(name, now) {
            None => Some(self.grant(owner.to_string(), name, timeout, now)),
            Some(lock) if lock.owner == owner => {
                debug!(lock = %name, owner, "Lock re-requested by its holder");
                Some(lock.clone())
            }
            Some(_) => None,
        }
    }

    /// Hand `name` to queued waiters in arrival order while it is free
    fn drain_queue(&mut self, name: &str) {
        let Some(mut queue) = self.queues.remove(name) else {
            return;
        };
        while let Some(waiter) = queue.front() {
            if waiter.reply.is_closed() {
                queue.pop_front();
                continue;
            }
            let now = Instant::now();
            let lock = match self.holder(name, now) {
                None => {
                    let Some(waiter) = queue.pop_front() else {
                        break;
                    };
                    debug!(lock = %name, "Lock free, giving it to the next one in queue");
                    let lock = self.grant(waiter.owner, name, waiter.timeout, now);
                    if waiter.reply.send(lock).is_err() {
                        self.locks.remove(name);
                    }
                    continue;
                }
                Some(lock) if lock.owner == waiter.owner => lock.clone(),
                Some(_) => break,
            };
            if let Some(waiter) = queue.pop_front() {
                let _ = waiter.reply.send(lock);
            }
        }
        if !queue.is_empty() {
            self.queues.insert(name.to_string(), queue);
        }
    }

    fn handle(&mut self, command: LockCommand) {
        match command {
            LockCommand::Acquire {
                owner,
                name,
                timeout,
                reply,
            } => match self.try_grant(&owner, &name, timeout) {
                Some(lock) => {
                    let _ = reply.send(lock);
                }
                None => {
                    debug!(lock = %name, owner = %owner, "Lock taken, request queued");
                    self.queues.entry(name).or_default().push_back(Waiter {
                        owner,
                        timeout,
                        reply,
                    });
                }
            },
            LockCommand::TryAcquire {
                owner,
                name,
                timeout,
                reply,
            } => {
                let lock = self.try_grant(&owner, &name, timeout);
                if lock.is_none() {
                    debug!(lock = %name, owner = %owner, "Lock taken, request did not want to wait");
                }
                let _ = reply.send(lock);
            }
            LockCommand::Check { name, reply } => {
                let fence = self
                    .holder(&name, Instant::now())
                    .map(|lock| lock.fence.clone());
                let _ = reply.send(fence);
            }
            LockCommand::WhoHas { name, reply } => {
                let owner = self
                    .holder(&name, Instant::now())
                    .map(|lock| lock.owner.clone());
                let _ = reply.send(owner);
            }
            LockCommand::Refresh {
                owner,
                name,
                timeout,
                reply,
            } => {
                let now = Instant::now();
                let refreshed = match self.locks.get_mut(&name) {
                    Some(lock) if lock.owner == owner && !lock.is_expired_at(now) => {
                        lock.expires_at = now + timeout;
                        Some(lock.clone())
                    }
                    _ => None,
                };
                let _ = reply.send(refreshed);
            }
            LockCommand::Release { owner, name, reply } => {
                if self
                    .locks
                    .get(&name)
                    .is_some_and(|lock| lock.owner == owner)
                {
                    self.locks.remove(&name);
                    debug!(lock = %name, owner = %owner, "Lock released");
                    self.drain_queue(&name);
                }
                let _ = reply.send(());
            }
            LockCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            LockCommand::Stop => {}
        }
    }

    fn sweep(&mut self) {
        let names: Vec<String> = self.queues.keys().cloned().collect();
        for name in names {
            self.drain_queue(&name);
        }
        let now = Instant::now();
        let queues = &self.queues;
        self.locks
            .retain(|name, lock| !lock.is_expired_at(now) || queues.contains_key(name));
        self.publish_gauges();
    }

    fn stats(&self) -> LockStats {
        let now = Instant::now();
        LockStats {
            held: self
                .locks
                .values()
                .filter(|lock| !lock.is_expired_at(now))
                .count(),
            queued: self.queues.values().map(VecDeque::len).sum(),
            grants: self.grants,
        }
    }

    fn publish_gauges(&self) {
        let stats = self.stats();
        metrics::gauge!("relaylock_locks_held").set(stats.held as f64);
        metrics::gauge!("relaylock_lock_queue_depth").set(stats.queued as f64);
    }
}

async fn run_worker(mut rx: mpsc::Receiver<LockCommand>, sweep_interval: Duration) {
    let mut table = LockTable::default();
    let mut sweep = interval(sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(LockCommand::Stop) | None => break,
                Some(command) => table.handle(command),
            },
            _ = sweep.tick() => table.sweep(),
        }
    }

    info!(
        held = table.locks.len(),
        queued = table.queues.values().map(VecDeque::len).sum::<usize>(),
        "LockManager quitting"
    );
}
