//! Lock data model

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// A granted lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    /// Lock name
    pub name: String,
    /// Fence token handed to the owner, ordered by grant time
    pub fence: String,
    /// Client session id, or `relay:<peer id>` for peer grants
    pub owner: String,
    /// Monotonic expiry instant
    pub expires_at: Instant,
}

impl Lock {
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at <= now
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Snapshot of the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockStats {
    /// Unexpired locks
    pub held: usize,
    /// Acquire requests waiting in any queue
    pub queued: usize,
    /// Grants since start
    pub grants: u64,
}

/// Produces fence tokens
///
/// Tokens are the wall-clock nanoseconds captured at construction plus the
/// monotonic time elapsed since then, bumped so every token is strictly
/// greater than the previous one. They are only unique within one process.
#[derive(Debug)]
pub struct FenceGenerator {
    epoch_nanos: u64,
    anchor: Instant,
    last: u64,
}

impl FenceGenerator {
    pub fn new() -> Self {
        let epoch_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self {
            epoch_nanos,
            anchor: Instant::now(),
            last: 0,
        }
    }

    pub fn next_fence(&mut self) -> u64 {
        let elapsed = self.anchor.elapsed().as_nanos() as u64;
        let now = self.epoch_nanos.saturating_add(elapsed);
        self.last = now.max(self.last + 1);
        self.last
    }
}

impl Default for FenceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fences_strictly_increase() {
        let mut fences = FenceGenerator::new();
        let first = fences.next_fence();
        // Paused clock: no time passes between these calls
        let second = fences.next_fence();
        assert!(second > first);

        tokio::time::advance(Duration::from_millis(5)).await;
        let third = fences.next_fence();
        assert!(third >= first + 5_000_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_expiry() {
        let lock = Lock {
            name: "mylock".to_string(),
            fence: "1".to_string(),
            owner: "client-1".to_string(),
            expires_at: Instant::now() + Duration::from_millis(100),
        };
        assert!(!lock.is_expired_at(Instant::now()));
        assert_eq!(lock.remaining(), Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(lock.is_expired_at(Instant::now()));
        assert_eq!(lock.remaining(), Duration::ZERO);
    }
}
