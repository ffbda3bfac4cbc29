//! Allow-list check and "Access denied" flood protection.
//!
//! Denied users get a reply at most once per cooldown; later attempts are
//! only counted, so a stranger spamming the bot cannot get it throttled by
//! Telegram.

use moka::future::Cache;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Allow-list plus a cooldown cache of denial replies
#[derive(Clone)]
pub struct AccessGuard {
    allowed: Arc<HashSet<i64>>,
    /// user_id -> time the last denial was sent
    denied: Cache<i64, Instant>,
    cooldown: Duration,
    silenced_count: Arc<AtomicU64>,
}

impl AccessGuard {
    /// Creates a guard.
    ///
    /// An empty `allowed` set lets everyone in. `ttl_secs` bounds how long a
    /// denial is remembered at all; `max_capacity` bounds the cache size.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::HashSet;
    /// use wasabi_relay::bot::AccessGuard;
    ///
    /// let guard = AccessGuard::new(HashSet::from([42]), 1200, 7200, 10_000);
    /// assert!(guard.is_allowed(42));
    /// assert!(!guard.is_allowed(7));
    /// ```
    #[must_use]
    pub fn new(allowed: HashSet<i64>, cooldown_secs: u64, ttl_secs: u64, max_capacity: u64) -> Self {
        let denied = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self {
            allowed: Arc::new(allowed),
            denied,
            cooldown: Duration::from_secs(cooldown_secs),
            silenced_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether the user may use the relay
    #[must_use]
    pub fn is_allowed(&self, user_id: i64) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&user_id)
    }

    /// Whether the bot runs without an allow-list
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.allowed.is_empty()
    }

    /// Checks if an "Access denied" reply should be sent to the user.
    ///
    /// Returns `false` while the user is inside the cooldown. Only every
    /// 100th silenced attempt is logged.
    pub async fn should_send(&self, user_id: i64, user_name: &str) -> bool {
        match self.denied.get(&user_id).await {
            Some(sent_at) if sent_at.elapsed() < self.cooldown => {}
            _ => return true,
        }

        let count = self.silenced_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count.is_multiple_of(100) {
            debug!(
                "⛔️ Silenced {} unauthorized attempts (recent: user {} - {})",
                count, user_id, user_name
            );
        }

        false
    }

    /// Starts the cooldown after a denial reply was delivered
    pub async fn mark_sent(&self, user_id: i64) {
        self.denied.insert(user_id, Instant::now()).await;
    }

    /// Number of users currently remembered as denied
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.denied.entry_count()
    }

    /// Total number of silenced denial replies
    #[must_use]
    pub fn silenced_count(&self) -> u64 {
        self.silenced_count.load(Ordering::Relaxed)
    }

    /// Configured cooldown between denial replies
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(allowed: &[i64], cooldown_secs: u64) -> AccessGuard {
        AccessGuard::new(allowed.iter().copied().collect(), cooldown_secs, 120, 100)
    }

    #[test]
    fn test_empty_allow_list_admits_everyone() {
        let guard = guard(&[], 60);
        assert!(guard.is_open());
        assert!(guard.is_allowed(1));
        assert!(guard.is_allowed(-100_123));
    }

    #[test]
    fn test_allow_list_is_enforced() {
        let guard = guard(&[42], 60);
        assert!(!guard.is_open());
        assert!(guard.is_allowed(42));
        assert!(!guard.is_allowed(7));
    }

    #[tokio::test]
    async fn test_cooldown_blocks_second_denial() {
        let guard = guard(&[1], 60);

        assert!(guard.should_send(12345, "TestUser").await);
        guard.mark_sent(12345).await;
        assert!(!guard.should_send(12345, "TestUser").await);

        // Other users are unaffected
        assert!(guard.should_send(222, "User2").await);
    }

    #[tokio::test]
    async fn test_zero_cooldown_never_silences() {
        let guard = guard(&[1], 0);
        guard.mark_sent(5).await;
        assert!(guard.should_send(5, "TestUser").await);
        assert_eq!(guard.silenced_count(), 0);
    }

    #[tokio::test]
    async fn test_silenced_count_increments() {
        let guard = guard(&[1], 60);
        guard.mark_sent(12345).await;

        for _ in 0..5 {
            guard.should_send(12345, "TestUser").await;
        }

        assert_eq!(guard.silenced_count(), 5);
    }

    #[tokio::test]
    async fn test_entry_count() {
        let guard = guard(&[1], 60);
        guard.mark_sent(111).await;
        guard.mark_sent(222).await;

        guard.denied.run_pending_tasks().await;
        assert_eq!(guard.entry_count(), 2);
    }
}
