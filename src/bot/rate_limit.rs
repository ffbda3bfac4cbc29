//! Per-user request rate limiting.
//!
//! Fixed windows: the first request of a user opens a window that lives for
//! the cache TTL, and every request inside it bumps the same counter.

use moka::future::Cache;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Counts relay requests per user per window
#[derive(Clone)]
pub struct RateLimiter {
    windows: Cache<i64, Arc<AtomicU32>>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    /// Allows `limit` requests per `window` for each user; `0` disables limiting
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        let windows = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(window)
            .build();
        Self {
            windows,
            limit,
            window,
        }
    }

    /// Records a request and reports whether it is within the limit
    pub async fn check(&self, user_id: i64) -> bool {
        if self.limit == 0 {
            return true;
        }

        let counter = self
            .windows
            .get_with(user_id, async { Arc::new(AtomicU32::new(0)) })
            .await;
        let used = counter.fetch_add(1, Ordering::Relaxed) + 1;

        if used > self.limit {
            debug!("User {user_id} over rate limit ({used}/{})", self.limit);
            return false;
        }
        true
    }

    /// Requests allowed per window
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Window length
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }
}
