//! Byte counters for running transfers.
//!
//! A [`TransferProgress`] is shared between the code moving bytes (store,
//! transport) and whoever renders status for the requester. Writers only
//! bump atomics; readers take a [`ProgressSnapshot`] whenever they like.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Stage of a relay request that moves bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// Nothing started yet
    Idle,
    /// Attachment bytes coming from the chat into staging
    Receiving,
    /// Staged bytes going to the object store
    Uploading,
    /// Object bytes coming from the store into staging
    Fetching,
}

impl TransferPhase {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Receiving => 1,
            Self::Uploading => 2,
            Self::Fetching => 3,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Receiving,
            2 => Self::Uploading,
            3 => Self::Fetching,
            _ => Self::Idle,
        }
    }
}

/// Point-in-time view of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Current stage
    pub phase: TransferPhase,
    /// Bytes moved in this stage
    pub done: u64,
    /// Expected bytes for this stage, 0 when unknown
    pub total: u64,
}

impl ProgressSnapshot {
    /// Completion in percent, capped at 100; `None` when the total is unknown
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        Some((self.done.min(self.total) as f64 / self.total as f64) * 100.0)
    }
}

#[derive(Debug, Default)]
struct Counters {
    phase: AtomicU8,
    done: AtomicU64,
    total: AtomicU64,
}

/// Shared byte counter of one request; clones observe the same transfer
#[derive(Debug, Clone, Default)]
pub struct TransferProgress {
    inner: Arc<Counters>,
}

impl TransferProgress {
    /// Idle counter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter `phase`, expecting `total` bytes (0 if unknown)
    pub fn start(&self, phase: TransferPhase, total: u64) {
        self.inner.done.store(0, Ordering::Relaxed);
        self.inner.total.store(total, Ordering::Relaxed);
        self.inner.phase.store(phase.as_u8(), Ordering::Release);
    }

    /// Set the expected size once it becomes known
    pub fn set_total(&self, total: u64) {
        self.inner.total.store(total, Ordering::Relaxed);
    }

    /// Record `bytes` more bytes moved
    pub fn advance(&self, bytes: u64) {
        self.inner.done.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Current state
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            phase: TransferPhase::from_u8(self.inner.phase.load(Ordering::Acquire)),
            done: self.inner.done.load(Ordering::Relaxed),
            total: self.inner.total.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let progress = TransferProgress::new();
        let writer = progress.clone();
        assert_eq!(progress.snapshot().phase, TransferPhase::Idle);

        writer.start(TransferPhase::Uploading, 100);
        writer.advance(40);
        writer.advance(10);

        let snap = progress.snapshot();
        assert_eq!(snap.phase, TransferPhase::Uploading);
        assert_eq!((snap.done, snap.total), (50, 100));
        assert_eq!(snap.percent(), Some(50.0));
    }

    #[test]
    fn test_new_phase_resets_done() {
        let progress = TransferProgress::new();
        progress.start(TransferPhase::Receiving, 10);
        progress.advance(10);
        progress.start(TransferPhase::Uploading, 10);
        assert_eq!(progress.snapshot().done, 0);
    }

    #[test]
    fn test_percent_needs_total_and_caps() {
        let progress = TransferProgress::new();
        progress.start(TransferPhase::Fetching, 0);
        progress.advance(5);
        assert_eq!(progress.snapshot().percent(), None);

        progress.set_total(4);
        assert_eq!(progress.snapshot().percent(), Some(100.0));
    }
}
