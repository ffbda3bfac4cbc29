//! Live transfer status in the request's status message.

use crate::bot::resilient::edit_message_safe_resilient;
use crate::bot::views;
use crate::config::PROGRESS_EDIT_INTERVAL_MS;
use crate::relay::{TransferPhase, TransferProgress};
use std::time::{Duration, Instant};
use teloxide::prelude::*;
use teloxide::types::MessageId;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Time spent in the current transfer phase
#[derive(Debug)]
pub struct PhaseClock {
    phase: TransferPhase,
    since: Instant,
}

impl PhaseClock {
    /// Clock starting at `now` in the idle phase
    #[must_use]
    pub const fn new(now: Instant) -> Self {
        Self {
            phase: TransferPhase::Idle,
            since: now,
        }
    }

    /// Elapsed time in `phase` at `now`; a phase change restarts the clock
    pub fn observe(&mut self, phase: TransferPhase, now: Instant) -> Duration {
        if phase != self.phase {
            self.phase = phase;
            self.since = now;
        }
        now.saturating_duration_since(self.since)
    }
}

/// Background task that edits a status message while a transfer runs
///
/// Dropping the reporter stops it at once; [`ProgressReporter::finish`]
/// waits for an in-flight edit so a later final edit is not overwritten.
pub struct ProgressReporter {
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    /// Start editing `msg_id` every few seconds from `progress`
    #[must_use]
    pub fn spawn(
        bot: Bot,
        chat_id: ChatId,
        msg_id: MessageId,
        file_name: String,
        progress: TransferProgress,
    ) -> Self {
        let (stop, mut stopped) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let period = Duration::from_millis(PROGRESS_EDIT_INTERVAL_MS);
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the initial status stays up
            ticker.tick().await;

            let mut clock = PhaseClock::new(Instant::now());
            let mut last_text = String::new();

            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {}
                }

                let snapshot = progress.snapshot();
                if snapshot.phase == TransferPhase::Idle {
                    continue;
                }
                let elapsed = clock.observe(snapshot.phase, Instant::now());
                let text = views::transfer_progress(&file_name, &snapshot, elapsed);
                if text != last_text {
                    edit_message_safe_resilient(&bot, chat_id, msg_id, &text, None).await;
                    last_text = text;
                }
            }
            debug!("Progress reporter for message {} stopped", msg_id.0);
        });

        Self {
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    /// Stop reporting and wait for the task to end
    pub async fn finish(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
