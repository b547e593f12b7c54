//! Synchronization barriers between the handler and the batching queue.
//!
//! `NormalizationTracker` solves the race where a fast text message's flush
//! timer fires while a slow photo from the same chat is still normalizing:
//! both register as pending immediately, and the queue waits for the chat's
//! pending set to drain before taking a batch.
//!
//! `MediaGroupTracker` detects the end of a media group by silence: files of
//! one group arrive ~50–200 ms apart, so "no new file for 300 ms" means the
//! group is complete.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

#[derive(Default)]
struct ChatPending {
    pending: HashSet<i64>,
    notify: Arc<Notify>,
}

/// Per-chat named wait-group.
#[derive(Default)]
pub struct NormalizationTracker {
    chats: Mutex<HashMap<i64, ChatPending>>,
}

impl NormalizationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a message as being normalized.
    pub async fn start(&self, chat_id: i64, message_id: i64) {
        let mut chats = self.chats.lock().await;
        let entry = chats.entry(chat_id).or_default();
        entry.pending.insert(message_id);
        debug!(
            chat_id,
            message_id,
            pending = entry.pending.len(),
            "normalization started"
        );
    }

    /// Mark a message as done. Call this AFTER the message is in the
    /// downstream queue, not after normalization returns — otherwise a flush
    /// can observe an empty pending set while the message is still in flight
    /// between normalizer and queue.
    pub async fn finish(&self, chat_id: i64, message_id: i64) {
        let mut chats = self.chats.lock().await;
        let Some(entry) = chats.get_mut(&chat_id) else {
            return;
        };
        entry.pending.remove(&message_id);
        debug!(
            chat_id,
            message_id,
            remaining = entry.pending.len(),
            "normalization finished"
        );
        if entry.pending.is_empty() {
            entry.notify.notify_waiters();
            chats.remove(&chat_id);
        }
    }

    /// Wait until the chat has no pending normalizations.
    /// Returns false on timeout (pending set left untouched).
    pub async fn wait_for_chat(&self, chat_id: i64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notify = {
                let chats = self.chats.lock().await;
                match chats.get(&chat_id) {
                    None => return true,
                    Some(entry) if entry.pending.is_empty() => return true,
                    Some(entry) => Arc::clone(&entry.notify),
                }
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let pending = self.pending_count(chat_id).await;
                warn!(chat_id, pending, "normalization wait timed out");
                return false;
            }
            if tokio::time::timeout(remaining, notify.notified()).await.is_err() {
                let pending = self.pending_count(chat_id).await;
                warn!(chat_id, pending, "normalization wait timed out");
                return false;
            }
            // Woken — loop re-checks, the chat may have new pending entries.
        }
    }

    pub async fn has_pending(&self, chat_id: i64) -> bool {
        self.pending_count(chat_id).await > 0
    }

    pub async fn pending_count(&self, chat_id: i64) -> usize {
        let chats = self.chats.lock().await;
        chats.get(&chat_id).map(|e| e.pending.len()).unwrap_or(0)
    }

    pub async fn stats(&self) -> (usize, usize) {
        let chats = self.chats.lock().await;
        let total_pending = chats.values().map(|e| e.pending.len()).sum();
        (chats.len(), total_pending)
    }
}

/// Quiet-period detector for media groups.
pub struct MediaGroupTracker {
    groups: Mutex<HashMap<String, Instant>>,
    quiet_period: Duration,
}

impl Default for MediaGroupTracker {
    fn default() -> Self {
        Self::new(Duration::from_millis(300))
    }
}

impl MediaGroupTracker {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
            quiet_period,
        }
    }

    /// Refresh the group's last-seen timestamp.
    pub async fn register(&self, media_group_id: &str) {
        let mut groups = self.groups.lock().await;
        groups.insert(media_group_id.to_string(), Instant::now());
        debug!(media_group_id, "media group registered");
    }

    /// Poll at 50 ms until no register has happened for the quiet period.
    /// Returns false when `max_wait` elapses first. Group state is discarded
    /// on completion either way.
    pub async fn wait_for_complete(
        &self,
        media_group_id: &str,
        quiet_period: Option<Duration>,
        max_wait: Duration,
    ) -> bool {
        let quiet = quiet_period.unwrap_or(self.quiet_period);
        let start = Instant::now();
        let check_interval = Duration::from_millis(50);

        loop {
            {
                let mut groups = self.groups.lock().await;
                let Some(last_seen) = groups.get(media_group_id).copied() else {
                    return true; // never registered — nothing to wait for
                };

                if last_seen.elapsed() >= quiet {
                    info!(
                        media_group_id,
                        total_ms = start.elapsed().as_millis() as u64,
                        "media group complete"
                    );
                    groups.remove(media_group_id);
                    return true;
                }

                if start.elapsed() >= max_wait {
                    warn!(media_group_id, "media group wait exceeded max");
                    groups.remove(media_group_id);
                    return false;
                }
            }
            tokio::time::sleep(check_interval).await;
        }
    }

    pub async fn active_groups(&self) -> usize {
        self.groups.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_returns_immediately_with_no_pending() {
        let tracker = NormalizationTracker::new();
        assert!(tracker.wait_for_chat(1, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn wait_blocks_until_all_finish() {
        let tracker = Arc::new(NormalizationTracker::new());
        tracker.start(1, 100).await;
        tracker.start(1, 101).await;

        let t2 = Arc::clone(&tracker);
        let waiter = tokio::spawn(async move {
            t2.wait_for_chat(1, Duration::from_secs(2)).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        tracker.finish(1, 100).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "one message still pending");

        tracker.finish(1, 101).await;
        assert!(waiter.await.unwrap());
        assert!(!tracker.has_pending(1).await);
    }

    #[tokio::test]
    async fn wait_times_out_and_keeps_pending() {
        let tracker = NormalizationTracker::new();
        tracker.start(1, 100).await;
        assert!(!tracker.wait_for_chat(1, Duration::from_millis(30)).await);
        assert_eq!(tracker.pending_count(1).await, 1);
    }

    #[tokio::test]
    async fn chats_are_independent() {
        let tracker = NormalizationTracker::new();
        tracker.start(1, 100).await;
        // chat 2 has nothing pending
        assert!(tracker.wait_for_chat(2, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn media_group_completes_after_quiet_period() {
        let tracker = MediaGroupTracker::new(Duration::from_millis(60));
        tracker.register("g1").await;
        let start = Instant::now();
        assert!(
            tracker
                .wait_for_complete("g1", None, Duration::from_secs(5))
                .await
        );
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert_eq!(tracker.active_groups().await, 0);
    }

    #[tokio::test]
    async fn media_group_wait_extends_on_new_registers() {
        let tracker = Arc::new(MediaGroupTracker::new(Duration::from_millis(100)));
        tracker.register("g1").await;

        let t2 = Arc::clone(&tracker);
        let feeder = tokio::spawn(async move {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_millis(50)).await;
                t2.register("g1").await;
            }
        });

        let start = Instant::now();
        assert!(
            tracker
                .wait_for_complete("g1", None, Duration::from_secs(5))
                .await
        );
        // quiet period restarts with each register: 3×50ms + 100ms quiet
        assert!(start.elapsed() >= Duration::from_millis(230));
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn media_group_max_wait_caps_the_wait() {
        let tracker = Arc::new(MediaGroupTracker::new(Duration::from_millis(100)));
        tracker.register("g1").await;

        let t2 = Arc::clone(&tracker);
        let feeder = tokio::spawn(async move {
            // keep the group alive forever
            for _ in 0..20 {
                tokio::time::sleep(Duration::from_millis(40)).await;
                t2.register("g1").await;
            }
        });

        let completed = tracker
            .wait_for_complete("g1", None, Duration::from_millis(300))
            .await;
        assert!(!completed);
        feeder.abort();
    }
}
