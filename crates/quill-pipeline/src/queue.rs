//! Per-thread FIFO batcher.
//!
//! Accumulates ProcessedMessages per thread, waits for sibling messages
//! (batching delay + normalization tracker, or media-group quiet period),
//! then hands exactly one batch at a time to the processor. A failed batch
//! is retried once; messages that arrive while a batch is processing are
//! picked up as the next batch.
//!
//! The API is split in two so the producer can order its tracker calls
//! correctly: `push` physically appends the message, the producer marks its
//! normalization finished, and only then `dispatch` runs the batching waits.
//! Finishing before the append would let a concurrent flush observe an empty
//! pending set while the message is still in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::model::ProcessedMessage;
use crate::tracker::{MediaGroupTracker, NormalizationTracker};

/// Collect-related-messages delay for plain messages (text may be split by
/// the platform; files may come with a caption message).
const BATCH_DELAY: Duration = Duration::from_millis(150);
/// Wait budget for pending normalizations, plain path.
const NORMALIZATION_WAIT: Duration = Duration::from_secs(2);
/// Wait budget for pending normalizations after a media group completes
/// (files normalize in parallel, ~1–2 s each).
const MEDIA_GROUP_NORMALIZATION_WAIT: Duration = Duration::from_secs(3);
/// Hard cap on the media-group quiet-period wait.
const MEDIA_GROUP_MAX_WAIT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process(&self, thread_id: i64, batch: Vec<ProcessedMessage>)
        -> quill_core::Result<()>;
}

#[derive(Default)]
struct ThreadQueue {
    messages: Vec<ProcessedMessage>,
    processing: bool,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct QueueStats {
    pub total_threads: usize,
    pub processing_threads: usize,
    pub waiting_threads: usize,
    pub total_pending_messages: usize,
}

/// What `push` tells the producer to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// A batch is currently processing; it will pick the message up.
    PickedUp,
    /// No batch in flight — the producer must call `dispatch`.
    ShouldDispatch,
}

pub struct PerThreadQueue {
    queues: Mutex<HashMap<i64, ThreadQueue>>,
    processor: Arc<dyn BatchProcessor>,
    normalization: Arc<NormalizationTracker>,
    media_groups: Arc<MediaGroupTracker>,
}

impl PerThreadQueue {
    pub fn new(
        processor: Arc<dyn BatchProcessor>,
        normalization: Arc<NormalizationTracker>,
        media_groups: Arc<MediaGroupTracker>,
    ) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            processor,
            normalization,
            media_groups,
        }
    }

    /// Append the message to its thread queue.
    pub async fn push(&self, thread_id: i64, message: ProcessedMessage) -> PushOutcome {
        let mut queues = self.queues.lock().await;
        let queue = queues.entry(thread_id).or_default();
        queue.messages.push(message);
        if queue.processing {
            info!(
                thread_id,
                pending = queue.messages.len(),
                "accumulated during processing"
            );
            PushOutcome::PickedUp
        } else {
            PushOutcome::ShouldDispatch
        }
    }

    /// Run the batching waits, then take and process the batch — unless some
    /// other caller started processing while we waited.
    pub async fn dispatch(
        &self,
        thread_id: i64,
        chat_id: i64,
        media_group_id: Option<&str>,
    ) {
        if let Some(group_id) = media_group_id {
            debug!(thread_id, media_group_id = %group_id, "media group detected");
            self.media_groups
                .wait_for_complete(group_id, None, MEDIA_GROUP_MAX_WAIT)
                .await;
            self.normalization
                .wait_for_chat(chat_id, MEDIA_GROUP_NORMALIZATION_WAIT)
                .await;
        } else {
            tokio::time::sleep(BATCH_DELAY).await;
            self.normalization
                .wait_for_chat(chat_id, NORMALIZATION_WAIT)
                .await;
        }

        let batch = {
            let mut queues = self.queues.lock().await;
            let Some(queue) = queues.get_mut(&thread_id) else {
                return;
            };
            if queue.processing {
                debug!(thread_id, "skip: another caller owns the batch");
                return;
            }
            if queue.messages.is_empty() {
                return;
            }
            queue.processing = true;
            std::mem::take(&mut queue.messages)
        };

        self.run_batches(thread_id, batch).await;
    }

    /// push + finish-less dispatch in one call, for producers that have no
    /// tracker interaction of their own.
    pub async fn add(&self, thread_id: i64, message: ProcessedMessage) {
        let chat_id = message.meta.chat_id;
        let media_group_id = message.media_group_id.clone();
        if self.push(thread_id, message).await == PushOutcome::ShouldDispatch {
            self.dispatch(thread_id, chat_id, media_group_id.as_deref())
                .await;
        }
    }

    /// Process the snapshot, then keep draining batches that accumulated
    /// while we were busy. The `processing` flag stays set for the whole run.
    async fn run_batches(&self, thread_id: i64, mut batch: Vec<ProcessedMessage>) {
        loop {
            let batch_size = batch.len();
            info!(thread_id, batch_size, "batch processing start");
            quill_core::metrics::record_batch_processed();

            if let Err(e) = self.processor.process(thread_id, batch.clone()).await {
                error!(thread_id, error = %e, "batch failed, retrying once");
                if let Err(e) = self.processor.process(thread_id, batch).await {
                    error!(thread_id, error = %e, "batch retry failed, dropping");
                    quill_core::metrics::record_error();
                }
            }

            let mut queues = self.queues.lock().await;
            let Some(queue) = queues.get_mut(&thread_id) else {
                return;
            };
            if queue.messages.is_empty() {
                queue.processing = false;
                return;
            }
            // Next batch accumulated during processing.
            batch = std::mem::take(&mut queue.messages);
            info!(thread_id, next_batch = batch.len(), "dispatching next batch");
        }
    }

    pub async fn stats(&self) -> QueueStats {
        let queues = self.queues.lock().await;
        QueueStats {
            total_threads: queues.len(),
            processing_threads: queues.values().filter(|q| q.processing).count(),
            waiting_threads: queues.values().filter(|q| !q.messages.is_empty()).count(),
            total_pending_messages: queues.values().map(|q| q.messages.len()).sum(),
        }
    }
}
