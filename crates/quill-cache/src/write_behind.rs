//! Write-behind queue for tool-call audit rows.
//!
//! The executor's hot path queues rows here; a background task drains
//! whatever has accumulated (up to 32 rows) and writes it as one
//! transaction. Rows are audit data — losing a flush on hard crash is
//! acceptable, losing latency on every tool call is not.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use quill_store::types::NewToolCall;
use quill_store::{tool_calls, Store};

const FLUSH_SIZE: usize = 32;

#[derive(Clone)]
pub struct ToolCallWriter {
    tx: mpsc::Sender<NewToolCall>,
}

impl ToolCallWriter {
    /// Spawn the flusher task and return the handle used to queue rows.
    pub fn spawn(store: Arc<Store>) -> Self {
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(run_flusher(store, rx));
        Self { tx }
    }

    /// Queue one audit row. Best-effort: a full queue drops the row with a log.
    pub fn queue(&self, tc: NewToolCall) {
        if let Err(e) = self.tx.try_send(tc) {
            warn!(error = %e, "tool_call audit row dropped (queue full or closed)");
        }
    }
}

async fn run_flusher(store: Arc<Store>, mut rx: mpsc::Receiver<NewToolCall>) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        // Opportunistic drain: batch whatever is already queued.
        while batch.len() < FLUSH_SIZE {
            match rx.try_recv() {
                Ok(tc) => batch.push(tc),
                Err(_) => break,
            }
        }
        flush(&store, batch);
    }
}

fn flush(store: &Store, batch: Vec<NewToolCall>) {
    let count = batch.len();
    match store.with_conn(|conn| tool_calls::insert_batch(conn, &batch)) {
        Ok(n) => debug!(rows = n, "tool_call audit flush"),
        Err(e) => warn!(error = %e, rows = count, "tool_call audit flush failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::Usd;
    use std::time::Duration;

    fn sample(n: i64) -> NewToolCall {
        NewToolCall {
            user_id: 1,
            chat_id: 2,
            thread_id: 3,
            message_id: n,
            tool_name: "web_search".into(),
            model_id: "claude-sonnet-4-5".into(),
            input_tokens: 10,
            output_tokens: 20,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            cost_usd: Usd::ZERO,
            duration_ms: Some(120),
            success: true,
        }
    }

    #[tokio::test]
    async fn queued_rows_reach_the_store() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let writer = ToolCallWriter::spawn(Arc::clone(&store));
        writer.queue(sample(1));
        writer.queue(sample(2));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let count = store
            .with_conn(|conn| tool_calls::count_for_user(conn, 1))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn large_bursts_survive_batching() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let writer = ToolCallWriter::spawn(Arc::clone(&store));
        for i in 0..100 {
            writer.queue(sample(i));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        let count = store
            .with_conn(|conn| tool_calls::count_for_user(conn, 1))
            .unwrap();
        assert_eq!(count, 100);
    }
}
