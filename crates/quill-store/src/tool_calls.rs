use rusqlite::{params, Connection};

use crate::error::StoreError;
use crate::types::{now_rfc3339, NewToolCall};

pub fn insert(conn: &Connection, tc: &NewToolCall) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO tool_calls (user_id, chat_id, thread_id, message_id, tool_name, model_id,
                                 input_tokens, output_tokens, cache_read_tokens,
                                 cache_creation_tokens, cost_usd, duration_ms, success, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            tc.user_id,
            tc.chat_id,
            tc.thread_id,
            tc.message_id,
            tc.tool_name,
            tc.model_id,
            tc.input_tokens,
            tc.output_tokens,
            tc.cache_read_tokens,
            tc.cache_creation_tokens,
            tc.cost_usd.to_string(),
            tc.duration_ms,
            tc.success as i64,
            now_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// One transaction for a whole write-behind flush.
pub fn insert_batch(conn: &mut Connection, batch: &[NewToolCall]) -> Result<usize, StoreError> {
    let tx = conn.transaction()?;
    for tc in batch {
        insert(&tx, tc)?;
    }
    tx.commit()?;
    Ok(batch.len())
}

pub fn count_for_user(conn: &Connection, user_id: i64) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM tool_calls WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?)
}
