use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::types::{now_rfc3339, MessageRow, NewMessage, Role};

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    use std::str::FromStr;
    let role = Role::from_str(&row.get::<_, String>(4)?)
        .map_err(|_| rusqlite::Error::InvalidQuery)?;
    Ok(MessageRow {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        chat_id: row.get(2)?,
        message_id: row.get(3)?,
        role,
        text: row.get(5)?,
        forward_origin: row.get(6)?,
        reply_snippet: row.get(7)?,
        quote_text: row.get(8)?,
        edit_count: row.get(9)?,
        thinking_tokens: row.get(10)?,
        text_tokens: row.get(11)?,
        created_at: row.get(12)?,
    })
}

const MSG_COLS: &str = "id, thread_id, chat_id, message_id, role, text, forward_origin, \
                        reply_snippet, quote_text, edit_count, thinking_tokens, text_tokens, \
                        created_at";

pub fn insert(conn: &Connection, msg: &NewMessage) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO messages (thread_id, chat_id, message_id, role, text, forward_origin,
                               reply_snippet, quote_text, thinking_tokens, text_tokens, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            msg.thread_id,
            msg.chat_id,
            msg.message_id,
            msg.role.to_string(),
            msg.text,
            msg.forward_origin,
            msg.reply_snippet,
            msg.quote_text,
            msg.thinking_tokens,
            msg.text_tokens,
            now_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<MessageRow>, StoreError> {
    let sql = format!("SELECT {MSG_COLS} FROM messages WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], row_to_message).optional()?)
}

/// Full thread history in arrival order — the executor rebuilds the LLM
/// dialog from this.
pub fn list_for_thread(conn: &Connection, thread_id: i64) -> Result<Vec<MessageRow>, StoreError> {
    let sql = format!("SELECT {MSG_COLS} FROM messages WHERE thread_id = ?1 ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![thread_id], row_to_message)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Most recent user-authored texts for a thread, newest first.
/// The topic router feeds these to the classifier.
pub fn recent_user_texts(
    conn: &Connection,
    thread_id: i64,
    limit: usize,
) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT text FROM messages
         WHERE thread_id = ?1 AND role = 'user' AND text IS NOT NULL
         ORDER BY id DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![thread_id, limit as i64], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(rows)
}

/// Row id for a platform (chat_id, message_id) pair.
pub fn row_id_for_platform(
    conn: &Connection,
    chat_id: i64,
    message_id: i64,
) -> Result<Option<i64>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id FROM messages WHERE chat_id = ?1 AND message_id = ?2",
            params![chat_id, message_id],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn bump_edit_count(conn: &Connection, chat_id: i64, message_id: i64) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE messages SET edit_count = edit_count + 1
         WHERE chat_id = ?1 AND message_id = ?2",
        params![chat_id, message_id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, threads};

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::init_db(&conn).unwrap();
        conn
    }

    fn new_msg(thread_id: i64, message_id: i64, role: Role, text: &str) -> NewMessage {
        NewMessage {
            thread_id,
            chat_id: 1,
            message_id,
            role,
            text: Some(text.to_string()),
            forward_origin: None,
            reply_snippet: None,
            quote_text: None,
            thinking_tokens: None,
            text_tokens: None,
        }
    }

    #[test]
    fn history_preserves_insertion_order() {
        let mut conn = test_conn();
        let t = threads::get_or_create(&mut conn, 1, 2, None, None).unwrap();
        insert(&conn, &new_msg(t.id, 10, Role::User, "first")).unwrap();
        insert(&conn, &new_msg(t.id, 11, Role::User, "second")).unwrap();
        insert(&conn, &new_msg(t.id, 12, Role::Assistant, "reply")).unwrap();

        let history = list_for_thread(&conn, t.id).unwrap();
        let texts: Vec<_> = history.iter().filter_map(|m| m.text.clone()).collect();
        assert_eq!(texts, vec!["first", "second", "reply"]);
    }

    #[test]
    fn recent_user_texts_newest_first() {
        let mut conn = test_conn();
        let t = threads::get_or_create(&mut conn, 1, 2, None, None).unwrap();
        insert(&conn, &new_msg(t.id, 1, Role::User, "a")).unwrap();
        insert(&conn, &new_msg(t.id, 2, Role::Assistant, "x")).unwrap();
        insert(&conn, &new_msg(t.id, 3, Role::User, "b")).unwrap();
        let texts = recent_user_texts(&conn, t.id, 5).unwrap();
        assert_eq!(texts, vec!["b", "a"]);
    }

    #[test]
    fn duplicate_platform_message_rejected() {
        let mut conn = test_conn();
        let t = threads::get_or_create(&mut conn, 1, 2, None, None).unwrap();
        insert(&conn, &new_msg(t.id, 10, Role::User, "once")).unwrap();
        let err = insert(&conn, &new_msg(t.id, 10, Role::User, "twice")).unwrap_err();
        assert!(err.is_unique_violation());
    }
}
