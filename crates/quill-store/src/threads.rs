use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::types::{now_rfc3339, Thread};

fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<Thread> {
    Ok(Thread {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        user_id: row.get(2)?,
        topic_id: row.get(3)?,
        title: row.get(4)?,
        files_context: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

const THREAD_COLS: &str =
    "id, chat_id, user_id, topic_id, title, files_context, created_at, updated_at";

pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<Thread>, StoreError> {
    let sql = format!("SELECT {THREAD_COLS} FROM threads WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], row_to_thread).optional()?)
}

pub fn get_by_triple(
    conn: &Connection,
    chat_id: i64,
    user_id: i64,
    topic_id: Option<i64>,
) -> Result<Option<Thread>, StoreError> {
    let sql = format!(
        "SELECT {THREAD_COLS} FROM threads
         WHERE chat_id = ?1 AND user_id = ?2 AND topic_id = ?3"
    );
    Ok(conn
        .query_row(&sql, params![chat_id, user_id, topic_id.unwrap_or(0)], row_to_thread)
        .optional()?)
}

/// Lazily create the thread for (chat_id, user_id, topic_id-or-0).
/// Runs the insert under a SAVEPOINT so a concurrent insert of the same
/// triple degrades to a re-read.
pub fn get_or_create(
    conn: &mut Connection,
    chat_id: i64,
    user_id: i64,
    topic_id: Option<i64>,
    title: Option<&str>,
) -> Result<Thread, StoreError> {
    if let Some(t) = get_by_triple(conn, chat_id, user_id, topic_id)? {
        return Ok(t);
    }

    let now = now_rfc3339();
    let mut sp = conn.savepoint()?;
    let inserted = sp.execute(
        "INSERT INTO threads (chat_id, user_id, topic_id, title, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![chat_id, user_id, topic_id.unwrap_or(0), title, now],
    );
    match inserted {
        Ok(_) => sp.commit()?,
        Err(e) => {
            let err = StoreError::Sqlite(e);
            if !err.is_unique_violation() {
                return Err(err);
            }
            sp.rollback()?;
            drop(sp);
        }
    }

    get_by_triple(conn, chat_id, user_id, topic_id)?
        .ok_or_else(|| StoreError::NotFound(format!("thread {chat_id}/{user_id}")))
}

/// Bump updated_at — called whenever a message lands in the thread.
pub fn touch(conn: &Connection, id: i64) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE threads SET updated_at = ?1 WHERE id = ?2",
        params![now_rfc3339(), id],
    )?;
    Ok(())
}

pub fn set_title(conn: &Connection, id: i64, title: &str) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE threads SET title = ?1, updated_at = ?2 WHERE id = ?3",
        params![title, now_rfc3339(), id],
    )?;
    Ok(())
}

pub fn set_files_context(conn: &Connection, id: i64, ctx: Option<&str>) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE threads SET files_context = ?1 WHERE id = ?2",
        params![ctx, id],
    )?;
    Ok(())
}

/// Recently-active topics for one (chat, user) — the topic router's input.
pub fn recent_topics(
    conn: &Connection,
    chat_id: i64,
    user_id: i64,
    limit: usize,
) -> Result<Vec<Thread>, StoreError> {
    let sql = format!(
        "SELECT {THREAD_COLS} FROM threads
         WHERE chat_id = ?1 AND user_id = ?2 AND topic_id != 0
         ORDER BY updated_at DESC LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![chat_id, user_id, limit as i64], row_to_thread)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::init_db(&conn).unwrap();
        conn
    }

    #[test]
    fn triple_is_unique_and_topicless_maps_to_zero() {
        let mut conn = test_conn();
        let a = get_or_create(&mut conn, 100, 5, None, None).unwrap();
        let b = get_or_create(&mut conn, 100, 5, Some(0), None).unwrap();
        assert_eq!(a.id, b.id);
        let c = get_or_create(&mut conn, 100, 5, Some(77), Some("Rust")).unwrap();
        assert_ne!(a.id, c.id);
        assert_eq!(c.title.as_deref(), Some("Rust"));
    }

    #[test]
    fn recent_topics_skips_general() {
        let mut conn = test_conn();
        get_or_create(&mut conn, 1, 2, None, None).unwrap();
        get_or_create(&mut conn, 1, 2, Some(10), Some("A")).unwrap();
        get_or_create(&mut conn, 1, 2, Some(11), Some("B")).unwrap();
        let topics = recent_topics(&conn, 1, 2, 10).unwrap();
        assert_eq!(topics.len(), 2);
        assert!(topics.iter().all(|t| t.topic_id != 0));
    }
}
