use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::types::{now_rfc3339, FileKind, FileSource, NewUserFile, UserFile};

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserFile> {
    use std::str::FromStr;
    let kind = FileKind::from_str(&row.get::<_, String>(6)?)
        .map_err(|_| rusqlite::Error::InvalidQuery)?;
    let source = FileSource::from_str(&row.get::<_, String>(7)?)
        .map_err(|_| rusqlite::Error::InvalidQuery)?;
    Ok(UserFile {
        id: row.get(0)?,
        message_id: row.get(1)?,
        thread_id: row.get(2)?,
        filename: row.get(3)?,
        mime_type: row.get(4)?,
        file_size: row.get(5)?,
        file_kind: kind,
        source,
        claude_file_id: row.get(8)?,
        telegram_file_id: row.get(9)?,
        telegram_file_unique_id: row.get(10)?,
        uploaded_at: row.get(11)?,
        expires_at: row.get(12)?,
    })
}

const FILE_COLS: &str = "id, message_id, thread_id, filename, mime_type, file_size, file_kind, \
                         source, claude_file_id, telegram_file_id, telegram_file_unique_id, \
                         uploaded_at, expires_at";

pub fn insert(conn: &Connection, f: &NewUserFile) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO user_files (message_id, thread_id, filename, mime_type, file_size,
                                 file_kind, source, claude_file_id, telegram_file_id,
                                 telegram_file_unique_id, uploaded_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            f.message_id,
            f.thread_id,
            f.filename,
            f.mime_type,
            f.file_size,
            f.file_kind.to_string(),
            f.source.to_string(),
            f.claude_file_id,
            f.telegram_file_id,
            f.telegram_file_unique_id,
            now_rfc3339(),
            f.expires_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_by_claude_file_id(
    conn: &Connection,
    claude_file_id: &str,
) -> Result<Option<UserFile>, StoreError> {
    let sql = format!(
        "SELECT {FILE_COLS} FROM user_files WHERE claude_file_id = ?1
         ORDER BY id DESC LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, params![claude_file_id], row_to_file)
        .optional()?)
}

pub fn get_by_telegram_file_id(
    conn: &Connection,
    telegram_file_id: &str,
) -> Result<Option<UserFile>, StoreError> {
    let sql = format!(
        "SELECT {FILE_COLS} FROM user_files WHERE telegram_file_id = ?1
         ORDER BY id DESC LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, params![telegram_file_id], row_to_file)
        .optional()?)
}

/// Dedup lookup: Telegram's file_unique_id is stable across re-sends.
pub fn get_by_telegram_unique_id(
    conn: &Connection,
    unique_id: &str,
) -> Result<Option<UserFile>, StoreError> {
    let sql = format!(
        "SELECT {FILE_COLS} FROM user_files WHERE telegram_file_unique_id = ?1
         ORDER BY id DESC LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, params![unique_id], row_to_file)
        .optional()?)
}

/// Every file reachable from a thread — the "Available files" prompt section.
pub fn list_for_thread(conn: &Connection, thread_id: i64) -> Result<Vec<UserFile>, StoreError> {
    let sql = format!("SELECT {FILE_COLS} FROM user_files WHERE thread_id = ?1 ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![thread_id], row_to_file)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn list_for_message(conn: &Connection, message_id: i64) -> Result<Vec<UserFile>, StoreError> {
    let sql = format!("SELECT {FILE_COLS} FROM user_files WHERE message_id = ?1 ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![message_id], row_to_file)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewMessage, Role};
    use crate::{db, messages, threads};

    fn seed(conn: &mut Connection) -> (i64, i64) {
        let t = threads::get_or_create(conn, 1, 2, None, None).unwrap();
        let m = messages::insert(
            conn,
            &NewMessage {
                thread_id: t.id,
                chat_id: 1,
                message_id: 10,
                role: Role::User,
                text: Some("photo".into()),
                forward_origin: None,
                reply_snippet: None,
                quote_text: None,
                thinking_tokens: None,
                text_tokens: None,
            },
        )
        .unwrap();
        (t.id, m)
    }

    fn new_file(thread_id: i64, message_id: i64, claude_id: &str) -> NewUserFile {
        NewUserFile {
            message_id,
            thread_id,
            filename: "cat.jpg".into(),
            mime_type: "image/jpeg".into(),
            file_size: 1024,
            file_kind: FileKind::Image,
            source: FileSource::User,
            claude_file_id: Some(claude_id.into()),
            telegram_file_id: Some("tg_abc".into()),
            telegram_file_unique_id: Some("uniq_1".into()),
            expires_at: None,
        }
    }

    #[test]
    fn lookups_by_all_three_handles() {
        let mut conn = Connection::open_in_memory().unwrap();
        db::init_db(&conn).unwrap();
        let (tid, mid) = seed(&mut conn);
        insert(&conn, &new_file(tid, mid, "file_x1")).unwrap();

        assert!(get_by_claude_file_id(&conn, "file_x1").unwrap().is_some());
        assert!(get_by_telegram_file_id(&conn, "tg_abc").unwrap().is_some());
        assert!(get_by_telegram_unique_id(&conn, "uniq_1").unwrap().is_some());
        assert!(get_by_claude_file_id(&conn, "file_nope").unwrap().is_none());
        assert_eq!(list_for_thread(&conn, tid).unwrap().len(), 1);
        assert_eq!(list_for_message(&conn, mid).unwrap().len(), 1);
    }
}
