use rusqlite::{params, Connection, OptionalExtension};

use quill_core::Usd;

use crate::error::StoreError;
use crate::types::{now_rfc3339, User};

/// Map a SELECT row (column order from USER_COLS) to a User.
/// Centralised so every query in this module stays consistent.
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        first_name: row.get(2)?,
        language_code: row.get(3)?,
        model: row.get(4)?,
        custom_prompt: row.get(5)?,
        balance: Usd::parse_db(&row.get::<_, String>(6)?)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

const USER_COLS: &str = "id, username, first_name, language_code, model, \
                         custom_prompt, balance, created_at, updated_at";

pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<User>, StoreError> {
    let sql = format!("SELECT {USER_COLS} FROM users WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id], row_to_user)
        .optional()?)
}

pub fn get_by_username(conn: &Connection, username: &str) -> Result<Option<User>, StoreError> {
    let name = username.trim_start_matches('@');
    let sql = format!("SELECT {USER_COLS} FROM users WHERE username = ?1");
    Ok(conn
        .query_row(&sql, params![name], row_to_user)
        .optional()?)
}

/// Read-or-insert under a SAVEPOINT so a uniqueness race inside an outer
/// transaction is converted to a second read instead of poisoning it.
pub fn get_or_create(
    conn: &mut Connection,
    id: i64,
    username: Option<&str>,
    first_name: Option<&str>,
    language_code: Option<&str>,
    default_model: &str,
) -> Result<User, StoreError> {
    if let Some(user) = get_by_id(conn, id)? {
        return Ok(user);
    }

    let now = now_rfc3339();
    let mut sp = conn.savepoint()?;
    let inserted = sp.execute(
        "INSERT INTO users (id, username, first_name, language_code, model,
                            balance, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, '0.0000', ?6, ?6)",
        params![id, username, first_name, language_code, default_model, now],
    );
    match inserted {
        Ok(_) => sp.commit()?,
        Err(e) => {
            let err = StoreError::Sqlite(e);
            if !err.is_unique_violation() {
                return Err(err);
            }
            // lost the race — roll the savepoint back and re-read below
            sp.rollback()?;
            drop(sp);
        }
    }

    get_by_id(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("user {id}")))
}

/// Overwrite the stored balance. Only the ledger calls this, inside its own
/// transaction alongside the audit-row insert.
pub fn set_balance(conn: &Connection, id: i64, balance: Usd) -> Result<(), StoreError> {
    let n = conn.execute(
        "UPDATE users SET balance = ?1, updated_at = ?2 WHERE id = ?3",
        params![balance.to_string(), now_rfc3339(), id],
    )?;
    if n == 0 {
        return Err(StoreError::NotFound(format!("user {id}")));
    }
    Ok(())
}

pub fn set_model(conn: &Connection, id: i64, model: &str) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE users SET model = ?1, updated_at = ?2 WHERE id = ?3",
        params![model, now_rfc3339(), id],
    )?;
    Ok(())
}

pub fn set_custom_prompt(
    conn: &Connection,
    id: i64,
    prompt: Option<&str>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE users SET custom_prompt = ?1, updated_at = ?2 WHERE id = ?3",
        params![prompt, now_rfc3339(), id],
    )?;
    Ok(())
}

pub fn all_ids(conn: &Connection) -> Result<Vec<i64>, StoreError> {
    let mut stmt = conn.prepare("SELECT id FROM users ORDER BY id")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
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
    fn get_or_create_is_idempotent() {
        let mut conn = test_conn();
        let a = get_or_create(&mut conn, 42, Some("alice"), Some("Alice"), Some("en"), "m1")
            .unwrap();
        let b = get_or_create(&mut conn, 42, Some("alice"), None, None, "m2").unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.model, "m1"); // second call must not overwrite
        assert!(a.balance.is_zero());
    }

    #[test]
    fn username_lookup_strips_at_sign() {
        let mut conn = test_conn();
        get_or_create(&mut conn, 7, Some("bob"), None, None, "m").unwrap();
        assert!(get_by_username(&conn, "@bob").unwrap().is_some());
        assert!(get_by_username(&conn, "bob").unwrap().is_some());
        assert!(get_by_username(&conn, "carol").unwrap().is_none());
    }

    #[test]
    fn set_balance_missing_user_errors() {
        let conn = test_conn();
        let err = set_balance(&conn, 999, Usd::ZERO).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
