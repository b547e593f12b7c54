//! SQLite persistence for the chat pipeline.
//!
//! Repositories operate on a borrowed connection and never commit on their
//! own — the service layer owns transaction boundaries. `Store` wraps the
//! connection in a mutex; SQLite serializes writers anyway, so one coarse
//! lock per process is the simplest correct shape.

pub mod balance_ops;
pub mod db;
pub mod error;
pub mod files;
pub mod messages;
pub mod payments;
pub mod threads;
pub mod tool_calls;
pub mod types;
pub mod users;

use std::sync::Mutex;

use rusqlite::Connection;

pub use error::StoreError;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path` and run idempotent DDL.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        db::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        db::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with the connection. Keep the closure free of long work —
    /// it holds the process-wide DB lock.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.conn.lock().expect("store mutex poisoned");
        f(&mut guard)
    }
}
