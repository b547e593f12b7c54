use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Row not found: {0}")]
    NotFound(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// True when the underlying SQLite error is a UNIQUE violation —
    /// callers use this to convert insert races into a second read.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }
}

impl From<StoreError> for quill_core::QuillError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => quill_core::QuillError::Database(format!("not found: {what}")),
            other => quill_core::QuillError::Database(other.to_string()),
        }
    }
}
