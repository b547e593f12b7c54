use rusqlite::{Connection, Result};

/// Initialise all tables. Safe to call on every startup — CREATE IF NOT
/// EXISTS means it's idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_users_table(conn)?;
    create_threads_table(conn)?;
    create_messages_table(conn)?;
    create_user_files_table(conn)?;
    create_payments_table(conn)?;
    create_balance_operations_table(conn)?;
    create_tool_calls_table(conn)?;
    Ok(())
}

fn create_users_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY NOT NULL,
            username        TEXT,
            first_name      TEXT,
            language_code   TEXT,
            model           TEXT NOT NULL DEFAULT 'claude-sonnet-4-5',
            custom_prompt   TEXT,
            balance         TEXT NOT NULL DEFAULT '0.0000',
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_users_username ON users (username);",
    )
}

fn create_threads_table(conn: &Connection) -> Result<()> {
    // topic_id 0 encodes 'no forum topic' so the UNIQUE triple stays total.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS threads (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id         INTEGER NOT NULL,
            user_id         INTEGER NOT NULL,
            topic_id        INTEGER NOT NULL DEFAULT 0,
            title           TEXT,
            files_context   TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            UNIQUE(chat_id, user_id, topic_id)
        );
        CREATE INDEX IF NOT EXISTS idx_threads_lookup
            ON threads (chat_id, user_id, topic_id);",
    )
}

fn create_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_id       INTEGER NOT NULL REFERENCES threads(id),
            chat_id         INTEGER NOT NULL,
            message_id      INTEGER NOT NULL,
            role            TEXT NOT NULL CHECK(role IN ('user','assistant')),
            text            TEXT,
            forward_origin  TEXT,
            reply_snippet   TEXT,
            quote_text      TEXT,
            edit_count      INTEGER NOT NULL DEFAULT 0,
            thinking_tokens INTEGER,
            text_tokens     INTEGER,
            created_at      TEXT NOT NULL,
            UNIQUE(chat_id, message_id)
        );
        CREATE INDEX IF NOT EXISTS idx_messages_thread
            ON messages (thread_id, id);",
    )
}

fn create_user_files_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_files (
            id                       INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id               INTEGER NOT NULL REFERENCES messages(id),
            thread_id                INTEGER NOT NULL,
            filename                 TEXT NOT NULL,
            mime_type                TEXT NOT NULL,
            file_size                INTEGER NOT NULL DEFAULT 0,
            file_kind                TEXT NOT NULL,
            source                   TEXT NOT NULL CHECK(source IN ('user','assistant')),
            claude_file_id           TEXT,
            telegram_file_id         TEXT,
            telegram_file_unique_id  TEXT,
            uploaded_at              TEXT NOT NULL,
            expires_at               TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_user_files_thread ON user_files (thread_id);
        CREATE INDEX IF NOT EXISTS idx_user_files_claude ON user_files (claude_file_id);
        CREATE INDEX IF NOT EXISTS idx_user_files_tg_unique
            ON user_files (telegram_file_unique_id);",
    )
}

fn create_payments_table(conn: &Connection) -> Result<()> {
    // charge_id UNIQUE is the duplicate-payment guard.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS payments (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         INTEGER NOT NULL REFERENCES users(id),
            charge_id       TEXT NOT NULL UNIQUE,
            stars_amount    INTEGER NOT NULL,
            nominal_usd     TEXT NOT NULL,
            credited_usd    TEXT NOT NULL,
            k1              TEXT NOT NULL,
            k2              TEXT NOT NULL,
            k3              TEXT NOT NULL,
            status          TEXT NOT NULL CHECK(status IN ('pending','completed','refunded')),
            invoice_payload TEXT,
            created_at      TEXT NOT NULL,
            refunded_at     TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_payments_user ON payments (user_id);",
    )
}

fn create_balance_operations_table(conn: &Connection) -> Result<()> {
    // Audit rows outlive payments: ON DELETE SET NULL, never cascade.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS balance_operations (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id             INTEGER NOT NULL REFERENCES users(id),
            operation_type      TEXT NOT NULL
                CHECK(operation_type IN ('payment','usage','refund','admin_topup')),
            amount              TEXT NOT NULL,
            balance_before      TEXT NOT NULL,
            balance_after       TEXT NOT NULL,
            related_payment_id  INTEGER REFERENCES payments(id) ON DELETE SET NULL,
            related_message_id  INTEGER,
            admin_user_id       INTEGER,
            description         TEXT,
            created_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_balance_ops_user
            ON balance_operations (user_id, id DESC);",
    )
}

fn create_tool_calls_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tool_calls (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id               INTEGER NOT NULL,
            chat_id               INTEGER NOT NULL,
            thread_id             INTEGER NOT NULL,
            message_id            INTEGER NOT NULL,
            tool_name             TEXT NOT NULL,
            model_id              TEXT NOT NULL,
            input_tokens          INTEGER NOT NULL DEFAULT 0,
            output_tokens         INTEGER NOT NULL DEFAULT 0,
            cache_read_tokens     INTEGER NOT NULL DEFAULT 0,
            cache_creation_tokens INTEGER NOT NULL DEFAULT 0,
            cost_usd              TEXT NOT NULL DEFAULT '0.0000',
            duration_ms           INTEGER,
            success               INTEGER NOT NULL DEFAULT 1,
            created_at            TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tool_calls_user ON tool_calls (user_id);",
    )
}
