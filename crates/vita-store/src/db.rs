use rusqlite::{Connection, Result};

/// Initialise all tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    create_life_record_table(conn)?;
    create_token_usage_table(conn)?;
    create_chat_tables(conn)?;
    create_settings_table(conn)?;
    Ok(())
}

fn create_life_record_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS life_record (
            id               TEXT PRIMARY KEY,
            submitted_at     TEXT NOT NULL,
            record_time      TEXT,
            input_type       TEXT NOT NULL,
            category         TEXT NOT NULL,
            raw_content      TEXT,
            meta_data        TEXT,
            ai_insight       TEXT,
            tags             TEXT,
            dimension_scores TEXT,
            failed_phases    TEXT,
            image_type       TEXT,
            image_path       TEXT,
            thumbnail_path   TEXT,
            image_saved      INTEGER NOT NULL DEFAULT 0,
            is_deleted       INTEGER NOT NULL DEFAULT 0,
            is_public        INTEGER NOT NULL DEFAULT 0,
            is_bookmarked    INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_record_live
            ON life_record(is_deleted, submitted_at DESC);
        CREATE INDEX IF NOT EXISTS idx_record_category
            ON life_record(category);",
    )
}

fn create_token_usage_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS token_usage (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at        TEXT NOT NULL,
            model             TEXT NOT NULL,
            model_bucket      TEXT NOT NULL,
            prompt_tokens     INTEGER NOT NULL DEFAULT 0,
            completion_tokens INTEGER NOT NULL DEFAULT 0,
            total_tokens      INTEGER NOT NULL DEFAULT 0,
            estimated_cost    REAL NOT NULL DEFAULT 0,
            task_tag          TEXT NOT NULL,
            task_description  TEXT,
            related_record_id TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_usage_created
            ON token_usage(created_at DESC);",
    )
}

fn create_chat_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS chat_conversation (
            id         TEXT PRIMARY KEY,
            title      TEXT NOT NULL DEFAULT 'New conversation',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_conversation_updated
            ON chat_conversation(updated_at DESC);
        CREATE TABLE IF NOT EXISTS chat_message (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL
                REFERENCES chat_conversation(id) ON DELETE CASCADE,
            role            TEXT NOT NULL,
            content         TEXT NOT NULL DEFAULT '',
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_message_conversation
            ON chat_message(conversation_id, created_at);",
    )
}

fn create_settings_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS app_settings (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )
}
