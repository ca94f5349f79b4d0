use rusqlite::Connection;

use crate::error::Result;

/// Open the state database with WAL journaling.
pub fn open_db(path: &std::path::Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    init_db(&conn)?;
    Ok(conn)
}

/// Initialise the state tables and index.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS state_current (
            chat_name   TEXT NOT NULL,
            key         TEXT NOT NULL,
            value       TEXT NOT NULL,
            value_type  TEXT NOT NULL,
            label       TEXT,
            constraints TEXT,
            updated_at  TEXT NOT NULL,
            updated_by  TEXT NOT NULL,
            turn_number INTEGER NOT NULL,
            PRIMARY KEY (chat_name, key)
        );
        CREATE TABLE IF NOT EXISTS state_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_name   TEXT NOT NULL,
            key         TEXT NOT NULL,
            old_value   TEXT,
            new_value   TEXT NOT NULL,
            changed_by  TEXT NOT NULL,
            turn_number INTEGER NOT NULL,
            timestamp   TEXT NOT NULL,
            reason      TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_state_log_chat
            ON state_log(chat_name, turn_number);",
    )?;
    Ok(())
}
