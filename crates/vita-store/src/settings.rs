use std::sync::Mutex;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// The only well-known key.
pub const NICKNAME_KEY: &str = "nickname";

/// Small key→value store for app-level preferences.
pub struct SettingsStore {
    db: Mutex<Connection>,
}

impl SettingsStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT value FROM app_settings WHERE key = ?1",
            rusqlite::params![key],
            |row| row.get(0),
        ) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO app_settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    /// The user's nickname, `None` when unset or blank.
    pub fn nickname(&self) -> Result<Option<String>> {
        Ok(self
            .get(NICKNAME_KEY)?
            .filter(|s| !s.trim().is_empty()))
    }
}
