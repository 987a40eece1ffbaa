use std::sync::Mutex;

use chrono::NaiveDateTime;
use rusqlite::Connection;
use tracing::instrument;
use uuid::Uuid;

use vita_core::time::format_store;

use crate::error::{Result, StoreError};
use crate::types::{ChatConversation, ChatMessage};

/// Titles are trimmed from the first user message.
pub const TITLE_MAX_CHARS: usize = 30;

/// Thread-safe manager for chat conversations and messages.
pub struct ChatStore {
    db: Mutex<Connection>,
}

impl ChatStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Create a conversation titled from the opening message (first 30 chars,
    /// ellipsized when cut).
    #[instrument(skip(self, first_message))]
    pub fn create_conversation(
        &self,
        first_message: &str,
        now: NaiveDateTime,
    ) -> Result<ChatConversation> {
        let id = Uuid::new_v4().to_string();
        let title = derive_title(first_message);
        let ts = format_store(now);
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO chat_conversation (id, title, created_at, updated_at, is_deleted)
             VALUES (?1, ?2, ?3, ?3, 0)",
            rusqlite::params![id, title, ts],
        )?;
        Ok(ChatConversation {
            id,
            title,
            created_at: ts.clone(),
            updated_at: ts,
            is_deleted: false,
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ChatConversation>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, title, created_at, updated_at, is_deleted
             FROM chat_conversation WHERE id = ?1 AND is_deleted = 0",
            rusqlite::params![id],
            row_to_conversation,
        ) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Conversations ordered by most recent activity.
    pub fn list_conversations(&self, limit: usize) -> Result<Vec<ChatConversation>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, title, created_at, updated_at, is_deleted
             FROM chat_conversation WHERE is_deleted = 0
             ORDER BY updated_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![limit as i64], row_to_conversation)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Rename; titles are capped at 200 chars in the schema contract.
    pub fn rename_conversation(&self, id: &str, title: &str, now: NaiveDateTime) -> Result<()> {
        let title: String = title.chars().take(200).collect();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE chat_conversation SET title = ?1, updated_at = ?2
             WHERE id = ?3 AND is_deleted = 0",
            rusqlite::params![title, format_store(now), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Soft-delete a conversation. Messages stay behind the cascade FK for
    /// the hard-delete path; soft delete just hides the thread.
    pub fn delete_conversation(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE chat_conversation SET is_deleted = 1 WHERE id = ?1 AND is_deleted = 0",
            rusqlite::params![id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Append one message and advance the conversation's `updated_at` to the
    /// persistence timestamp.
    #[instrument(skip(self, content), fields(conversation_id, role))]
    pub fn append_message(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str,
        now: NaiveDateTime,
    ) -> Result<ChatMessage> {
        let id = Uuid::new_v4().to_string();
        let ts = format_store(now);
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO chat_message (id, conversation_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![id, conversation_id, role, content, ts],
        )?;
        db.execute(
            "UPDATE chat_conversation SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![ts, conversation_id],
        )?;
        Ok(ChatMessage {
            id,
            conversation_id: conversation_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            created_at: ts,
        })
    }

    /// Messages of a conversation in insertion order.
    pub fn list_messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, conversation_id, role, content, created_at
             FROM chat_message WHERE conversation_id = ?1
             ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(rusqlite::params![conversation_id], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// The most recent `limit` messages, oldest first — replay window for
    /// the streamer's history trimming.
    pub fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, conversation_id, role, content, created_at FROM (
                 SELECT * FROM chat_message WHERE conversation_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2
             ) ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![conversation_id, limit as i64],
            row_to_message,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn count_messages(&self, conversation_id: &str, role: Option<&str>) -> Result<u64> {
        let db = self.db.lock().unwrap();
        let n: i64 = match role {
            Some(role) => db.query_row(
                "SELECT COUNT(*) FROM chat_message WHERE conversation_id = ?1 AND role = ?2",
                rusqlite::params![conversation_id, role],
                |row| row.get(0),
            )?,
            None => db.query_row(
                "SELECT COUNT(*) FROM chat_message WHERE conversation_id = ?1",
                rusqlite::params![conversation_id],
                |row| row.get(0),
            )?,
        };
        Ok(n as u64)
    }
}

fn derive_title(first_message: &str) -> String {
    let trimmed = first_message.trim();
    let mut title: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        title.push('…');
    }
    if title.is_empty() {
        title = "New conversation".to_string();
    }
    title
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatConversation> {
    Ok(ChatConversation {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
        is_deleted: row.get::<_, i64>(4)? != 0,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn store() -> ChatStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        ChatStore::new(conn)
    }

    fn at(minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 5)
            .unwrap()
            .and_hms_opt(10, minute, 0)
            .unwrap()
    }

    #[test]
    fn title_is_ellipsized_at_thirty_chars() {
        let long = "how was my week and what should I change about my sleep schedule";
        let conv = store().create_conversation(long, at(0)).unwrap();
        assert_eq!(conv.title.chars().count(), TITLE_MAX_CHARS + 1);
        assert!(conv.title.ends_with('…'));

        let short = store().create_conversation("hi", at(0)).unwrap();
        assert_eq!(short.title, "hi");
    }

    #[test]
    fn append_bumps_updated_at_and_orders_messages() {
        let store = store();
        let conv = store.create_conversation("hello", at(0)).unwrap();
        store
            .append_message(&conv.id, "user", "hello", at(1))
            .unwrap();
        store
            .append_message(&conv.id, "assistant", "hi there", at(2))
            .unwrap();

        let msgs = store.list_messages(&conv.id).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, "user");
        assert_eq!(msgs[1].role, "assistant");

        let refreshed = store.get_conversation(&conv.id).unwrap().unwrap();
        assert_eq!(refreshed.updated_at, "2026-02-05 10:02:00");
    }

    #[test]
    fn recent_messages_returns_tail_in_order() {
        let store = store();
        let conv = store.create_conversation("hello", at(0)).unwrap();
        for i in 0..10 {
            store
                .append_message(&conv.id, "user", &format!("m{i}"), at(i))
                .unwrap();
        }
        let tail = store.recent_messages(&conv.id, 3).unwrap();
        let contents: Vec<&str> = tail.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m7", "m8", "m9"]);
    }

    #[test]
    fn soft_delete_hides_conversation() {
        let store = store();
        let conv = store.create_conversation("bye", at(0)).unwrap();
        store.delete_conversation(&conv.id).unwrap();
        assert!(store.get_conversation(&conv.id).unwrap().is_none());
        assert!(store.list_conversations(10).unwrap().is_empty());
    }
}
