//! Persistent vector collection on sqlite-vec.
//!
//! Dual-table design: `vec_meta` holds the rendered document and flat
//! metadata keyed by record id; the `vec0` virtual table holds embeddings
//! row-id joined to the meta row. Upsert is delete-then-insert on the same
//! rowid, so re-indexing a record is idempotent.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};

use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::{RagError, Result};

static SQLITE_VEC_INIT: Once = Once::new();

/// Collection file name under the persist dir.
pub const COLLECTION_FILE: &str = "life_records.db";
const VEC_TABLE: &str = "life_records_vec";

/// Flat metadata carried with each entry.
#[derive(Debug, Clone)]
pub struct EntryMetadata {
    pub category: String,
    pub date: String,
    pub hour: u32,
    pub sub_categories: String,
    pub tags: String,
}

/// One semantic search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub record_id: String,
    pub document: String,
    pub category: String,
    pub date: String,
    pub distance: f64,
    /// `1 / (1 + distance)` — higher is closer.
    pub relevance: f64,
}

pub struct VectorStore {
    db: Mutex<Connection>,
    #[allow(dead_code)]
    path: PathBuf,
}

impl VectorStore {
    /// Open (or create) the collection under `persist_dir`. Registers the
    /// sqlite-vec extension once per process.
    pub fn open(persist_dir: &Path) -> Result<Self> {
        SQLITE_VEC_INIT.call_once(|| unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        });

        std::fs::create_dir_all(persist_dir)
            .map_err(|e| RagError::Storage(format!("create persist dir: {e}")))?;
        let path = persist_dir.join(COLLECTION_FILE);
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS vec_meta (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                record_id      TEXT NOT NULL UNIQUE,
                document       TEXT NOT NULL,
                category       TEXT NOT NULL,
                date           TEXT NOT NULL,
                hour           INTEGER NOT NULL,
                sub_categories TEXT NOT NULL DEFAULT '',
                tags           TEXT NOT NULL DEFAULT ''
            );
            CREATE TABLE IF NOT EXISTS vec_config (
                key   TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            db: Mutex::new(conn),
            path,
        })
    }

    /// The embedding table is created lazily at the first upsert, once the
    /// embedder's dimension is known.
    fn ensure_vec_table(conn: &Connection, dimension: usize) -> Result<()> {
        let stored: Option<i64> = conn
            .query_row(
                "SELECT value FROM vec_config WHERE key = 'dimension'",
                [],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        match stored {
            Some(d) if d as usize == dimension => Ok(()),
            Some(d) => Err(RagError::Storage(format!(
                "embedding dimension {dimension} != collection dimension {d}"
            ))),
            None => {
                conn.execute_batch(&format!(
                    "CREATE VIRTUAL TABLE IF NOT EXISTS {VEC_TABLE}
                         USING vec0(embedding float[{dimension}]);"
                ))?;
                conn.execute(
                    "INSERT OR REPLACE INTO vec_config (key, value) VALUES ('dimension', ?1)",
                    params![dimension as i64],
                )?;
                debug!(dimension, "created vector table");
                Ok(())
            }
        }
    }

    /// Insert or replace the entry for `record_id`.
    pub fn upsert(
        &self,
        record_id: &str,
        document: &str,
        embedding: &[f32],
        meta: &EntryMetadata,
    ) -> Result<()> {
        let conn = self.db.lock().unwrap();
        Self::ensure_vec_table(&conn, embedding.len())?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM vec_meta WHERE record_id = ?1",
                params![record_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let id = match existing {
            Some(id) => {
                conn.execute(
                    &format!("DELETE FROM {VEC_TABLE} WHERE rowid = ?1"),
                    params![id],
                )?;
                conn.execute(
                    "UPDATE vec_meta SET document = ?1, category = ?2, date = ?3,
                            hour = ?4, sub_categories = ?5, tags = ?6
                     WHERE id = ?7",
                    params![
                        document,
                        meta.category,
                        meta.date,
                        meta.hour,
                        meta.sub_categories,
                        meta.tags,
                        id
                    ],
                )?;
                id
            }
            None => {
                conn.execute(
                    "INSERT INTO vec_meta
                         (record_id, document, category, date, hour, sub_categories, tags)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        record_id,
                        document,
                        meta.category,
                        meta.date,
                        meta.hour,
                        meta.sub_categories,
                        meta.tags
                    ],
                )?;
                conn.last_insert_rowid()
            }
        };

        conn.execute(
            &format!("INSERT INTO {VEC_TABLE} (rowid, embedding) VALUES (?1, ?2)"),
            params![id, vector_json(embedding)],
        )?;
        Ok(())
    }

    /// Delete the entry for `record_id`; absent entries are a no-op.
    pub fn remove(&self, record_id: &str) -> Result<()> {
        let conn = self.db.lock().unwrap();
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM vec_meta WHERE record_id = ?1",
                params![record_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        if let Some(id) = id {
            // The vec table may not exist yet if nothing was ever upserted.
            let _ = conn.execute(
                &format!("DELETE FROM {VEC_TABLE} WHERE rowid = ?1"),
                params![id],
            );
            conn.execute("DELETE FROM vec_meta WHERE id = ?1", params![id])?;
        }
        Ok(())
    }

    pub fn contains(&self, record_id: &str) -> Result<bool> {
        let conn = self.db.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM vec_meta WHERE record_id = ?1",
            params![record_id],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.db.lock().unwrap();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM vec_meta", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// KNN search: the `n` nearest entries to `query`, closest first.
    pub fn search(&self, query: &[f32], n: usize) -> Result<Vec<SearchHit>> {
        let conn = self.db.lock().unwrap();
        if self.count_locked(&conn)? == 0 {
            return Ok(Vec::new());
        }

        let knn_sql = format!(
            "SELECT rowid, distance FROM {VEC_TABLE} WHERE embedding MATCH ?1 AND k = ?2"
        );
        let mut stmt = conn.prepare(&knn_sql)?;
        let pairs: Vec<(i64, f64)> = stmt
            .query_map(params![vector_json(query), n as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<_, _>>()?;

        let mut hits = Vec::with_capacity(pairs.len());
        for (id, distance) in pairs {
            let row = conn.query_row(
                "SELECT record_id, document, category, date FROM vec_meta WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            );
            if let Ok((record_id, document, category, date)) = row {
                hits.push(SearchHit {
                    record_id,
                    document,
                    category,
                    date,
                    distance,
                    relevance: 1.0 / (1.0 + distance),
                });
            }
        }
        Ok(hits)
    }

    fn count_locked(&self, conn: &Connection) -> Result<u64> {
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM vec_meta", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

/// sqlite-vec accepts embeddings as JSON arrays.
fn vector_json(v: &[f32]) -> String {
    let parts: Vec<String> = v.iter().map(|f| f.to_string()).collect();
    format!("[{}]", parts.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(category: &str) -> EntryMetadata {
        EntryMetadata {
            category: category.to_string(),
            date: "2026-02-05".to_string(),
            hour: 10,
            sub_categories: String::new(),
            tags: "#time/forenoon".to_string(),
        }
    }

    fn open_store() -> (tempfile::TempDir, VectorStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn upsert_is_idempotent_by_key() {
        let (_dir, store) = open_store();
        store
            .upsert("r1", "doc one", &[1.0, 0.0, 0.0], &meta("ACTIVITY"))
            .unwrap();
        store
            .upsert("r1", "doc one v2", &[0.9, 0.1, 0.0], &meta("ACTIVITY"))
            .unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.contains("r1").unwrap());
    }

    #[test]
    fn search_returns_nearest_first() {
        let (_dir, store) = open_store();
        store
            .upsert("east", "east doc", &[1.0, 0.0, 0.0], &meta("MOOD"))
            .unwrap();
        store
            .upsert("north", "north doc", &[0.0, 1.0, 0.0], &meta("SLEEP"))
            .unwrap();
        store
            .upsert("up", "up doc", &[0.0, 0.0, 1.0], &meta("DIET"))
            .unwrap();

        let hits = store.search(&[0.9, 0.1, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record_id, "east");
        assert!(hits[0].relevance >= hits[1].relevance);
    }

    #[test]
    fn remove_deletes_entry() {
        let (_dir, store) = open_store();
        store
            .upsert("r1", "doc", &[1.0, 0.0, 0.0], &meta("MOOD"))
            .unwrap();
        store.remove("r1").unwrap();
        assert_eq!(store.count().unwrap(), 0);
        // Removing again is a no-op.
        store.remove("r1").unwrap();
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let (_dir, store) = open_store();
        store
            .upsert("r1", "doc", &[1.0, 0.0, 0.0], &meta("MOOD"))
            .unwrap();
        let err = store
            .upsert("r2", "doc", &[1.0, 0.0], &meta("MOOD"))
            .unwrap_err();
        assert!(matches!(err, RagError::Storage(_)));
    }

    #[test]
    fn empty_collection_searches_empty() {
        let (_dir, store) = open_store();
        assert!(store.search(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }
}
