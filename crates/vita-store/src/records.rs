use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDateTime;
use rusqlite::Connection;
use tracing::{debug, instrument};

use vita_core::time::{format_store, parse_store};
use vita_core::types::{Category, DimensionScores, InputType, Phase};

use crate::error::{Result, StoreError};
use crate::types::{HistoryQuery, LifeRecord, NewRecord};

const RECORD_COLUMNS: &str = "id, submitted_at, record_time, input_type, category, raw_content,
     meta_data, ai_insight, tags, dimension_scores, failed_phases,
     image_type, image_path, thumbnail_path, image_saved,
     is_deleted, is_public, is_bookmarked";

/// Thread-safe manager for the `life_record` table.
///
/// Wraps a single SQLite connection in a `Mutex`; sufficient for the
/// single-node target, same trade-off as the rest of the stores.
pub struct RecordStore {
    db: Mutex<Connection>,
}

impl RecordStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Insert a freshly ingested record in a single transaction.
    #[instrument(skip(self, record), fields(id = %record.id, category = %record.category))]
    pub fn insert(&self, record: &NewRecord) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO life_record
             (id, submitted_at, record_time, input_type, category, raw_content,
              meta_data, ai_insight, tags, dimension_scores, failed_phases,
              image_type, image_path, thumbnail_path, image_saved,
              is_deleted, is_public, is_bookmarked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 0, 0, 0)",
            rusqlite::params![
                record.id,
                format_store(record.submitted_at),
                record.record_time.map(format_store),
                record.input_type.to_string(),
                record.category.as_str(),
                record.raw_content,
                serde_json::to_string(&record.meta_data)?,
                record.ai_insight,
                serde_json::to_string(&record.tags)?,
                serde_json::to_string(&record.dimension_scores)?,
                serde_json::to_string(&record.failed_phases)?,
                record.image_type,
                record.image_path,
                record.thumbnail_path,
                record.image_saved as i64,
            ],
        )?;
        debug!("record inserted");
        Ok(())
    }

    /// Fetch a live record by id. Soft-deleted rows read as absent.
    pub fn get(&self, id: &str) -> Result<Option<LifeRecord>> {
        let db = self.db.lock().unwrap();
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM life_record WHERE id = ?1 AND is_deleted = 0"
        );
        match db.query_row(&sql, rusqlite::params![id], row_to_record) {
            Ok(r) => Ok(Some(r?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Paged history, newest event first (`record_time` falling back to
    /// `submitted_at`), optional category filter, soft-deleted excluded.
    pub fn list(&self, query: &HistoryQuery) -> Result<Vec<LifeRecord>> {
        let db = self.db.lock().unwrap();
        let limit = if query.limit == 0 { 50 } else { query.limit } as i64;
        let offset = query.offset as i64;
        if let Some(cat) = query.category {
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM life_record
                 WHERE is_deleted = 0 AND category = ?1
                 ORDER BY COALESCE(record_time, submitted_at) DESC
                 LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = db.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params![cat.as_str(), limit, offset],
                row_to_record,
            )?;
            collect_records(rows)
        } else {
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM life_record
                 WHERE is_deleted = 0
                 ORDER BY COALESCE(record_time, submitted_at) DESC
                 LIMIT ?1 OFFSET ?2"
            );
            let mut stmt = db.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params![limit, offset], row_to_record)?;
            collect_records(rows)
        }
    }

    /// All live records submitted at or after `since`, oldest first.
    pub fn live_since(&self, since: NaiveDateTime) -> Result<Vec<LifeRecord>> {
        let db = self.db.lock().unwrap();
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM life_record
             WHERE is_deleted = 0 AND submitted_at >= ?1
             ORDER BY submitted_at"
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params![format_store(since)], row_to_record)?;
        collect_records(rows)
    }

    /// Live records of one category within a trailing window, oldest first.
    pub fn live_by_category_since(
        &self,
        category: Category,
        since: NaiveDateTime,
    ) -> Result<Vec<LifeRecord>> {
        let db = self.db.lock().unwrap();
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM life_record
             WHERE is_deleted = 0 AND category = ?1 AND submitted_at >= ?2
             ORDER BY submitted_at"
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![category.as_str(), format_store(since)],
            row_to_record,
        )?;
        collect_records(rows)
    }

    /// Every record including soft-deleted rows — admin export only.
    pub fn export_all(&self) -> Result<Vec<LifeRecord>> {
        let db = self.db.lock().unwrap();
        let sql = format!("SELECT {RECORD_COLUMNS} FROM life_record ORDER BY submitted_at");
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_record)?;
        collect_records(rows)
    }

    /// Every live record — the reconciliation sweep input.
    pub fn all_live(&self) -> Result<Vec<LifeRecord>> {
        let db = self.db.lock().unwrap();
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM life_record
             WHERE is_deleted = 0 ORDER BY submitted_at"
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_record)?;
        collect_records(rows)
    }

    pub fn count_live(&self) -> Result<u64> {
        let db = self.db.lock().unwrap();
        let n: i64 = db.query_row(
            "SELECT COUNT(*) FROM life_record WHERE is_deleted = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn count_live_since(&self, since: NaiveDateTime) -> Result<u64> {
        let db = self.db.lock().unwrap();
        let n: i64 = db.query_row(
            "SELECT COUNT(*) FROM life_record WHERE is_deleted = 0 AND submitted_at >= ?1",
            rusqlite::params![format_store(since)],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Live record count per category.
    pub fn counts_by_category(&self) -> Result<HashMap<Category, u64>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT category, COUNT(*) FROM life_record
             WHERE is_deleted = 0 GROUP BY category",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (cat, n) = row?;
            if let Ok(cat) = cat.parse::<Category>() {
                out.insert(cat, n as u64);
            }
        }
        Ok(out)
    }

    /// Tag frequency over records submitted after `since`, most frequent
    /// first. Feeds the tagger's vocabulary priming.
    pub fn trending_tags(&self, since: NaiveDateTime, limit: usize) -> Result<Vec<(String, u64)>> {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for record in self.live_since(since)? {
            for tag in record.tags {
                *counts.entry(tag).or_insert(0) += 1;
            }
        }
        let mut sorted: Vec<(String, u64)> = counts.into_iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sorted.truncate(limit);
        Ok(sorted)
    }

    /// Soft delete. Returns `NotFound` if the record never existed or was
    /// already deleted.
    #[instrument(skip(self))]
    pub fn soft_delete(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE life_record SET is_deleted = 1 WHERE id = ?1 AND is_deleted = 0",
            rusqlite::params![id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    pub fn set_public(&self, id: &str, is_public: bool) -> Result<()> {
        self.set_flag(id, "is_public", is_public)
    }

    pub fn set_bookmarked(&self, id: &str, is_bookmarked: bool) -> Result<()> {
        self.set_flag(id, "is_bookmarked", is_bookmarked)
    }

    fn set_flag(&self, id: &str, column: &str, value: bool) -> Result<()> {
        let db = self.db.lock().unwrap();
        let sql = format!(
            "UPDATE life_record SET {column} = ?1 WHERE id = ?2 AND is_deleted = 0"
        );
        let changed = db.execute(&sql, rusqlite::params![value as i64, id])?;
        if changed == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Apply a regeneration result: overwrite the supplied enrichment fields
    /// and the failed-phase list in one transaction.
    #[instrument(skip_all, fields(id))]
    pub fn apply_regeneration(
        &self,
        id: &str,
        tags: Option<&[String]>,
        dimension_scores: Option<&DimensionScores>,
        ai_insight: Option<&str>,
        meta_data: Option<&serde_json::Value>,
        failed_phases: &[Phase],
    ) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        if let Some(tags) = tags {
            tx.execute(
                "UPDATE life_record SET tags = ?1 WHERE id = ?2 AND is_deleted = 0",
                rusqlite::params![serde_json::to_string(tags)?, id],
            )?;
        }
        if let Some(scores) = dimension_scores {
            tx.execute(
                "UPDATE life_record SET dimension_scores = ?1 WHERE id = ?2 AND is_deleted = 0",
                rusqlite::params![serde_json::to_string(scores)?, id],
            )?;
        }
        if let Some(insight) = ai_insight {
            tx.execute(
                "UPDATE life_record SET ai_insight = ?1 WHERE id = ?2 AND is_deleted = 0",
                rusqlite::params![insight, id],
            )?;
        }
        if let Some(meta) = meta_data {
            tx.execute(
                "UPDATE life_record SET meta_data = ?1 WHERE id = ?2 AND is_deleted = 0",
                rusqlite::params![serde_json::to_string(meta)?, id],
            )?;
        }
        let changed = tx.execute(
            "UPDATE life_record SET failed_phases = ?1 WHERE id = ?2 AND is_deleted = 0",
            rusqlite::params![serde_json::to_string(failed_phases)?, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        tx.commit()?;
        Ok(())
    }
}

type RowResult = std::result::Result<Result<LifeRecord>, rusqlite::Error>;

fn collect_records(rows: impl Iterator<Item = RowResult>) -> Result<Vec<LifeRecord>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row??);
    }
    Ok(out)
}

/// Map a SQLite row to a `LifeRecord`. JSON columns that fail to parse are
/// surfaced as `Corrupt` rather than silently zeroed.
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<LifeRecord>> {
    Ok(build_record(row))
}

fn build_record(row: &rusqlite::Row<'_>) -> Result<LifeRecord> {
    let submitted_at: String = row.get(1)?;
    let record_time: Option<String> = row.get(2)?;
    let input_type: String = row.get(3)?;
    let category: String = row.get(4)?;
    let meta_data: Option<String> = row.get(6)?;
    let tags: Option<String> = row.get(8)?;
    let dimension_scores: Option<String> = row.get(9)?;
    let failed_phases: Option<String> = row.get(10)?;

    Ok(LifeRecord {
        id: row.get(0)?,
        submitted_at: parse_store(&submitted_at)
            .ok_or_else(|| StoreError::Corrupt(format!("submitted_at: {submitted_at}")))?,
        record_time: record_time.as_deref().and_then(parse_store),
        input_type: input_type
            .parse::<InputType>()
            .map_err(StoreError::Corrupt)?,
        category: category.parse::<Category>().map_err(StoreError::Corrupt)?,
        raw_content: row.get(5)?,
        meta_data: parse_json_column(meta_data, serde_json::json!({}))?,
        ai_insight: row.get(7)?,
        tags: parse_json_column(tags, serde_json::json!([]))
            .map(|v| serde_json::from_value(v).unwrap_or_default())?,
        dimension_scores: parse_json_column(dimension_scores, serde_json::json!({}))
            .map(|v| DimensionScores::from_json(&v))?,
        failed_phases: parse_json_column(failed_phases, serde_json::json!([]))
            .map(|v| serde_json::from_value(v).unwrap_or_default())?,
        image_type: row.get(11)?,
        image_path: row.get(12)?,
        thumbnail_path: row.get(13)?,
        image_saved: row.get::<_, i64>(14)? != 0,
        is_deleted: row.get::<_, i64>(15)? != 0,
        is_public: row.get::<_, i64>(16)? != 0,
        is_bookmarked: row.get::<_, i64>(17)? != 0,
    })
}

fn parse_json_column(
    raw: Option<String>,
    default: serde_json::Value,
) -> Result<serde_json::Value> {
    match raw {
        None => Ok(default),
        Some(s) if s.is_empty() => Ok(default),
        Some(s) => serde_json::from_str(&s)
            .map_err(|e| StoreError::Corrupt(format!("json column: {e}"))),
    }
}
