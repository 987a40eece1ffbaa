use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Serialize;
use tracing::instrument;

use vita_core::time::format_store;

use crate::error::Result;
use crate::types::TokenUsageRow;

/// USD per 1K tokens, keyed by normalized model name. GLM rates are entered
/// in USD directly. Unknown models fall back to [`DEFAULT_RATE`].
const TOKEN_PRICES: &[(&str, f64, f64)] = &[
    // (model, input, output)
    ("gpt-4o", 0.005, 0.015),
    ("gpt-4o-mini", 0.00015, 0.0006),
    ("gpt-3.5-turbo", 0.0005, 0.0015),
    ("text-embedding-3-small", 0.00002, 0.0),
    ("glm-4.7", 0.0006, 0.0022),
    ("glm-4.7-flash", 0.0, 0.0),
    ("glm-4.6v", 0.0008, 0.0024),
    ("glm-4.6v-flash", 0.0, 0.0),
    ("glm-4.5", 0.0004, 0.0016),
    ("glm-4-flash", 0.0, 0.0),
    ("glm-4-air", 0.00011, 0.00011),
    ("embedding-3", 0.00007, 0.0),
];

/// Fallback (input, output) rate for models missing from the table.
const DEFAULT_RATE: (f64, f64) = (0.01, 0.03);

/// Estimated USD cost of one call.
pub fn calculate_cost(model: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
    let normalized = model.trim().to_ascii_lowercase();
    let (input, output) = TOKEN_PRICES
        .iter()
        .find(|(name, _, _)| *name == normalized)
        .map(|(_, i, o)| (*i, *o))
        .unwrap_or(DEFAULT_RATE);
    let cost = (prompt_tokens as f64 / 1000.0) * input + (completion_tokens as f64 / 1000.0) * output;
    (cost * 1e6).round() / 1e6
}

/// Derive the coarse accounting bucket from a model name.
///
/// Order matters: embedding first, then the free flash tier (split on whether
/// the family prefix looks like a vision model), then paid vision, then the
/// paid text tiers.
pub fn model_bucket(model: &str) -> &'static str {
    let lower = model.trim().to_ascii_lowercase();
    if lower.contains("embedding") {
        return "embedding";
    }
    if lower.contains("flash") {
        let family = lower.split("flash").next().unwrap_or("");
        return if family.contains('v') {
            "vision_free"
        } else {
            "text_free"
        };
    }
    if lower.contains("4.6v") || lower.contains("4v") {
        return "vision";
    }
    if lower.contains("gpt-4o-mini") || lower.contains("gpt-3.5") {
        return "text";
    }
    if lower.contains("gpt-4o") || (lower.contains("glm-4") && !lower.contains("flash")) {
        return "smart";
    }
    "other"
}

/// Aggregate usage figures for a window or bucket.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageAggregate {
    pub request_count: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageStats {
    pub overall: UsageAggregate,
    pub by_bucket: HashMap<String, UsageAggregate>,
    pub by_model: HashMap<String, UsageAggregate>,
    pub by_task: HashMap<String, UsageAggregate>,
}

/// Append-only record of every upstream call.
pub struct UsageLedger {
    db: Mutex<Connection>,
}

impl UsageLedger {
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Append one row. The bucket and cost estimate are derived here so
    /// callers only hand over the raw usage block.
    #[instrument(skip(self), fields(model, task_tag))]
    pub fn record(
        &self,
        model: &str,
        prompt_tokens: u32,
        completion_tokens: u32,
        task_tag: &str,
        task_description: Option<&str>,
        related_record_id: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<()> {
        let total = prompt_tokens + completion_tokens;
        let cost = calculate_cost(model, prompt_tokens, completion_tokens);
        let bucket = model_bucket(model);
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO token_usage
             (created_at, model, model_bucket, prompt_tokens, completion_tokens,
              total_tokens, estimated_cost, task_tag, task_description, related_record_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                format_store(now),
                model,
                bucket,
                prompt_tokens,
                completion_tokens,
                total,
                cost,
                task_tag,
                task_description,
                related_record_id,
            ],
        )?;
        Ok(())
    }

    /// Aggregate everything recorded at or after `since` (all time when
    /// `None`).
    pub fn stats(&self, since: Option<NaiveDateTime>) -> Result<UsageStats> {
        let rows = self.rows_since(since)?;
        let mut stats = UsageStats::default();
        for row in &rows {
            accumulate(&mut stats.overall, row);
            accumulate(
                stats
                    .by_bucket
                    .entry(row.model_bucket.clone())
                    .or_default(),
                row,
            );
            accumulate(stats.by_model.entry(row.model.clone()).or_default(), row);
            accumulate(stats.by_task.entry(row.task_tag.clone()).or_default(), row);
        }
        Ok(stats)
    }

    /// The most recent `limit` rows, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<TokenUsageRow>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, created_at, model, model_bucket, prompt_tokens, completion_tokens,
                    total_tokens, estimated_cost, task_tag, task_description, related_record_id
             FROM token_usage ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![limit as i64], row_to_usage)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn count(&self) -> Result<u64> {
        let db = self.db.lock().unwrap();
        let n: i64 = db.query_row("SELECT COUNT(*) FROM token_usage", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    fn rows_since(&self, since: Option<NaiveDateTime>) -> Result<Vec<TokenUsageRow>> {
        let db = self.db.lock().unwrap();
        let mut out = Vec::new();
        match since {
            Some(since) => {
                let mut stmt = db.prepare(
                    "SELECT id, created_at, model, model_bucket, prompt_tokens, completion_tokens,
                            total_tokens, estimated_cost, task_tag, task_description, related_record_id
                     FROM token_usage WHERE created_at >= ?1 ORDER BY id",
                )?;
                let rows = stmt.query_map(rusqlite::params![format_store(since)], row_to_usage)?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = db.prepare(
                    "SELECT id, created_at, model, model_bucket, prompt_tokens, completion_tokens,
                            total_tokens, estimated_cost, task_tag, task_description, related_record_id
                     FROM token_usage ORDER BY id",
                )?;
                let rows = stmt.query_map([], row_to_usage)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }
}

fn accumulate(agg: &mut UsageAggregate, row: &TokenUsageRow) {
    agg.request_count += 1;
    agg.prompt_tokens += row.prompt_tokens as u64;
    agg.completion_tokens += row.completion_tokens as u64;
    agg.total_tokens += row.total_tokens as u64;
    agg.total_cost += row.estimated_cost;
}

fn row_to_usage(row: &rusqlite::Row<'_>) -> rusqlite::Result<TokenUsageRow> {
    Ok(TokenUsageRow {
        id: row.get(0)?,
        created_at: row.get(1)?,
        model: row.get(2)?,
        model_bucket: row.get(3)?,
        prompt_tokens: row.get::<_, i64>(4)? as u32,
        completion_tokens: row.get::<_, i64>(5)? as u32,
        total_tokens: row.get::<_, i64>(6)? as u32,
        estimated_cost: row.get(7)?,
        task_tag: row.get(8)?,
        task_description: row.get(9)?,
        related_record_id: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ledger() -> UsageLedger {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        UsageLedger::new(conn)
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 5)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    #[test]
    fn bucket_rules() {
        assert_eq!(model_bucket("embedding-3"), "embedding");
        assert_eq!(model_bucket("text-embedding-3-small"), "embedding");
        assert_eq!(model_bucket("glm-4.6v-flash"), "vision_free");
        assert_eq!(model_bucket("glm-4.7-flash"), "text_free");
        assert_eq!(model_bucket("glm-4.6v"), "vision");
        assert_eq!(model_bucket("gpt-4o-mini"), "text");
        assert_eq!(model_bucket("gpt-4o"), "smart");
        assert_eq!(model_bucket("glm-4.7"), "smart");
        assert_eq!(model_bucket("mystery-model"), "other");
    }

    #[test]
    fn cost_uses_table_and_default() {
        let c = calculate_cost("gpt-4o", 1000, 1000);
        assert!((c - 0.02).abs() < 1e-9);
        // Flash tier is free.
        assert_eq!(calculate_cost("glm-4.7-flash", 5000, 5000), 0.0);
        // Unknown model gets the default rate.
        let d = calculate_cost("mystery-model", 1000, 0);
        assert!((d - 0.01).abs() < 1e-9);
    }

    #[test]
    fn record_and_aggregate() {
        let ledger = ledger();
        ledger
            .record("glm-4.7", 100, 50, "extract_data", None, Some("r1"), now())
            .unwrap();
        ledger
            .record("glm-4.7-flash", 10, 5, "generate_tags", None, None, now())
            .unwrap();

        let stats = ledger.stats(None).unwrap();
        assert_eq!(stats.overall.request_count, 2);
        assert_eq!(stats.overall.total_tokens, 165);
        assert_eq!(stats.by_bucket["smart"].request_count, 1);
        assert_eq!(stats.by_task["generate_tags"].total_tokens, 15);

        let recent = ledger.recent(1).unwrap();
        assert_eq!(recent[0].model, "glm-4.7-flash");
        assert_eq!(recent[0].related_record_id, None);
    }
}
