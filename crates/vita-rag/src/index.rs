//! Vector indexer: renders, embeds and upserts records into the collection.
//!
//! The SQL store is authoritative; everything here is best-effort and
//! reconciled at startup when coverage drops below the threshold.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Timelike;
use tracing::{info, warn};

use vita_store::types::LifeRecord;
use vita_store::RecordStore;

use crate::document::build_document_text;
use crate::error::{RagError, Result};
use crate::store::{EntryMetadata, SearchHit, VectorStore};

/// Re-index everything when live coverage falls under this share.
pub const RECONCILE_COVERAGE_THRESHOLD: f64 = 0.95;

/// Embedding seam — implemented over the AI gateway at wiring time, and by
/// fakes in tests.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ReconcileReport {
    pub total: u64,
    pub indexed: u64,
    pub failed: u64,
    pub collection_count: u64,
}

pub struct VectorIndexer {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl VectorIndexer {
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Index one record. Failures are logged, never propagated — the SQL
    /// commit already happened and must stand.
    pub async fn index(&self, record: &LifeRecord) -> bool {
        match self.try_index(record).await {
            Ok(()) => true,
            Err(e) => {
                warn!(record_id = %record.id, error = %e, "vector index failed");
                false
            }
        }
    }

    async fn try_index(&self, record: &LifeRecord) -> Result<()> {
        let document = build_document_text(record);
        if document.is_empty() {
            return Err(RagError::Storage("empty document".into()));
        }
        let embedding = self.embedder.embed(&document).await?;
        let when = record.effective_time();
        let sub_categories: Vec<&str> = record
            .meta_data
            .get("sub_categories")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        let meta = EntryMetadata {
            category: record.category.as_str().to_string(),
            date: when.format("%Y-%m-%d").to_string(),
            hour: when.hour(),
            sub_categories: sub_categories.join(","),
            tags: record
                .tags
                .iter()
                .take(10)
                .cloned()
                .collect::<Vec<_>>()
                .join(","),
        };
        self.store.upsert(&record.id, &document, &embedding, &meta)
    }

    /// Best-effort removal on soft delete.
    pub async fn remove(&self, record_id: &str) {
        if let Err(e) = self.store.remove(record_id) {
            warn!(record_id, error = %e, "vector remove failed");
        }
    }

    /// Semantic top-`n`; failures surface as an empty hit list.
    pub async fn search(&self, query: &str, n: usize) -> Vec<SearchHit> {
        let embedding = match self.embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "query embedding failed");
                return Vec::new();
            }
        };
        match self.store.search(&embedding, n) {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "vector search failed");
                Vec::new()
            }
        }
    }

    /// Collection size vs live-record count.
    pub fn coverage(&self, records: &RecordStore) -> Result<(u64, u64, f64)> {
        let indexed = self.store.count()?;
        let live = records
            .count_live()
            .map_err(|e| RagError::Storage(e.to_string()))?;
        let share = if live == 0 {
            1.0
        } else {
            indexed as f64 / live as f64
        };
        Ok((indexed, live, share))
    }

    /// Full re-upsert of every live record.
    pub async fn reconcile(&self, records: &RecordStore) -> ReconcileReport {
        let live = match records.all_live() {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "reconcile could not read records");
                return ReconcileReport::default();
            }
        };
        let mut report = ReconcileReport {
            total: live.len() as u64,
            ..Default::default()
        };
        for record in &live {
            if self.index(record).await {
                report.indexed += 1;
            } else {
                report.failed += 1;
            }
        }
        report.collection_count = self.store.count().unwrap_or(0);
        info!(
            total = report.total,
            indexed = report.indexed,
            failed = report.failed,
            "vector reconcile finished"
        );
        report
    }

    /// Startup pass: reconcile only when coverage dropped below the
    /// threshold. Runs in the background; failure never blocks serving.
    pub async fn reconcile_if_needed(&self, records: &RecordStore) -> Option<ReconcileReport> {
        match self.coverage(records) {
            Ok((indexed, live, share)) if share < RECONCILE_COVERAGE_THRESHOLD => {
                info!(indexed, live, share, "vector coverage low, reconciling");
                Some(self.reconcile(records).await)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "coverage check failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use vita_core::types::{Category, DimensionScores, InputType};
    use vita_store::types::NewRecord;

    struct HashEmbedder;

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            // Deterministic toy embedding: char-class frequencies.
            let mut v = [0f32; 4];
            for c in text.chars() {
                let i = (c as usize) % 4;
                v[i] += 1.0;
            }
            Ok(v.to_vec())
        }
    }

    fn record_store() -> RecordStore {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        vita_store::db::init_db(&conn).unwrap();
        RecordStore::new(conn)
    }

    fn new_record(id: &str) -> NewRecord {
        NewRecord {
            id: id.to_string(),
            submitted_at: NaiveDate::from_ymd_opt(2026, 2, 5)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            record_time: None,
            input_type: InputType::Text,
            category: Category::Mood,
            raw_content: Some(format!("note {id}")),
            meta_data: serde_json::json!({}),
            ai_insight: None,
            tags: vec![],
            dimension_scores: DimensionScores::new(),
            failed_phases: vec![],
            image_type: None,
            image_path: None,
            thumbnail_path: None,
            image_saved: false,
        }
    }

    fn indexer() -> (tempfile::TempDir, VectorIndexer) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(VectorStore::open(dir.path()).unwrap());
        (dir, VectorIndexer::new(store, Arc::new(HashEmbedder)))
    }

    #[tokio::test]
    async fn index_and_remove_round_trip() {
        let records = record_store();
        records.insert(&new_record("r1")).unwrap();
        let record = records.get("r1").unwrap().unwrap();

        let (_dir, indexer) = indexer();
        assert!(indexer.index(&record).await);
        assert!(indexer.store().contains("r1").unwrap());

        indexer.remove("r1").await;
        assert!(!indexer.store().contains("r1").unwrap());
    }

    #[tokio::test]
    async fn reconcile_runs_when_coverage_low() {
        let records = record_store();
        for i in 0..5 {
            records.insert(&new_record(&format!("r{i}"))).unwrap();
        }
        let (_dir, indexer) = indexer();

        let report = indexer.reconcile_if_needed(&records).await.unwrap();
        assert_eq!(report.total, 5);
        assert_eq!(report.indexed, 5);
        assert_eq!(report.collection_count, 5);

        // Fully covered now; a second pass is a no-op.
        assert!(indexer.reconcile_if_needed(&records).await.is_none());
    }

    #[tokio::test]
    async fn empty_store_counts_as_covered() {
        let records = record_store();
        let (_dir, indexer) = indexer();
        assert!(indexer.reconcile_if_needed(&records).await.is_none());
    }
}
