//! Seven-phase ingestion orchestrator.
//!
//! Each phase fails independently; failures are recorded in `failed_phases`
//! and the pipeline proceeds. Any call that reaches the persist phase commits
//! a record — partial enrichment is acceptable, and the client gets the list
//! of phases that need repair.

use std::sync::Arc;

use base64::Engine;
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use vita_ai::classifier::{self, Classification};
use vita_ai::dimensions;
use vita_ai::extractor::{self, ExtractInput, Extraction};
use vita_ai::tagger::{self, TagInput};
use vita_ai::AiGateway;
use vita_core::config::MAX_IMAGE_BYTES;
use vita_core::time::client_anchor;
use vita_core::types::{Category, DimensionScores, ImageKind, InputType, Phase};
use vita_rag::VectorIndexer;
use vita_store::types::{LifeRecord, NewRecord};
use vita_store::{RecordStore, SettingsStore};

use crate::error::{PipelineError, Result};
use crate::images::ImageStorage;
use crate::progress::{PhaseStatus, ProgressEvent};

/// Window and size of the tag-vocabulary priming query.
const TRENDING_DAYS: i64 = 7;
const TRENDING_LIMIT: usize = 10;

/// One ingestion request.
#[derive(Debug, Clone, Default)]
pub struct FeedInput {
    pub text: Option<String>,
    pub image_bytes: Option<Vec<u8>>,
    pub category_hint: Option<Category>,
    pub client_time: Option<String>,
}

/// Terminal payload of both ingestion entry points.
#[derive(Debug, Clone, Serialize)]
pub struct FeedOutcome {
    pub id: String,
    pub category: Category,
    pub meta_data: serde_json::Value,
    pub ai_insight: Option<String>,
    pub created_at: String,
    pub record_time: Option<String>,
    pub image_saved: bool,
    pub image_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub tags: Vec<String>,
    pub dimension_scores: DimensionScores,
    pub failed_phases: Vec<Phase>,
}

impl FeedOutcome {
    pub fn from_record(record: &LifeRecord) -> Self {
        Self {
            id: record.id.clone(),
            category: record.category,
            meta_data: record.meta_data.clone(),
            ai_insight: record.ai_insight.clone(),
            created_at: iso(record.submitted_at),
            record_time: record.record_time.map(iso),
            image_saved: record.image_saved,
            image_path: record.image_path.clone(),
            thumbnail_path: record.thumbnail_path.clone(),
            tags: record.tags.clone(),
            dimension_scores: record.dimension_scores.clone(),
            failed_phases: record.failed_phases.clone(),
        }
    }
}

fn iso(dt: NaiveDateTime) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S").to_string()
}

pub struct IngestPipeline {
    records: Arc<RecordStore>,
    settings: Arc<SettingsStore>,
    gateway: Arc<AiGateway>,
    indexer: Arc<VectorIndexer>,
    images: Arc<ImageStorage>,
}

impl IngestPipeline {
    pub fn new(
        records: Arc<RecordStore>,
        settings: Arc<SettingsStore>,
        gateway: Arc<AiGateway>,
        indexer: Arc<VectorIndexer>,
        images: Arc<ImageStorage>,
    ) -> Self {
        Self {
            records,
            settings,
            gateway,
            indexer,
            images,
        }
    }

    pub fn records(&self) -> &Arc<RecordStore> {
        &self.records
    }

    pub fn indexer(&self) -> &Arc<VectorIndexer> {
        &self.indexer
    }

    pub fn gateway(&self) -> &Arc<AiGateway> {
        &self.gateway
    }

    pub(crate) fn settings_nickname(&self) -> Option<String> {
        self.settings.nickname().unwrap_or(None)
    }

    fn validate(input: &FeedInput) -> Result<()> {
        if let Some(bytes) = &input.image_bytes {
            if bytes.len() > MAX_IMAGE_BYTES {
                return Err(PipelineError::PayloadTooLarge {
                    size: bytes.len(),
                    max: MAX_IMAGE_BYTES,
                });
            }
        }
        let has_text = input
            .text
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false);
        if !has_text && input.image_bytes.is_none() {
            return Err(PipelineError::BadInput(
                "at least one of text or image is required".into(),
            ));
        }
        Ok(())
    }

    /// Request/response entry point.
    pub async fn run(&self, input: FeedInput) -> Result<FeedOutcome> {
        Self::validate(&input)?;
        self.run_inner(input, None).await
    }

    /// Streaming entry point. Inputs are validated synchronously; the
    /// returned receiver then yields `phase` events and a terminal `result`
    /// or `error` event. The producer runs to completion even if the
    /// receiver is dropped, so the commit never depends on the consumer.
    pub fn run_streaming(
        self: &Arc<Self>,
        input: FeedInput,
    ) -> Result<mpsc::Receiver<ProgressEvent>> {
        Self::validate(&input)?;
        let (tx, rx) = mpsc::channel(32);
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            match pipeline.run_inner(input, Some(&tx)).await {
                Ok(outcome) => {
                    let payload = serde_json::to_value(&outcome).unwrap_or_default();
                    let _ = tx.send(ProgressEvent::Result { payload }).await;
                }
                Err(e) => {
                    let _ = tx
                        .send(ProgressEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        });
        Ok(rx)
    }

    async fn run_inner(
        &self,
        input: FeedInput,
        tx: Option<&mpsc::Sender<ProgressEvent>>,
    ) -> Result<FeedOutcome> {
        let anchor = client_anchor(input.client_time.as_deref());
        let nickname = self.settings.nickname().unwrap_or(None);
        let mut failed: Vec<Phase> = Vec::new();

        let image_base64 = input
            .image_bytes
            .as_deref()
            .map(|b| base64::engine::general_purpose::STANDARD.encode(b));

        // Phase 1 — classify (images only). Errors degrade, never fail.
        let classification = match &image_base64 {
            Some(image) => {
                emit(tx, ProgressEvent::phase("classify", PhaseStatus::Start)).await;
                let c = match classifier::classify(&self.gateway, image, input.text.as_deref())
                    .await
                {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, "classification failed, using fallback");
                        Classification::fallback(input.text.as_deref())
                    }
                };
                emit(
                    tx,
                    ProgressEvent::phase_labeled(
                        "classify",
                        PhaseStatus::Done,
                        c.image_type.as_str(),
                    ),
                )
                .await;
                Some(c)
            }
            None => None,
        };
        let image_kind = classification
            .as_ref()
            .map(|c| c.image_type)
            .unwrap_or(ImageKind::Other);

        // Phase 2 — extract, one automatic retry, then degraded synthesis.
        emit(tx, ProgressEvent::phase("extract", PhaseStatus::Start)).await;
        let extract_input = ExtractInput {
            image_kind,
            image_base64: image_base64.as_deref(),
            text: input.text.as_deref(),
            content_hint: classification.as_ref().map(|c| c.content_hint.as_str()),
            anchor,
            nickname: nickname.as_deref(),
        };
        let extraction = self
            .extract_with_retry(&extract_input, &input, &classification, &mut failed, tx)
            .await;
        emit(tx, ProgressEvent::phase("extract", PhaseStatus::Done)).await;

        // Category priority: extractor > hint > classifier suggestion.
        // (Degraded synthesis already applied the chain; a successful
        // extraction's verdict wins outright.)
        let category = extraction.category;

        // Phase 3 — save image when the classifier wants the original kept.
        let should_save = classification
            .as_ref()
            .map(|c| c.should_save_image)
            .unwrap_or(false);
        let mut image_path = None;
        let mut thumbnail_path = None;
        let mut image_saved = false;
        if let (true, Some(bytes)) = (should_save, input.image_bytes.as_deref()) {
            emit(tx, ProgressEvent::phase("image_save", PhaseStatus::Start)).await;
            match self.images.save(bytes, image_kind.as_str(), anchor) {
                Ok(stored) => {
                    image_path = Some(stored.image_path);
                    thumbnail_path = Some(stored.thumbnail_path);
                    image_saved = true;
                }
                Err(e) => {
                    warn!(error = %e, "image save failed");
                    failed.push(Phase::ImageSave);
                }
            }
            emit(tx, ProgressEvent::phase("image_save", PhaseStatus::Done)).await;
        }

        // Phase 4 — tags. The tagger owns its retry and rules fallback.
        emit(tx, ProgressEvent::phase("tags", PhaseStatus::Start)).await;
        let trending = self
            .records
            .trending_tags(anchor - Duration::days(TRENDING_DAYS), TRENDING_LIMIT)
            .unwrap_or_default();
        let tag_input = TagInput {
            text: input.text.as_deref(),
            category,
            meta_data: &extraction.meta_data,
            anchor,
            trending: &trending,
            record_id: None,
        };
        let tags = tagger::generate_tags(&self.gateway, &tag_input).await;
        if tags.is_empty() {
            failed.push(Phase::Tags);
        }
        emit(tx, ProgressEvent::phase("tags", PhaseStatus::Done)).await;

        // Phase 5 — scores: prefer the extractor's, else the rules engine.
        emit(
            tx,
            ProgressEvent::phase("dimension_scores", PhaseStatus::Start),
        )
        .await;
        let dimension_scores = match &extraction.dimension_scores {
            Some(scores) => scores.clone(),
            None => dimensions::score_record(
                category,
                &extraction.meta_data,
                &extraction.sub_categories,
            ),
        };
        if dimension_scores.is_empty() {
            failed.push(Phase::DimensionScores);
        }
        emit(
            tx,
            ProgressEvent::phase("dimension_scores", PhaseStatus::Done),
        )
        .await;

        // Phase 6 — persist. A failure here is terminal.
        emit(tx, ProgressEvent::phase("persist", PhaseStatus::Start)).await;
        let input_type = match (&input.image_bytes, image_kind) {
            (None, _) => InputType::Text,
            (Some(_), kind) if !kind.keep_original() => InputType::Screenshot,
            (Some(_), _) => InputType::Image,
        };
        let record = NewRecord {
            id: Uuid::new_v4().to_string(),
            submitted_at: anchor,
            record_time: extraction.record_time,
            input_type,
            category,
            raw_content: input
                .text
                .clone()
                .or_else(|| classification.as_ref().map(|c| c.content_hint.clone())),
            meta_data: extraction.meta_data.clone(),
            ai_insight: Some(extraction.reply_text.clone()),
            tags,
            dimension_scores,
            failed_phases: failed.clone(),
            image_type: classification.as_ref().map(|c| c.image_type.to_string()),
            image_path,
            thumbnail_path,
            image_saved,
        };
        self.records.insert(&record)?;
        emit(tx, ProgressEvent::phase("persist", PhaseStatus::Done)).await;

        // Phase 7 — post-commit side effects. Log-only; the commit stands.
        emit(tx, ProgressEvent::phase("rag_index", PhaseStatus::Start)).await;
        let committed = self
            .records
            .get(&record.id)?
            .ok_or_else(|| PipelineError::Internal("committed record vanished".into()))?;
        let mut committed = committed;
        if !self.indexer.index(&committed).await {
            failed.push(Phase::RagIndex);
            committed.failed_phases = failed.clone();
            // Keep the stored failure list accurate for later regeneration.
            if let Err(e) =
                self.records
                    .apply_regeneration(&record.id, None, None, None, None, &failed)
            {
                warn!(error = %e, "failed to update failed_phases after index error");
            }
        }
        emit(tx, ProgressEvent::phase("rag_index", PhaseStatus::Done)).await;

        info!(
            id = %committed.id,
            category = %committed.category,
            failed = committed.failed_phases.len(),
            "ingestion committed"
        );
        Ok(FeedOutcome::from_record(&committed))
    }

    async fn extract_with_retry(
        &self,
        extract_input: &ExtractInput<'_>,
        input: &FeedInput,
        classification: &Option<Classification>,
        failed: &mut Vec<Phase>,
        tx: Option<&mpsc::Sender<ProgressEvent>>,
    ) -> Extraction {
        if !self.gateway.is_configured() {
            return extractor::mock_extract(extract_input);
        }
        let first = match extractor::extract_once(&self.gateway, extract_input).await {
            Ok(done) => return done,
            Err(e) => e,
        };
        warn!(error = %first, "extraction failed, retrying once");
        emit(tx, ProgressEvent::phase("extract", PhaseStatus::Retry)).await;
        match extractor::extract_once(&self.gateway, extract_input).await {
            Ok(done) => done,
            Err(second) => {
                warn!(error = %second, "extraction failed twice, synthesizing degraded record");
                failed.push(Phase::AiInsight);
                extractor::degraded_extraction(
                    &second,
                    input.category_hint,
                    classification.as_ref().map(|c| c.category_suggestion),
                    input.text.as_deref(),
                )
            }
        }
    }
}

async fn emit(tx: Option<&mpsc::Sender<ProgressEvent>>, event: ProgressEvent) {
    if let Some(tx) = tx {
        // A dropped receiver must not abort the pipeline.
        let _ = tx.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_and_oversized() {
        let empty = FeedInput::default();
        assert!(matches!(
            IngestPipeline::validate(&empty),
            Err(PipelineError::BadInput(_))
        ));

        let blank_text = FeedInput {
            text: Some("   ".into()),
            ..Default::default()
        };
        assert!(IngestPipeline::validate(&blank_text).is_err());

        let oversized = FeedInput {
            image_bytes: Some(vec![0u8; MAX_IMAGE_BYTES + 1]),
            ..Default::default()
        };
        assert!(matches!(
            IngestPipeline::validate(&oversized),
            Err(PipelineError::PayloadTooLarge { .. })
        ));

        let ok = FeedInput {
            text: Some("walked 5 km".into()),
            ..Default::default()
        };
        assert!(IngestPipeline::validate(&ok).is_ok());
    }
}
