//! Re-run selected enrichment phases against an existing record.
//!
//! Each requested phase runs on the stored text/category/metadata with
//! `submitted_at` as the time anchor; successes overwrite, failures stay in
//! the response's `failed_phases`. The whole update commits in one
//! transaction.

use chrono::Duration;
use serde::Serialize;
use tracing::{info, warn};

use vita_ai::dimensions;
use vita_ai::extractor::{self, ExtractInput};
use vita_ai::tagger::{self, TagInput};
use vita_core::types::{DimensionScores, ImageKind, Phase};

use crate::error::{PipelineError, Result};
use crate::ingest::IngestPipeline;

#[derive(Debug, Clone, Serialize)]
pub struct RegenerateOutcome {
    pub id: String,
    pub regenerated: Vec<Phase>,
    pub failed_phases: Vec<Phase>,
    pub tags: Vec<String>,
    pub dimension_scores: DimensionScores,
    pub ai_insight: Option<String>,
}

impl IngestPipeline {
    /// Regenerate a subset of `{tags, dimension_scores, ai_insight}`.
    pub async fn regenerate(&self, record_id: &str, phases: &[Phase]) -> Result<RegenerateOutcome> {
        let record = self
            .records()
            .get(record_id)?
            .ok_or_else(|| PipelineError::NotFound(format!("record {record_id}")))?;

        let wanted = |p: Phase| phases.contains(&p);
        if !phases
            .iter()
            .all(|p| matches!(p, Phase::Tags | Phase::DimensionScores | Phase::AiInsight))
        {
            return Err(PipelineError::BadInput(
                "regenerable phases are tags, dimension_scores, ai_insight".into(),
            ));
        }
        if phases.is_empty() {
            return Err(PipelineError::BadInput("no phases requested".into()));
        }

        let anchor = record.submitted_at;
        let nickname = self.settings_nickname();
        let mut regenerated: Vec<Phase> = Vec::new();
        let mut still_failed: Vec<Phase> = record
            .failed_phases
            .iter()
            .copied()
            .filter(|p| !wanted(*p))
            .collect();

        let mut new_tags: Option<Vec<String>> = None;
        let mut new_scores: Option<DimensionScores> = None;
        let mut new_insight: Option<String> = None;
        let mut new_meta: Option<serde_json::Value> = None;

        // ai_insight first: a fresh extraction opportunistically refreshes
        // metadata and (when previously absent) the dimension scores.
        if wanted(Phase::AiInsight) {
            let extract_input = ExtractInput {
                image_kind: record
                    .image_type
                    .as_deref()
                    .and_then(|s| s.parse::<ImageKind>().ok())
                    .unwrap_or(ImageKind::Other),
                image_base64: None,
                text: record.raw_content.as_deref(),
                content_hint: None,
                anchor,
                nickname: nickname.as_deref(),
            };
            match extractor::extract(self.gateway(), &extract_input).await {
                Ok(extraction) => {
                    new_insight = Some(extraction.reply_text);
                    new_meta = Some(extraction.meta_data);
                    if record.dimension_scores.is_empty() {
                        if let Some(scores) = extraction.dimension_scores {
                            new_scores = Some(scores);
                        }
                    }
                    regenerated.push(Phase::AiInsight);
                }
                Err(e) => {
                    warn!(error = %e, "insight regeneration failed");
                    still_failed.push(Phase::AiInsight);
                }
            }
        }

        let meta_for_rules = new_meta.as_ref().unwrap_or(&record.meta_data);

        if wanted(Phase::Tags) {
            let trending = self
                .records()
                .trending_tags(anchor - Duration::days(7), 10)
                .unwrap_or_default();
            let tag_input = TagInput {
                text: record.raw_content.as_deref(),
                category: record.category,
                meta_data: meta_for_rules,
                anchor,
                trending: &trending,
                record_id: Some(&record.id),
            };
            let tags = tagger::generate_tags(self.gateway(), &tag_input).await;
            if tags.is_empty() {
                still_failed.push(Phase::Tags);
            } else {
                new_tags = Some(tags);
                regenerated.push(Phase::Tags);
            }
        }

        if wanted(Phase::DimensionScores) && new_scores.is_none() {
            let scores = dimensions::score_record(
                record.category,
                meta_for_rules,
                &record.sub_categories(),
            );
            if scores.is_empty() {
                still_failed.push(Phase::DimensionScores);
            } else {
                new_scores = Some(scores);
                regenerated.push(Phase::DimensionScores);
            }
        } else if wanted(Phase::DimensionScores) {
            regenerated.push(Phase::DimensionScores);
        }

        self.records().apply_regeneration(
            record_id,
            new_tags.as_deref(),
            new_scores.as_ref(),
            new_insight.as_deref(),
            new_meta.as_ref(),
            &still_failed,
        )?;

        let updated = self
            .records()
            .get(record_id)?
            .ok_or_else(|| PipelineError::Internal("record vanished mid-regeneration".into()))?;

        // Refresh the vector entry so chat retrieval sees the new fields.
        self.indexer().index(&updated).await;

        info!(
            id = record_id,
            regenerated = regenerated.len(),
            failed = still_failed.len(),
            "regeneration finished"
        );
        Ok(RegenerateOutcome {
            id: updated.id.clone(),
            regenerated,
            failed_phases: updated.failed_phases.clone(),
            tags: updated.tags.clone(),
            dimension_scores: updated.dimension_scores.clone(),
            ai_insight: updated.ai_insight.clone(),
        })
    }
}
