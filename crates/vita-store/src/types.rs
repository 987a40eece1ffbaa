use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use vita_core::types::{Category, DimensionScores, InputType, Phase};

/// The central entity, one row per user input.
#[derive(Debug, Clone)]
pub struct LifeRecord {
    pub id: String,
    pub submitted_at: NaiveDateTime,
    /// AI-extracted actual-event time; may precede `submitted_at` by days.
    pub record_time: Option<NaiveDateTime>,
    pub input_type: InputType,
    pub category: Category,
    pub raw_content: Option<String>,
    /// Free-form structured bag. The core never interprets unknown keys.
    pub meta_data: serde_json::Value,
    pub ai_insight: Option<String>,
    pub tags: Vec<String>,
    pub dimension_scores: DimensionScores,
    pub failed_phases: Vec<Phase>,
    pub image_type: Option<String>,
    pub image_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub image_saved: bool,
    pub is_deleted: bool,
    pub is_public: bool,
    pub is_bookmarked: bool,
}

impl LifeRecord {
    /// Event time for display and sorting: `record_time` when the extractor
    /// produced one, otherwise the submission time.
    pub fn effective_time(&self) -> NaiveDateTime {
        self.record_time.unwrap_or(self.submitted_at)
    }

    /// Secondary categories stashed by the extractor in `meta_data`.
    pub fn sub_categories(&self) -> Vec<Category> {
        self.meta_data
            .get("sub_categories")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(|s| s.parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Insert payload for a freshly ingested record.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub id: String,
    pub submitted_at: NaiveDateTime,
    pub record_time: Option<NaiveDateTime>,
    pub input_type: InputType,
    pub category: Category,
    pub raw_content: Option<String>,
    pub meta_data: serde_json::Value,
    pub ai_insight: Option<String>,
    pub tags: Vec<String>,
    pub dimension_scores: DimensionScores,
    pub failed_phases: Vec<Phase>,
    pub image_type: Option<String>,
    pub image_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub image_saved: bool,
}

/// One appended ledger row per upstream call.
#[derive(Debug, Clone, Serialize)]
pub struct TokenUsageRow {
    pub id: i64,
    pub created_at: String,
    pub model: String,
    pub model_bucket: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub estimated_cost: f64,
    pub task_tag: String,
    pub task_description: Option<String>,
    pub related_record_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConversation {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub created_at: String,
}

/// Paging/filter arguments for history listings.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub limit: usize,
    pub offset: usize,
    pub category: Option<Category>,
}
