//! Canonical document text for a record — the string that gets embedded and
//! later quoted back into chat context.

use vita_store::types::LifeRecord;

const WEEKDAYS_ZH: [&str; 7] = ["周一", "周二", "周三", "周四", "周五", "周六", "周日"];

/// Render a record into its indexable document: time line, category label,
/// raw content, insight, tags, and the non-zero dimension scores.
pub fn build_document_text(record: &LifeRecord) -> String {
    use chrono::Datelike;

    let mut parts = Vec::new();

    let when = record.effective_time();
    let weekday = WEEKDAYS_ZH[when.weekday().num_days_from_monday() as usize];
    parts.push(format!(
        "时间: {} {}",
        when.format("%Y年%m月%d日 %H:%M"),
        weekday
    ));

    parts.push(format!("类别: {}", record.category.label_zh()));

    if let Some(content) = &record.raw_content {
        if !content.is_empty() {
            parts.push(format!("内容: {content}"));
        }
    }

    if let Some(insight) = &record.ai_insight {
        if !insight.is_empty() {
            parts.push(format!("洞察: {insight}"));
        }
    }

    if !record.tags.is_empty() {
        parts.push(format!("标签: {}", record.tags.join(", ")));
    }

    let scores: Vec<String> = record
        .dimension_scores
        .iter()
        .filter(|(_, v)| *v > 0)
        .map(|(dim, v)| format!("{}: {v}", dim.label_zh()))
        .collect();
    if !scores.is_empty() {
        parts.push(format!("维度得分: {}", scores.join(", ")));
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use vita_core::types::{Category, Dimension, DimensionScores, InputType};

    fn record() -> LifeRecord {
        let mut scores = DimensionScores::new();
        scores.set(Dimension::Body, 80);
        scores.set(Dimension::Digital, 0);
        LifeRecord {
            id: "r1".into(),
            submitted_at: NaiveDate::from_ymd_opt(2026, 2, 5)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            record_time: None,
            input_type: InputType::Text,
            category: Category::Activity,
            raw_content: Some("walked 5 km".into()),
            meta_data: serde_json::json!({}),
            ai_insight: Some("good steady pace".into()),
            tags: vec!["#time/forenoon".into(), "#activity/walk".into()],
            dimension_scores: scores,
            failed_phases: vec![],
            image_type: None,
            image_path: None,
            thumbnail_path: None,
            image_saved: false,
            is_deleted: false,
            is_public: false,
            is_bookmarked: false,
        }
    }

    #[test]
    fn document_contains_all_sections() {
        let doc = build_document_text(&record());
        assert!(doc.contains("时间: 2026年02月05日 10:00 周四"));
        assert!(doc.contains("类别: 运动"));
        assert!(doc.contains("内容: walked 5 km"));
        assert!(doc.contains("洞察: good steady pace"));
        assert!(doc.contains("标签: #time/forenoon, #activity/walk"));
        assert!(doc.contains("身体: 80"));
        // Zero scores are omitted.
        assert!(!doc.contains("数字健康"));
    }

    #[test]
    fn sparse_record_renders_minimal_document() {
        let mut r = record();
        r.raw_content = None;
        r.ai_insight = None;
        r.tags = vec![];
        r.dimension_scores = DimensionScores::new();
        let doc = build_document_text(&r);
        assert!(doc.contains("时间:"));
        assert!(doc.contains("类别: 运动"));
        assert!(!doc.contains("内容:"));
    }
}
