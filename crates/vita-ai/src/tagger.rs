//! Stage-3 semantic tagging: 3-6 hierarchical `#category/leaf` tags, always
//! carrying exactly one `#time/<slot>` tag derived from the ingestion hour.

use chrono::{NaiveDateTime, Timelike};
use serde_json::Value;
use tracing::warn;

use vita_core::time::time_slot;
use vita_core::types::{clean_tags, Category};

use crate::error::AiError;
use crate::gateway::{AiGateway, CallOptions, ChatMessage};

/// Inputs for one tagging pass.
#[derive(Debug, Clone)]
pub struct TagInput<'a> {
    pub text: Option<&'a str>,
    pub category: Category,
    pub meta_data: &'a Value,
    pub anchor: NaiveDateTime,
    /// Top trending tags from the recent window, primes the vocabulary so
    /// the model reuses established leaves instead of inventing synonyms.
    pub trending: &'a [(String, u64)],
    pub record_id: Option<&'a str>,
}

/// Generate tags with one automatic retry, then the deterministic fallback.
pub async fn generate_tags(gateway: &AiGateway, input: &TagInput<'_>) -> Vec<String> {
    if !gateway.is_configured() {
        return rule_based_tags(input);
    }
    match ai_tags(gateway, input).await {
        Ok(tags) if !tags.is_empty() => tags,
        Ok(_) => {
            warn!("tagger returned no usable tags, using rules");
            rule_based_tags(input)
        }
        Err(first) => {
            warn!(error = %first, "tagger failed, retrying once");
            match ai_tags(gateway, input).await {
                Ok(tags) if !tags.is_empty() => tags,
                Ok(_) => rule_based_tags(input),
                Err(second) => {
                    warn!(error = %second, "tagger retry failed, using rules");
                    rule_based_tags(input)
                }
            }
        }
    }
}

async fn ai_tags(gateway: &AiGateway, input: &TagInput<'_>) -> Result<Vec<String>, AiError> {
    let slot = time_slot(input.anchor.hour());
    let trending_line = if input.trending.is_empty() {
        String::new()
    } else {
        let names: Vec<&str> = input
            .trending
            .iter()
            .take(10)
            .map(|(t, _)| t.as_str())
            .collect();
        format!(
            "\nPrefer reusing the user's established tags where they fit: {}",
            names.join(", ")
        )
    };

    let system = format!(
        r##"You are a tag generator for a personal life log.

Tag format: #category/leaf — e.g. #diet/coffee, #mood/calm, #work/meeting.

Rules:
1. Produce 3-6 tags, most relevant first.
2. Tags must be specific and informative.
3. Include exactly one time tag: #time/{slot}.
4. New categories and leaves are allowed when nothing established fits.{trending_line}

Answer with a JSON object: {{"tags": ["#time/{slot}", "#…/…", …]}}"##
    );

    let user = format!(
        "Time slot: {slot}\nCategory: {category}\nContent: {content}\nMetadata: {meta}\n\nGenerate the tags.",
        slot = slot,
        category = input.category,
        content = input.text.unwrap_or("(none)"),
        meta = compact_meta(input.meta_data),
    );

    let mut opts = CallOptions::task("generate_tags")
        .json()
        .max_tokens(400)
        .description(format!("tags for {}", input.category));
    if let Some(id) = input.record_id {
        opts = opts.record(id);
    }

    let completion = gateway
        .chat_complete(
            vec![ChatMessage::system(system), ChatMessage::user(user)],
            opts,
        )
        .await?;
    let value = completion
        .json
        .ok_or_else(|| AiError::Parse("tagger returned no JSON".into()))?;

    // Accept {"tags": [...]} or a bare array.
    let raw: Vec<String> = match value {
        Value::Array(arr) => arr
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Value::Object(map) => map
            .get("tags")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
        _ => vec![],
    };

    Ok(normalize_tags(raw, input))
}

/// Clean, dedupe and guarantee the single mandatory time tag.
fn normalize_tags(raw: Vec<String>, input: &TagInput<'_>) -> Vec<String> {
    let slot_tag = format!("#time/{}", time_slot(input.anchor.hour()));
    let mut tags: Vec<String> = clean_tags(raw)
        .into_iter()
        .filter(|t| !t.starts_with("#time/") || *t == slot_tag)
        .collect();
    let time_count = tags.iter().filter(|t| t.starts_with("#time/")).count();
    if time_count == 0 {
        tags.insert(0, slot_tag);
        tags.truncate(vita_core::types::MAX_TAGS);
    }
    tags
}

/// Deterministic fallback: the time tag, the category tag, then any
/// keyword-matched leaves from the raw text.
pub fn rule_based_tags(input: &TagInput<'_>) -> Vec<String> {
    let mut tags = vec![format!("#time/{}", time_slot(input.anchor.hour()))];

    let category_tag = match input.category {
        Category::Sleep => "#body/sleep",
        Category::Diet => "#diet/meal",
        Category::Activity => "#body/exercise",
        Category::Mood => "#mood/note",
        Category::Social => "#social/time",
        Category::Work => "#work/task",
        Category::Growth => "#growth/learning",
        Category::Leisure => "#leisure/fun",
        Category::Screen => "#digital/screen",
    };
    tags.push(category_tag.to_string());

    if let Some(text) = input.text {
        const KEYWORDS: &[(&str, &str)] = &[
            ("coffee", "#diet/coffee"),
            ("咖啡", "#diet/coffee"),
            ("run", "#body/running"),
            ("跑步", "#body/running"),
            ("gym", "#body/gym"),
            ("健身", "#body/gym"),
            ("book", "#leisure/reading"),
            ("书", "#leisure/reading"),
            ("movie", "#leisure/movie"),
            ("电影", "#leisure/movie"),
            ("game", "#leisure/gaming"),
            ("游戏", "#leisure/gaming"),
            ("happy", "#mood/happy"),
            ("开心", "#mood/happy"),
            ("tired", "#body/tired"),
            ("累", "#body/tired"),
            ("meeting", "#work/meeting"),
            ("会议", "#work/meeting"),
            ("study", "#growth/learning"),
            ("学习", "#growth/learning"),
        ];
        let lower = text.to_lowercase();
        for (kw, tag) in KEYWORDS {
            if lower.contains(kw) && !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }
    }

    tags.truncate(6);
    tags
}

fn compact_meta(meta: &Value) -> String {
    let s = meta.to_string();
    if s.chars().count() > 400 {
        let head: String = s.chars().take(400).collect();
        format!("{head}…")
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn anchor(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 5)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn input(text: &'static str, hour: u32) -> TagInput<'static> {
        TagInput {
            text: Some(text),
            category: Category::Activity,
            meta_data: &Value::Null,
            anchor: anchor(hour),
            trending: &[],
            record_id: None,
        }
    }

    #[test]
    fn rules_always_lead_with_time_tag() {
        let tags = rule_based_tags(&input("morning run with coffee after", 7));
        assert_eq!(tags[0], "#time/morning");
        assert!(tags.contains(&"#body/exercise".to_string()));
        assert!(tags.contains(&"#diet/coffee".to_string()));
        assert!(tags.contains(&"#body/running".to_string()));
        assert!(tags.len() <= 6);
    }

    #[test]
    fn normalize_inserts_missing_time_tag() {
        let tags = normalize_tags(
            vec!["#diet/coffee".into(), "#mood/calm".into()],
            &input("x", 13),
        );
        assert_eq!(tags[0], "#time/noon");
        assert_eq!(tags.len(), 3);
    }

    #[test]
    fn normalize_drops_wrong_time_tags() {
        let tags = normalize_tags(
            vec![
                "#time/morning".into(),
                "#time/noon".into(),
                "#diet/lunch".into(),
            ],
            &input("x", 13),
        );
        // Only the correct slot's tag survives, exactly once.
        assert_eq!(
            tags.iter().filter(|t| t.starts_with("#time/")).count(),
            1
        );
        assert!(tags.contains(&"#time/noon".to_string()));
    }

    #[test]
    fn normalize_rejects_malformed_tags() {
        let tags = normalize_tags(
            vec![
                "plain".into(),
                "#nocategory".into(),
                "#ok/tag".into(),
            ],
            &input("x", 20),
        );
        assert_eq!(tags, vec!["#time/evening", "#ok/tag"]);
    }

    #[test]
    fn chinese_keywords_match() {
        let tags = rule_based_tags(&TagInput {
            text: Some("下班去健身了，很开心"),
            category: Category::Activity,
            meta_data: &Value::Null,
            anchor: anchor(19),
            trending: &[],
            record_id: None,
        });
        assert!(tags.contains(&"#body/gym".to_string()));
        assert!(tags.contains(&"#mood/happy".to_string()));
    }
}
