//! Stage-2 multimodal extraction: category, structured metadata, a short
//! insight, the actual event time, and model-driven dimension scores.

use chrono::{Duration, NaiveDateTime};
use serde_json::Value;
use tracing::{info, warn};

use vita_core::time::{resolve_record_time, slot_label, time_slot};
use vita_core::types::{Category, DimensionScores, ImageKind};

use crate::error::AiError;
use crate::gateway::{AiGateway, CallOptions, ChatMessage};
use crate::provider::vision_content;

/// Model scores sparser than this are discarded in favour of the rules
/// engine.
const MIN_SCORED_DIMENSIONS: usize = 4;

/// Extraction inputs. `anchor` is the client-supplied submission time,
/// already normalized to naive Beijing-local.
#[derive(Debug, Clone)]
pub struct ExtractInput<'a> {
    pub image_kind: ImageKind,
    pub image_base64: Option<&'a str>,
    pub text: Option<&'a str>,
    pub content_hint: Option<&'a str>,
    pub anchor: NaiveDateTime,
    pub nickname: Option<&'a str>,
}

/// Extraction output; `dimension_scores` is `None` when the model's block
/// was missing or too sparse.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub category: Category,
    pub sub_categories: Vec<Category>,
    pub meta_data: Value,
    pub reply_text: String,
    pub record_time: Option<NaiveDateTime>,
    pub dimension_scores: Option<DimensionScores>,
}

const DIMENSION_SCORING_PROMPT: &str = r#"
[Dimension scores — required]
Score this record's impact on each life dimension, 0-100. Unrelated
dimensions stay 0; stronger positive impact scores higher.
- body: sleep, diet and exercise effects on physical health
- mood: how positive or negative the emotional state is
- social: quality of human connection
- work: productivity and sense of achievement
- growth: learning and skill development
- meaning: sense of purpose and fulfilment
- digital: digital wellbeing (less screen time = higher)
- leisure: recovery, play, flow
Include in the JSON output:
"dimension_scores": {"body": 0, "mood": 0, "social": 0, "work": 0, "growth": 0, "meaning": 0, "digital": 0, "leisure": 0}"#;

/// Run the extraction with one automatic retry on identical inputs. The
/// orchestrator synthesizes a degraded record if this still fails.
pub async fn extract(gateway: &AiGateway, input: &ExtractInput<'_>) -> Result<Extraction, AiError> {
    if !gateway.is_configured() {
        return Ok(mock_extract(input));
    }
    match extract_once(gateway, input).await {
        Ok(done) => Ok(done),
        Err(first) => {
            warn!(error = %first, "extraction failed, retrying once");
            extract_once(gateway, input).await
        }
    }
}

/// One extraction attempt against the configured upstream.
pub async fn extract_once(
    gateway: &AiGateway,
    input: &ExtractInput<'_>,
) -> Result<Extraction, AiError> {
    let (system_prompt, default_category) = build_prompt(input);
    let system_prompt = match input.nickname {
        Some(nick) => format!(
            "[Important] The user's nickname is \"{nick}\". Address them as \
             \"{nick}\" in reply_text instead of \"user\" or \"you\"; keep the \
             tone warm and natural.\n\n{system_prompt}"
        ),
        None => system_prompt,
    };

    let mut messages = vec![ChatMessage::system(system_prompt)];
    match input.image_base64 {
        Some(image) => {
            let note = match input.text {
                Some(text) => format!("User note: {text}"),
                None => "Analyze the image.".to_string(),
            };
            messages.push(ChatMessage::user_blocks(vision_content(
                &note, image, "high",
            )));
        }
        None => {
            let text = input.text.unwrap_or("(empty)");
            messages.push(ChatMessage::user(format!("User note: {text}")));
        }
    }

    let model = if input.image_base64.is_some() {
        gateway.roster().vision.clone()
    } else {
        gateway.roster().text.clone()
    };
    let opts = CallOptions::task("extract_data")
        .model(model)
        .json()
        .max_tokens(4096)
        .description(format!("extract: {default_category}"));

    let completion = gateway.chat_complete(messages, opts).await?;
    let value = completion
        .json
        .ok_or_else(|| AiError::Parse("extractor returned no JSON".into()))?;
    let Value::Object(mut map) = value else {
        return Err(AiError::Parse("extractor JSON was not an object".into()));
    };

    // Model-driven dimension scores; too-sparse blocks mean the model did
    // not really engage with the rubric.
    let dimension_scores = map.remove("dimension_scores").and_then(|raw| {
        let scores = DimensionScores::from_json(&raw);
        (scores.len() >= MIN_SCORED_DIMENSIONS).then_some(scores)
    });

    // The model's category wins when it is one of the nine.
    let category = map
        .remove("category")
        .and_then(|v| v.as_str().map(str::to_string))
        .and_then(|s| s.parse::<Category>().ok())
        .unwrap_or(default_category);

    let sub_categories: Vec<Category> = map
        .remove("sub_categories")
        .and_then(|v| {
            v.as_array().map(|arr| {
                arr.iter()
                    .filter_map(|s| s.as_str())
                    .filter_map(|s| s.parse::<Category>().ok())
                    .filter(|c| *c != category)
                    .collect()
            })
        })
        .unwrap_or_default();

    let record_time = map
        .get("record_time")
        .or_else(|| map.get("record_date"))
        .and_then(|v| v.as_str())
        .and_then(|s| resolve_record_time(s, input.anchor));
    map.remove("record_time");
    map.remove("record_date");

    let reply_raw = map
        .remove("reply_text")
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();

    // Everything left over is the metadata bag; downstream never interprets
    // unknown keys.
    let mut meta = serde_json::Map::new();
    for (k, v) in map {
        meta.insert(k, v);
    }
    if !sub_categories.is_empty() {
        meta.insert(
            "sub_categories".to_string(),
            serde_json::json!(sub_categories),
        );
    }
    meta.entry("analysis".to_string()).or_insert(Value::Null);
    meta.entry("suggestions".to_string())
        .or_insert_with(|| Value::Array(vec![]));

    let reply_text = meaningful_reply(reply_raw, &meta);

    info!(category = %category, scored = dimension_scores.is_some(), "extraction complete");
    Ok(Extraction {
        category,
        sub_categories,
        meta_data: Value::Object(meta),
        reply_text,
        record_time,
        dimension_scores,
    })
}

/// Reject hollow replies; fall back to the head of the analysis text.
fn meaningful_reply(reply: String, meta: &serde_json::Map<String, Value>) -> String {
    let trimmed = reply.trim();
    if trimmed.chars().count() >= 3 && trimmed != "已记录" && trimmed.to_lowercase() != "recorded"
    {
        return trimmed.to_string();
    }
    if let Some(analysis) = meta.get("analysis").and_then(|v| v.as_str()) {
        if analysis.chars().count() > 5 {
            let head: String = analysis.chars().take(50).collect();
            return format!("{}…", head.trim_end_matches(['，', '。', '、', '；', ' ']));
        }
    }
    "recorded".to_string()
}

fn build_prompt(input: &ExtractInput<'_>) -> (String, Category) {
    use chrono::Timelike;
    let anchor = input.anchor;
    let today = anchor.format("%Y-%m-%d");
    let now_hm = anchor.format("%H:%M");
    let yesterday = (anchor - Duration::days(1)).format("%Y-%m-%d");
    let slot = slot_label(anchor.hour());
    let time_block = format!(
        "Today is {today}, now is {now_hm} Asia/Shanghai ({slot}).\n\
         [Time analysis — important]\n\
         Decide when the described event actually happened and return it as\n\
         record_time — ISO-8601 like {today}T{now_hm}:00, or a relative phrase\n\
         such as \"today\", \"yesterday\", \"3 days ago\", \"last night 23:30\".\n\
         \"yesterday / last night\" means {yesterday}. No clue means now.\n"
    );

    if input.image_base64.is_none() {
        return (text_only_prompt(&time_block), Category::Mood);
    }

    match input.image_kind {
        ImageKind::SleepScreenshot => (sleep_prompt(&time_block, &yesterday.to_string()), Category::Sleep),
        ImageKind::Screenshot => (screen_prompt(&time_block), Category::Screen),
        ImageKind::ActivityScreenshot => (activity_prompt(&time_block), Category::Activity),
        ImageKind::Food => (food_prompt(&time_block, anchor), Category::Diet),
        kind => (
            general_prompt(&time_block, kind),
            match kind {
                ImageKind::ActivityPhoto => Category::Activity,
                _ => Category::Mood,
            },
        ),
    }
}

fn category_menu() -> &'static str {
    "Pick the dominant category (secondary areas go to sub_categories):\n\
     SLEEP, DIET, ACTIVITY, MOOD, SOCIAL, WORK, GROWTH, LEISURE, SCREEN"
}

fn text_only_prompt(time_block: &str) -> String {
    format!(
        r#"You are the life-log assistant of Vita, good at reading a person's state from a few words.
{time_block}
[Important] This input is text only — there is NO image; never mention one.

Your job: classify, extract structured data, analyse what sits behind the
words (emotion, state, likely cause), and give 1-2 concrete suggestions.

{menu}

Answer with JSON (generate reply_text first):
{{
    "category": "…",
    "sub_categories": ["…"],
    "reply_text": "one warm, insightful sentence (15-30 chars); never an empty 'recorded'",
    "record_time": "…",
    "mood": "happy/neutral/sad/tired/anxious/excited/calm/…",
    "note": "short description",
    "analysis": "50-100 chars of real analysis",
    "suggestions": ["concrete suggestion 1", "suggestion 2 if needed"],
    "trend": "up/down/stable",
    "tags": ["…"]
}}{dims}"#,
        time_block = time_block,
        menu = category_menu(),
        dims = DIMENSION_SCORING_PROMPT,
    )
}

fn sleep_prompt(time_block: &str, yesterday: &str) -> String {
    format!(
        r#"You are a sleep-health expert and OCR data extractor.
{time_block}
This is a sleep-tracking screenshot (Health app / Sleep Cycle / AutoSleep …).
Sleep shown as "woke up this morning" belongs to last night: record_time {yesterday}.

Read off the core numbers: sleep_time (bedtime), wake_time, total duration,
and the stage breakdown. 24-hour clock only.

Answer with JSON:
{{
    "record_time": "{yesterday}T23:30:00",
    "sleep_time": "23:30",
    "wake_time": "07:15",
    "duration_hours": 7.75,
    "quality": "good/fair/poor",
    "score": 85,
    "deep_sleep_hours": 2.5,
    "rem_hours": 1.5,
    "analysis": "50-100 chars: judge the sleep (deep-sleep share 20-40% is healthy, bedtime 22:00-23:30 is healthy)",
    "suggestions": ["…"],
    "reply_text": "one warm, concrete comment on the night (15-30 chars)",
    "trend": "up/down/stable",
    "tags": ["…"]
}}{dims}
Unreadable fields are null — never invented."#,
        time_block = time_block,
        yesterday = yesterday,
        dims = DIMENSION_SCORING_PROMPT,
    )
}

fn screen_prompt(time_block: &str) -> String {
    format!(
        r#"You are a digital-wellness expert and OCR data extractor.
{time_block}
This is a phone screen-time screenshot.

Extract: total screen time, per-app usage (name + minutes for the top 5-10
apps — the most important data), pickup count, first pickup. Then judge
whether the pattern is healthy (>4h/day is heavy) and which app types
dominate.

Answer with JSON:
{{
    "total_screen_time": "5h32m",
    "total_minutes": 332,
    "top_apps": [
        {{"name": "WeChat", "time": "2h15m", "minutes": 135, "type": "social"}},
        {{"name": "Bilibili", "time": "45m", "minutes": 45, "type": "entertainment"}}
    ],
    "app_breakdown": {{"social": 165, "entertainment": 105, "productivity": 45, "other": 17}},
    "pickups": 45,
    "first_pickup": "07:23",
    "analysis": "80-120 chars on whether usage is excessive and what drives it",
    "suggestions": ["…"],
    "record_time": "date the screenshot covers, ISO format",
    "trend": "up/down/stable",
    "reply_text": "one pointed observation (15-30 chars)",
    "health_score": 60,
    "tags": ["…"]
}}{dims}
Invisible fields are null."#,
        time_block = time_block,
        dims = DIMENSION_SCORING_PROMPT,
    )
}

fn activity_prompt(time_block: &str) -> String {
    format!(
        r#"You are a sports-science expert reading a workout-app screenshot.
{time_block}
Extract type, duration, distance, calories, pace and heart rate; judge the
intensity and whether the aerobic zone was reached.

Answer with JSON:
{{
    "activity_type": "running/cycling/swimming/gym/…",
    "duration_minutes": 45,
    "distance_km": 5.2,
    "calories_burned": 420,
    "pace": "5'30''/km",
    "avg_heart_rate": 145,
    "max_heart_rate": 168,
    "record_time": "when the workout actually happened, ISO format",
    "analysis": "50-100 chars on intensity and training effect",
    "suggestions": ["…"],
    "trend": "up/down/stable",
    "reply_text": "one energising sentence about the workout (15-30 chars)",
    "tags": ["…"]
}}{dims}"#,
        time_block = time_block,
        dims = DIMENSION_SCORING_PROMPT,
    )
}

fn food_prompt(time_block: &str, anchor: NaiveDateTime) -> String {
    use chrono::Timelike;
    let meal_hint = match time_slot(anchor.hour()) {
        "morning" => "breakfast",
        "forenoon" => "breakfast or a snack",
        "noon" => "lunch",
        "afternoon" => "afternoon tea or a snack",
        "dusk" | "evening" => "dinner",
        _ => "a late-night bite",
    };
    format!(
        r#"You are a nutritionist looking at a food photo.
{time_block}Given the hour this is probably {meal_hint}.

Identify the dishes, estimate portions and calories, judge the nutritional
balance, and give practical advice for the rest of the day.

Answer with JSON:
{{
    "food_items": [
        {{"name": "steak", "portion": "200g", "calories": 500}},
        {{"name": "salad", "portion": "100g", "calories": 50}}
    ],
    "total_calories": 550,
    "meal_type": "breakfast/lunch/dinner/snack",
    "is_healthy": true,
    "nutrition_balance": {{"protein": "high/medium/low", "carbs": "…", "fat": "…", "fiber": "…"}},
    "record_time": "when this meal happened, ISO format or a relative phrase",
    "analysis": "50-100 chars of nutritional judgement",
    "suggestions": ["…"],
    "reply_text": "one tasteful comment on the meal (15-30 chars)",
    "tags": ["…"]
}}{dims}"#,
        time_block = time_block,
        meal_hint = meal_hint,
        dims = DIMENSION_SCORING_PROMPT,
    )
}

fn general_prompt(time_block: &str, kind: ImageKind) -> String {
    let kind_label = match kind {
        ImageKind::ActivityPhoto => "workout",
        ImageKind::Scenery => "scenery",
        ImageKind::Selfie => "selfie",
        _ => "life",
    };
    format!(
        r#"You are the life-log assistant of Vita, good at reading a person's state from a photo.
{time_block}
Look at this {kind_label} photo: classify it, describe it, infer the mood
behind it, and reply with one warm sentence.

{menu}

Answer with JSON:
{{
    "category": "…",
    "sub_categories": ["…"],
    "description": "what the photo shows",
    "record_time": "when it was taken, ISO format or a relative phrase",
    "mood": "happy/neutral/tired/excited/calm/…",
    "analysis": "30-50 chars inferring the user's state",
    "suggestions": ["only if genuinely useful"],
    "reply_text": "one warm, insightful sentence (15-30 chars)",
    "tags": ["…"]
}}{dims}"#,
        time_block = time_block,
        kind_label = kind_label,
        menu = category_menu(),
        dims = DIMENSION_SCORING_PROMPT,
    )
}

/// Deterministic extraction for no-API-key mode. Dimension scores stay
/// `None` so the rules engine fills them in.
pub fn mock_extract(input: &ExtractInput<'_>) -> Extraction {
    use chrono::Timelike;
    let note = input
        .text
        .or(input.content_hint)
        .unwrap_or("life record")
        .to_string();

    let (category, reply) = match input.image_kind {
        ImageKind::Screenshot => (
            Category::Screen,
            "Screenshot stored. Configure an AI key to extract app usage automatically.",
        ),
        ImageKind::Food => (
            Category::Diet,
            "Meal stored! Configure an AI key for calorie and nutrition analysis.",
        ),
        ImageKind::ActivityScreenshot | ImageKind::ActivityPhoto => {
            (Category::Activity, "Workout stored!")
        }
        ImageKind::SleepScreenshot => (
            Category::Sleep,
            "Sleep data stored! Configure an AI key for automatic analysis.",
        ),
        _ => (Category::Mood, ""),
    };

    let reply_text = if reply.is_empty() {
        let slot = time_slot(input.anchor.hour());
        match input.nickname {
            Some(nick) => format!(
                "Good {slot}, {nick}! Your record is saved; AI analysis unlocks once a key is configured."
            ),
            None => format!(
                "Good {slot}! Your record is saved; AI analysis unlocks once a key is configured."
            ),
        }
    } else {
        reply.to_string()
    };

    Extraction {
        category,
        sub_categories: vec![],
        meta_data: serde_json::json!({
            "note": note,
            "analysis": null,
            "suggestions": [],
        }),
        reply_text,
        record_time: None,
        dimension_scores: None,
    }
}

/// Degraded result the orchestrator commits when both extraction attempts
/// failed: the record still lands, with the error preserved in metadata.
pub fn degraded_extraction(
    error: &AiError,
    category_hint: Option<Category>,
    classifier_suggestion: Option<Category>,
    text: Option<&str>,
) -> Extraction {
    Extraction {
        category: category_hint
            .or(classifier_suggestion)
            .unwrap_or(Category::Mood),
        sub_categories: vec![],
        meta_data: serde_json::json!({
            "_ai_error": error.to_string(),
            "analysis": null,
            "suggestions": [],
        }),
        reply_text: text.unwrap_or("recorded").to_string(),
        record_time: None,
        dimension_scores: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn anchor() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 5)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn input(kind: ImageKind, image: Option<&'static str>) -> ExtractInput<'static> {
        ExtractInput {
            image_kind: kind,
            image_base64: image,
            text: Some("just walked 5 km"),
            content_hint: None,
            anchor: anchor(),
            nickname: None,
        }
    }

    #[test]
    fn prompt_selection_by_kind() {
        let (text_prompt, cat) = build_prompt(&input(ImageKind::Other, None));
        assert!(text_prompt.contains("NO image"));
        assert_eq!(cat, Category::Mood);

        let (sleep, cat) = build_prompt(&input(ImageKind::SleepScreenshot, Some("x")));
        assert!(sleep.contains("sleep-tracking screenshot"));
        assert_eq!(cat, Category::Sleep);

        let (screen, cat) = build_prompt(&input(ImageKind::Screenshot, Some("x")));
        assert!(screen.contains("screen-time screenshot"));
        assert_eq!(cat, Category::Screen);

        let (food, cat) = build_prompt(&input(ImageKind::Food, Some("x")));
        assert!(food.contains("probably lunch") || food.contains("breakfast"));
        assert_eq!(cat, Category::Diet);
    }

    #[test]
    fn prompts_carry_the_time_anchor() {
        let (prompt, _) = build_prompt(&input(ImageKind::Other, None));
        assert!(prompt.contains("Today is 2026-02-05"));
        assert!(prompt.contains("now is 10:00"));
        assert!(prompt.contains("dimension_scores"));
    }

    #[test]
    fn hollow_reply_falls_back_to_analysis() {
        let mut meta = serde_json::Map::new();
        meta.insert(
            "analysis".into(),
            serde_json::json!("A long enough analysis of the day."),
        );
        let reply = meaningful_reply("已记录".into(), &meta);
        assert!(reply.starts_with("A long enough analysis"));
        assert!(reply.ends_with('…'));

        let good = meaningful_reply("great walk today".into(), &meta);
        assert_eq!(good, "great walk today");

        let empty_meta = serde_json::Map::new();
        assert_eq!(meaningful_reply("".into(), &empty_meta), "recorded");
    }

    #[test]
    fn mock_extract_matches_kind() {
        let e = mock_extract(&input(ImageKind::Food, Some("x")));
        assert_eq!(e.category, Category::Diet);
        assert!(e.dimension_scores.is_none());
        assert_eq!(e.meta_data["note"], "just walked 5 km");

        let text = mock_extract(&input(ImageKind::Other, None));
        assert_eq!(text.category, Category::Mood);
        assert!(text.reply_text.contains("forenoon"));
    }

    #[test]
    fn degraded_uses_category_priority() {
        let err = AiError::Parse("boom".into());
        let d = degraded_extraction(&err, Some(Category::Diet), Some(Category::Sleep), None);
        assert_eq!(d.category, Category::Diet);
        let d = degraded_extraction(&err, None, Some(Category::Sleep), Some("raw text"));
        assert_eq!(d.category, Category::Sleep);
        assert_eq!(d.reply_text, "raw text");
        let d = degraded_extraction(&err, None, None, None);
        assert_eq!(d.category, Category::Mood);
        assert_eq!(d.meta_data["_ai_error"], "Response parse failure: boom");
    }
}
