//! Stage-1 vision call: label the image kind and decide whether the original
//! is worth keeping.

use serde::Serialize;
use tracing::warn;

use vita_core::types::{Category, ImageKind};

use crate::error::AiError;
use crate::gateway::{AiGateway, CallOptions};

/// Classifier verdict. On any upstream failure callers substitute
/// [`Classification::fallback`] so the pipeline can proceed.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub image_type: ImageKind,
    pub should_save_image: bool,
    pub save_reason: Option<String>,
    pub content_hint: String,
    pub confidence: f64,
    pub category_suggestion: Category,
}

impl Classification {
    /// Degraded verdict: unknown kind, keep the original (storage is cheaper
    /// than losing a memory).
    pub fn fallback(text_hint: Option<&str>) -> Self {
        Self {
            image_type: ImageKind::Other,
            should_save_image: true,
            save_reason: None,
            content_hint: text_hint.unwrap_or("image").to_string(),
            confidence: 0.0,
            category_suggestion: Category::Mood,
        }
    }

    /// Keyword guess used in no-API-key mode.
    pub fn rule_based(text_hint: Option<&str>) -> Self {
        let hint = text_hint.unwrap_or("").to_lowercase();
        let (image_type, category) = if contains_any(&hint, &["sleep", "睡眠", "睡觉", "起床", "wake"]) {
            (ImageKind::SleepScreenshot, Category::Sleep)
        } else if contains_any(&hint, &["screen", "屏幕", "使用时间", "app"]) {
            (ImageKind::Screenshot, Category::Screen)
        } else if contains_any(&hint, &["food", "吃", "喝", "美食", "餐", "咖啡"]) {
            (ImageKind::Food, Category::Diet)
        } else if contains_any(&hint, &["run", "运动", "跑步", "健身"]) {
            (ImageKind::ActivityScreenshot, Category::Activity)
        } else {
            (ImageKind::Other, Category::Mood)
        };
        Self {
            image_type,
            should_save_image: image_type.keep_original(),
            save_reason: None,
            content_hint: text_hint.unwrap_or("image").to_string(),
            confidence: 0.5,
            category_suggestion: category,
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

const CLASSIFY_PROMPT: &str = r#"You are an image triage expert for a personal life log. Inspect the image and decide:

1. image_type — one of:
   - screenshot: a generic phone screenshot (screen-time stats, app usage, …)
   - sleep_screenshot: a sleep-tracking screenshot (Health app, Sleep Cycle, …)
   - food: a real photo of food, drink or a restaurant table
   - activity_screenshot: a workout-app data screenshot
   - activity_photo: a real photo taken during exercise or outdoors
   - scenery: a landscape photo
   - selfie: a selfie
   - other: anything else

2. should_save_image — screenshots carry no value once their numbers are
   extracted (false); captured moments are memories (true).

3. content_hint — one short sentence describing the image.

4. category_suggestion — SLEEP, DIET, SCREEN, ACTIVITY or MOOD.

Answer with JSON only:
{
  "image_type": "screenshot|sleep_screenshot|food|activity_screenshot|activity_photo|scenery|selfie|other",
  "should_save_image": true,
  "save_reason": "why the original is worth keeping (or null)",
  "content_hint": "…",
  "confidence": 0.0,
  "category_suggestion": "SLEEP|DIET|SCREEN|ACTIVITY|MOOD"
}"#;

/// Run the stage-1 classification through the gateway (flash vision model,
/// JSON mode, low detail is enough for triage).
pub async fn classify(
    gateway: &AiGateway,
    image_base64: &str,
    text_hint: Option<&str>,
) -> Result<Classification, AiError> {
    if !gateway.is_configured() {
        return Ok(Classification::rule_based(text_hint));
    }

    let prompt = match text_hint {
        Some(hint) => format!("{CLASSIFY_PROMPT}\n\nUser note: {hint}"),
        None => CLASSIFY_PROMPT.to_string(),
    };
    let opts = CallOptions::task("classify_image")
        .json()
        .max_tokens(1600);
    let completion = gateway.vision_complete(&prompt, image_base64, opts).await?;
    let value = completion
        .json
        .ok_or_else(|| AiError::Parse("classifier returned no JSON".into()))?;

    let image_type = value
        .get("image_type")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<ImageKind>().ok())
        .unwrap_or(ImageKind::Other);
    let category_suggestion = value
        .get("category_suggestion")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<Category>().ok())
        .unwrap_or(Category::Mood);
    let should_save_image = value
        .get("should_save_image")
        .and_then(|v| v.as_bool())
        .unwrap_or_else(|| image_type.keep_original());

    if should_save_image != image_type.keep_original() {
        warn!(
            kind = %image_type,
            should_save_image,
            "classifier save verdict disagrees with kind policy"
        );
    }

    Ok(Classification {
        image_type,
        should_save_image,
        save_reason: value
            .get("save_reason")
            .and_then(|v| v.as_str())
            .map(String::from),
        content_hint: value
            .get("content_hint")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        confidence: value
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.5),
        category_suggestion,
    })
}
