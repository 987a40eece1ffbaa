//! Typed views over the free-form `meta_data` bag.
//!
//! The core treats metadata as opaque; these decoders are for consumers that
//! want the well-known shapes the extractor produces for a category. Unknown
//! keys pass through untouched, absent keys decode to `None`.

use serde::Deserialize;
use serde_json::Value;

/// Sleep-record fields (`duration_hours`, `sleep_time`, `quality`, …).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SleepMeta {
    pub duration_hours: Option<f64>,
    pub sleep_time: Option<String>,
    pub wake_time: Option<String>,
    pub quality: Option<String>,
    pub score: Option<f64>,
    pub deep_sleep_hours: Option<f64>,
    pub rem_hours: Option<f64>,
}

/// Screen-time fields, including the per-app breakdown.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScreenMeta {
    pub total_screen_time: Option<String>,
    pub total_minutes: Option<f64>,
    #[serde(default)]
    pub top_apps: Vec<AppUsage>,
    pub pickups: Option<u32>,
    pub first_pickup: Option<String>,
    pub health_score: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppUsage {
    #[serde(default)]
    pub name: String,
    pub time: Option<String>,
    pub minutes: Option<f64>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Workout fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityMeta {
    pub activity_type: Option<String>,
    pub duration_minutes: Option<f64>,
    pub distance_km: Option<f64>,
    pub calories_burned: Option<f64>,
    pub avg_heart_rate: Option<f64>,
    pub max_heart_rate: Option<f64>,
    pub pace: Option<String>,
}

/// Meal fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DietMeta {
    #[serde(default)]
    pub food_items: Vec<FoodItem>,
    pub total_calories: Option<f64>,
    pub meal_type: Option<String>,
    pub is_healthy: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FoodItem {
    #[serde(default)]
    pub name: String,
    pub portion: Option<String>,
    pub calories: Option<f64>,
}

/// Decode a typed view; malformed bags collapse to the default rather than
/// failing the read path.
pub fn decode<T: for<'de> Deserialize<'de> + Default>(meta: &Value) -> T {
    serde_json::from_value(meta.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_meta_decodes_known_fields() {
        let raw = serde_json::json!({
            "duration_hours": 7.75,
            "sleep_time": "23:30",
            "wake_time": "07:15",
            "quality": "good",
            "analysis": "a fine night",
            "custom_key": {"anything": true},
        });
        let meta: SleepMeta = decode(&raw);
        assert_eq!(meta.duration_hours, Some(7.75));
        assert_eq!(meta.sleep_time.as_deref(), Some("23:30"));
        assert_eq!(meta.quality.as_deref(), Some("good"));
        assert!(meta.score.is_none());
    }

    #[test]
    fn screen_meta_reads_app_list() {
        let raw = serde_json::json!({
            "total_minutes": 332,
            "top_apps": [
                {"name": "WeChat", "minutes": 135, "type": "social"},
                {"name": "Bilibili", "minutes": 45}
            ],
        });
        let meta: ScreenMeta = decode(&raw);
        assert_eq!(meta.total_minutes, Some(332.0));
        assert_eq!(meta.top_apps.len(), 2);
        assert_eq!(meta.top_apps[0].kind.as_deref(), Some("social"));
        assert!(meta.top_apps[1].kind.is_none());
    }

    #[test]
    fn malformed_bags_decode_to_default() {
        let meta: DietMeta = decode(&serde_json::json!("not an object"));
        assert!(meta.food_items.is_empty());
        assert!(meta.total_calories.is_none());

        let meta: ActivityMeta = decode(&serde_json::json!({"duration_minutes": "lots"}));
        assert!(meta.duration_minutes.is_none());
    }
}
