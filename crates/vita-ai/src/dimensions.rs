//! Rules fallback for the eight-dimension wellbeing score.
//!
//! The extractor's model-driven scores are preferred; this engine only runs
//! when they are absent or too sparse. Category gives the primary dimension
//! a base score, sub-categories lift their dimensions, secondary bonuses and
//! metadata micro-adjustments refine, and the meaning dimension is derived
//! from the rest.

use vita_core::types::{Category, Dimension, DimensionScores};

const PRIMARY_BASE: f64 = 65.0;
const SUB_CATEGORY_FLOOR: f64 = 30.0;

fn primary_dimension(category: Category) -> Dimension {
    match category {
        Category::Sleep | Category::Diet | Category::Activity => Dimension::Body,
        Category::Mood => Dimension::Mood,
        Category::Social => Dimension::Social,
        Category::Work => Dimension::Work,
        Category::Growth => Dimension::Growth,
        Category::Screen => Dimension::Digital,
        Category::Leisure => Dimension::Leisure,
    }
}

/// Secondary dimensions touched by a category, with their bonus.
fn secondary_bonuses(category: Category) -> &'static [(Dimension, f64)] {
    match category {
        Category::Sleep => &[(Dimension::Mood, 15.0)],
        Category::Activity => &[(Dimension::Mood, 15.0), (Dimension::Leisure, 10.0)],
        Category::Social => &[(Dimension::Mood, 15.0), (Dimension::Meaning, 10.0)],
        Category::Growth => &[(Dimension::Meaning, 20.0), (Dimension::Work, 10.0)],
        Category::Leisure => &[(Dimension::Mood, 10.0), (Dimension::Meaning, 5.0)],
        Category::Work => &[(Dimension::Growth, 10.0)],
        _ => &[],
    }
}

/// Deterministic eight-dimension score for a single record.
pub fn score_record(
    category: Category,
    meta_data: &serde_json::Value,
    sub_categories: &[Category],
) -> DimensionScores {
    let mut scores: [f64; 8] = [0.0; 8];

    let idx = |d: Dimension| d as usize;

    // 1. Primary dimension base score.
    scores[idx(primary_dimension(category))] = PRIMARY_BASE;

    // 1.5 Sub-categories lift their dimension to a floor and apply half of
    // their own secondary bonuses.
    for sub in sub_categories {
        let d = idx(primary_dimension(*sub));
        if scores[d] < SUB_CATEGORY_FLOOR {
            scores[d] = SUB_CATEGORY_FLOOR;
        }
        for (dim, bonus) in secondary_bonuses(*sub) {
            scores[idx(*dim)] += bonus * 0.5;
        }
    }

    // 2. Secondary bonuses of the main category.
    for (dim, bonus) in secondary_bonuses(category) {
        scores[idx(*dim)] += bonus;
    }

    // 3. Metadata micro-adjustments.
    adjust_by_metadata(&mut scores, category, meta_data);

    // 4. Meaning is at least a weighted blend of the value-carrying dims.
    let meaning = scores[idx(Dimension::Growth)] * 0.30
        + scores[idx(Dimension::Social)] * 0.20
        + scores[idx(Dimension::Work)] * 0.20
        + scores[idx(Dimension::Leisure)] * 0.15
        + scores[idx(Dimension::Mood)] * 0.15;
    if meaning > scores[idx(Dimension::Meaning)] {
        scores[idx(Dimension::Meaning)] = meaning;
    }

    // 5. Clamp into [0, 100].
    let mut out = DimensionScores::new();
    for dim in Dimension::ALL {
        out.set(dim, scores[idx(dim)].round() as i64);
    }
    out
}

fn adjust_by_metadata(scores: &mut [f64; 8], category: Category, meta: &serde_json::Value) {
    let idx = |d: Dimension| d as usize;
    match category {
        Category::Sleep => {
            if let Some(duration) = meta.get("duration_hours").and_then(|v| v.as_f64()) {
                if (7.0..=9.0).contains(&duration) {
                    scores[idx(Dimension::Body)] += 20.0;
                } else if duration < 6.0 {
                    scores[idx(Dimension::Body)] -= 10.0;
                    scores[idx(Dimension::Mood)] -= 5.0;
                }
            }
            match meta.get("quality").and_then(|v| v.as_str()) {
                Some("good") => {
                    scores[idx(Dimension::Body)] += 10.0;
                    scores[idx(Dimension::Mood)] += 10.0;
                }
                Some("poor") => {
                    scores[idx(Dimension::Body)] -= 5.0;
                    scores[idx(Dimension::Mood)] -= 10.0;
                }
                _ => {}
            }
        }
        Category::Diet => match meta.get("is_healthy").and_then(|v| v.as_bool()) {
            Some(true) => scores[idx(Dimension::Body)] += 15.0,
            Some(false) => scores[idx(Dimension::Body)] -= 5.0,
            None => {}
        },
        Category::Activity => {
            if let Some(minutes) = meta.get("duration_minutes").and_then(|v| v.as_f64()) {
                if minutes >= 30.0 {
                    scores[idx(Dimension::Body)] += 15.0;
                    scores[idx(Dimension::Mood)] += 5.0;
                }
            }
        }
        Category::Screen => {
            if let Some(minutes) = meta.get("total_minutes").and_then(|v| v.as_f64()) {
                if minutes <= 120.0 {
                    scores[idx(Dimension::Digital)] += 25.0;
                } else if minutes >= 360.0 {
                    scores[idx(Dimension::Digital)] -= 20.0;
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn good_sleep_scores_body_high() {
        let meta = serde_json::json!({"duration_hours": 7.5, "quality": "good"});
        let scores = score_record(Category::Sleep, &meta, &[]);
        // 65 base + 20 duration + 10 quality = 95.
        assert_eq!(scores.get(Dimension::Body), 95);
        // 15 secondary + 10 quality = 25.
        assert_eq!(scores.get(Dimension::Mood), 25);
        assert_eq!(scores.get(Dimension::Digital), 0);
    }

    #[test]
    fn short_poor_sleep_penalized() {
        let meta = serde_json::json!({"duration_hours": 5.0, "quality": "poor"});
        let scores = score_record(Category::Sleep, &meta, &[]);
        // 65 - 10 - 5 = 50.
        assert_eq!(scores.get(Dimension::Body), 50);
        // 15 - 5 - 10 = 0.
        assert_eq!(scores.get(Dimension::Mood), 0);
    }

    #[test]
    fn long_activity_boosts_body_and_mood() {
        let meta = serde_json::json!({"duration_minutes": 45});
        let scores = score_record(Category::Activity, &meta, &[]);
        assert_eq!(scores.get(Dimension::Body), 80);
        assert_eq!(scores.get(Dimension::Mood), 20);
        assert_eq!(scores.get(Dimension::Leisure), 10);
    }

    #[test]
    fn heavy_screen_time_sinks_digital() {
        let meta = serde_json::json!({"total_minutes": 400});
        let scores = score_record(Category::Screen, &meta, &[]);
        assert_eq!(scores.get(Dimension::Digital), 45);

        let light = serde_json::json!({"total_minutes": 90});
        let scores = score_record(Category::Screen, &light, &[]);
        assert_eq!(scores.get(Dimension::Digital), 90);
    }

    #[test]
    fn sub_categories_lift_their_dimensions() {
        let scores = score_record(
            Category::Activity,
            &serde_json::json!({}),
            &[Category::Leisure],
        );
        assert_eq!(scores.get(Dimension::Body), 65);
        // Sub-category floor (30) plus activity's own leisure bonus (10).
        assert_eq!(scores.get(Dimension::Leisure), 40);
        // Half of leisure's mood bonus (5) plus activity's mood bonus (15).
        assert_eq!(scores.get(Dimension::Mood), 20);
    }

    #[test]
    fn meaning_is_weighted_blend() {
        let scores = score_record(Category::Growth, &serde_json::json!({}), &[]);
        assert_eq!(scores.get(Dimension::Growth), 65);
        assert_eq!(scores.get(Dimension::Work), 10);
        // max(20 direct bonus, 0.30*65 + 0.20*10) = max(20, 21.5) = 21.5 → 22.
        assert_eq!(scores.get(Dimension::Meaning), 22);
    }

    #[test]
    fn everything_clamps_to_range() {
        let meta = serde_json::json!({"duration_hours": 8.0, "quality": "good"});
        let scores = score_record(Category::Sleep, &meta, &[Category::Activity, Category::Mood]);
        for (_, v) in scores.iter() {
            assert!(v <= 100);
        }
    }
}
