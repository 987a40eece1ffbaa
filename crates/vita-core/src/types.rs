use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// How a life record entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InputType {
    Text,
    Image,
    Screenshot,
    Audio,
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InputType::Text => "TEXT",
            InputType::Image => "IMAGE",
            InputType::Screenshot => "SCREENSHOT",
            InputType::Audio => "AUDIO",
        };
        f.write_str(s)
    }
}

impl FromStr for InputType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TEXT" => Ok(InputType::Text),
            "IMAGE" => Ok(InputType::Image),
            "SCREENSHOT" => Ok(InputType::Screenshot),
            "AUDIO" => Ok(InputType::Audio),
            other => Err(format!("unknown input type: {other}")),
        }
    }
}

/// The nine-valued record category. Never free-form: unknown strings are
/// rejected at every boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Sleep,
    Diet,
    Activity,
    Mood,
    Social,
    Work,
    Growth,
    Leisure,
    Screen,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Sleep,
        Category::Diet,
        Category::Activity,
        Category::Mood,
        Category::Social,
        Category::Work,
        Category::Growth,
        Category::Leisure,
        Category::Screen,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Sleep => "SLEEP",
            Category::Diet => "DIET",
            Category::Activity => "ACTIVITY",
            Category::Mood => "MOOD",
            Category::Social => "SOCIAL",
            Category::Work => "WORK",
            Category::Growth => "GROWTH",
            Category::Leisure => "LEISURE",
            Category::Screen => "SCREEN",
        }
    }

    /// Display label used in rendered documents (the stored corpus is
    /// Beijing-local and Chinese-first).
    pub fn label_zh(&self) -> &'static str {
        match self {
            Category::Sleep => "睡眠",
            Category::Diet => "饮食",
            Category::Activity => "运动",
            Category::Mood => "心情",
            Category::Social => "社交",
            Category::Work => "工作",
            Category::Growth => "学习成长",
            Category::Leisure => "休闲",
            Category::Screen => "屏幕使用",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SLEEP" => Ok(Category::Sleep),
            "DIET" => Ok(Category::Diet),
            "ACTIVITY" => Ok(Category::Activity),
            "MOOD" => Ok(Category::Mood),
            "SOCIAL" => Ok(Category::Social),
            "WORK" => Ok(Category::Work),
            "GROWTH" => Ok(Category::Growth),
            "LEISURE" => Ok(Category::Leisure),
            "SCREEN" => Ok(Category::Screen),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

/// Classifier label for an uploaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    Screenshot,
    SleepScreenshot,
    Food,
    ActivityScreenshot,
    ActivityPhoto,
    Scenery,
    Selfie,
    Other,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Screenshot => "screenshot",
            ImageKind::SleepScreenshot => "sleep_screenshot",
            ImageKind::Food => "food",
            ImageKind::ActivityScreenshot => "activity_screenshot",
            ImageKind::ActivityPhoto => "activity_photo",
            ImageKind::Scenery => "scenery",
            ImageKind::Selfie => "selfie",
            ImageKind::Other => "other",
        }
    }

    /// Captured moments are kept; data screenshots are discarded once their
    /// numbers are extracted.
    pub fn keep_original(&self) -> bool {
        matches!(
            self,
            ImageKind::Food | ImageKind::ActivityPhoto | ImageKind::Scenery | ImageKind::Selfie
        )
    }
}

impl FromStr for ImageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "screenshot" => Ok(ImageKind::Screenshot),
            "sleep_screenshot" => Ok(ImageKind::SleepScreenshot),
            "food" => Ok(ImageKind::Food),
            "activity_screenshot" => Ok(ImageKind::ActivityScreenshot),
            "activity_photo" => Ok(ImageKind::ActivityPhoto),
            "scenery" => Ok(ImageKind::Scenery),
            "selfie" => Ok(ImageKind::Selfie),
            "other" => Ok(ImageKind::Other),
            other => Err(format!("unknown image kind: {other}")),
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The eight wellbeing dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Body,
    Mood,
    Social,
    Work,
    Growth,
    Meaning,
    Digital,
    Leisure,
}

impl Dimension {
    pub const ALL: [Dimension; 8] = [
        Dimension::Body,
        Dimension::Mood,
        Dimension::Social,
        Dimension::Work,
        Dimension::Growth,
        Dimension::Meaning,
        Dimension::Digital,
        Dimension::Leisure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Body => "body",
            Dimension::Mood => "mood",
            Dimension::Social => "social",
            Dimension::Work => "work",
            Dimension::Growth => "growth",
            Dimension::Meaning => "meaning",
            Dimension::Digital => "digital",
            Dimension::Leisure => "leisure",
        }
    }

    pub fn label_zh(&self) -> &'static str {
        match self {
            Dimension::Body => "身体",
            Dimension::Mood => "心情",
            Dimension::Social => "社交",
            Dimension::Work => "工作",
            Dimension::Growth => "成长",
            Dimension::Meaning => "意义",
            Dimension::Digital => "数字健康",
            Dimension::Leisure => "休闲",
        }
    }
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "body" => Ok(Dimension::Body),
            "mood" => Ok(Dimension::Mood),
            "social" => Ok(Dimension::Social),
            "work" => Ok(Dimension::Work),
            "growth" => Ok(Dimension::Growth),
            "meaning" => Ok(Dimension::Meaning),
            "digital" => Ok(Dimension::Digital),
            "leisure" => Ok(Dimension::Leisure),
            other => Err(format!("unknown dimension: {other}")),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-record dimension scores. Absent keys read as 0; every stored value
/// lies in [0, 100].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionScores(pub BTreeMap<Dimension, u8>);

impl DimensionScores {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, dim: Dimension) -> u8 {
        self.0.get(&dim).copied().unwrap_or(0)
    }

    /// Insert with clamping to [0, 100].
    pub fn set(&mut self, dim: Dimension, value: i64) {
        self.0.insert(dim, value.clamp(0, 100) as u8);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Dimension, u8)> + '_ {
        self.0.iter().map(|(d, v)| (*d, *v))
    }

    /// Mean of the present values, `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        if self.0.is_empty() {
            return None;
        }
        let sum: u32 = self.0.values().map(|v| *v as u32).sum();
        Some(sum as f64 / self.0.len() as f64)
    }

    /// Validate and clean a raw JSON object into scores. Unknown keys and
    /// non-numeric values are dropped, numbers clamped to [0, 100].
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut scores = Self::new();
        if let Some(map) = value.as_object() {
            for (k, v) in map {
                let Ok(dim) = k.parse::<Dimension>() else {
                    continue;
                };
                let num = v
                    .as_i64()
                    .or_else(|| v.as_f64().map(|f| f.round() as i64));
                if let Some(n) = num {
                    scores.set(dim, n);
                }
            }
        }
        scores
    }
}

/// Hierarchical semantic tag, always shaped `#<category>/<leaf>`.
pub fn is_valid_tag(tag: &str) -> bool {
    let Some(rest) = tag.strip_prefix('#') else {
        return false;
    };
    let mut parts = rest.splitn(2, '/');
    let (Some(cat), Some(leaf)) = (parts.next(), parts.next()) else {
        return false;
    };
    !cat.is_empty() && !leaf.is_empty() && !leaf.contains('/')
}

/// Maximum tags carried by a record.
pub const MAX_TAGS: usize = 8;

/// Drop malformed tags, dedupe preserving order, cap at [`MAX_TAGS`].
pub fn clean_tags(raw: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in raw {
        let tag = tag.trim().to_string();
        if is_valid_tag(&tag) && !out.contains(&tag) {
            out.push(tag);
        }
        if out.len() == MAX_TAGS {
            break;
        }
    }
    out
}

/// Named pipeline phases that can fail independently and be regenerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    AiInsight,
    ImageSave,
    Tags,
    DimensionScores,
    RagIndex,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::AiInsight => "ai_insight",
            Phase::ImageSave => "image_save",
            Phase::Tags => "tags",
            Phase::DimensionScores => "dimension_scores",
            Phase::RagIndex => "rag_index",
        }
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai_insight" => Ok(Phase::AiInsight),
            "image_save" => Ok(Phase::ImageSave),
            "tags" => Ok(Phase::Tags),
            "dimension_scores" => Ok(Phase::DimensionScores),
            "rag_index" => Ok(Phase::RagIndex),
            other => Err(format!("unknown phase: {other}")),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trip() {
        for cat in Category::ALL {
            assert_eq!(cat.as_str().parse::<Category>().unwrap(), cat);
        }
        assert!("NAP".parse::<Category>().is_err());
        assert_eq!(" sleep ".parse::<Category>().unwrap(), Category::Sleep);
    }

    #[test]
    fn image_kind_save_policy() {
        assert!(!ImageKind::Screenshot.keep_original());
        assert!(!ImageKind::SleepScreenshot.keep_original());
        assert!(!ImageKind::ActivityScreenshot.keep_original());
        assert!(ImageKind::Food.keep_original());
        assert!(ImageKind::Selfie.keep_original());
        assert!(!ImageKind::Other.keep_original());
    }

    #[test]
    fn scores_clamp_and_drop_unknown() {
        let raw = serde_json::json!({
            "body": 120, "mood": -3, "growth": 55.6, "chi": 40, "work": "high"
        });
        let scores = DimensionScores::from_json(&raw);
        assert_eq!(scores.get(Dimension::Body), 100);
        assert_eq!(scores.get(Dimension::Mood), 0);
        assert_eq!(scores.get(Dimension::Growth), 56);
        assert_eq!(scores.len(), 3);
    }

    #[test]
    fn tag_shape() {
        assert!(is_valid_tag("#time/morning"));
        assert!(is_valid_tag("#饮食/咖啡"));
        assert!(!is_valid_tag("time/morning"));
        assert!(!is_valid_tag("#timeonly"));
        assert!(!is_valid_tag("#/leaf"));
        assert!(!is_valid_tag("#a/b/c"));
    }

    #[test]
    fn clean_tags_dedupes_and_caps() {
        let raw: Vec<String> = (0..12)
            .map(|i| format!("#cat/leaf{}", i % 10))
            .chain(["bad-tag".to_string()])
            .collect();
        let cleaned = clean_tags(raw);
        assert_eq!(cleaned.len(), MAX_TAGS);
        assert!(cleaned.iter().all(|t| is_valid_tag(t)));
    }
}
