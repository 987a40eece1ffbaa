//! Every clock conversion in one place.
//!
//! The stored corpus is naive Beijing-local (UTC+8). Client timestamps arrive
//! as ISO-8601 with or without an offset; the AI returns event times as ISO
//! strings or loose relative phrases. Nothing in the pipeline reads the wall
//! clock directly — callers pass the client-supplied anchor through.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, Utc};

/// Beijing offset (UTC+8), the storage timezone.
pub fn beijing_offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("fixed offset in range")
}

/// Storage format for all SQLite timestamp columns.
pub const STORE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_store(dt: NaiveDateTime) -> String {
    dt.format(STORE_FORMAT).to_string()
}

pub fn parse_store(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, STORE_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

/// Convert any offset-aware instant to naive Beijing-local.
pub fn to_naive_beijing(dt: DateTime<FixedOffset>) -> NaiveDateTime {
    dt.with_timezone(&beijing_offset()).naive_local()
}

/// Parse a client-supplied ISO-8601 timestamp into the Beijing-local anchor.
///
/// Accepts `2026-02-05T10:00:00+08:00`, `...Z`, and naive forms (assumed to
/// already be Beijing-local). Falls back to the current wall clock only when
/// the client sent nothing usable — the single place that is allowed.
pub fn client_anchor(client_time: Option<&str>) -> NaiveDateTime {
    if let Some(raw) = client_time {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(&raw.replace('Z', "+00:00")) {
            return to_naive_beijing(dt);
        }
        if let Some(naive) = parse_iso_naive(raw) {
            return naive;
        }
        tracing::warn!(client_time = raw, "unparseable client_time, using now");
    }
    Utc::now().with_timezone(&beijing_offset()).naive_local()
}

fn parse_iso_naive(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

/// Server bookkeeping clock (ledger rows, auth expiry). Pipeline code takes
/// the client anchor instead.
pub fn now_beijing() -> NaiveDateTime {
    Utc::now().with_timezone(&beijing_offset()).naive_local()
}

/// Time-of-day slot used by the tagger's mandatory `#time/` tag.
pub fn time_slot(hour: u32) -> &'static str {
    match hour {
        5..=8 => "morning",
        9..=11 => "forenoon",
        12..=13 => "noon",
        14..=16 => "afternoon",
        17..=18 => "dusk",
        19..=21 => "evening",
        22..=23 => "late",
        _ => "predawn",
    }
}

/// Human label handed to the extractor prompts (meal inference etc).
pub fn slot_label(hour: u32) -> &'static str {
    time_slot(hour)
}

/// Resolve the AI-returned `record_time` against the client anchor.
///
/// Accepted forms, tried in order:
/// - full ISO datetime (offset-aware normalized to Beijing, naive kept as-is)
/// - bare date `YYYY-MM-DD` (pinned to noon)
/// - relative phrases: today/now, yesterday, "last night", day-before
///   phrasing, `N days ago`, optionally trailed by `HH:MM`
///
/// Anything later than `anchor + 1 day` is rejected — the model must not
/// invent future events. Unparseable input yields `None` and the caller
/// falls back to the submission time.
pub fn resolve_record_time(raw: &str, anchor: NaiveDateTime) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let resolved = parse_absolute(trimmed).or_else(|| parse_relative(trimmed, anchor))?;

    if resolved > anchor + Duration::days(1) {
        tracing::warn!(record_time = trimmed, "record_time in the future, dropped");
        return None;
    }
    Some(resolved)
}

fn parse_absolute(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw.replace('Z', "+00:00")) {
        return Some(to_naive_beijing(dt));
    }
    if let Some(naive) = parse_iso_naive(raw) {
        return Some(naive);
    }
    if raw.len() == 10 {
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            // Date-only answers get pinned to noon.
            return date.and_hms_opt(12, 0, 0);
        }
    }
    None
}

fn parse_relative(raw: &str, anchor: NaiveDateTime) -> Option<NaiveDateTime> {
    let lower = raw.to_lowercase();
    let clock = extract_clock(&lower);

    let days_back = if matches_any(&lower, &["today", "now", "今天", "现在", "刚才"]) {
        0
    } else if matches_any(
        &lower,
        &["yesterday", "last night", "昨天", "昨晚", "昨夜"],
    ) {
        1
    } else if lower.contains("大前天") {
        3
    } else if matches_any(&lower, &["day before yesterday", "前天"]) {
        2
    } else if let Some(n) = extract_days_ago(&lower) {
        n
    } else {
        return None;
    };

    let base = anchor - Duration::days(days_back);
    match clock {
        Some((h, m)) => base.date().and_hms_opt(h, m, 0),
        None => Some(base),
    }
}

fn matches_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Pull a trailing `HH:MM` out of a phrase like "last night 23:30".
fn extract_clock(s: &str) -> Option<(u32, u32)> {
    let bytes = s.as_bytes();
    let colon = s.find(':')?;
    // Walk back over up to two digits before the colon.
    let mut start = colon;
    while start > 0 && bytes[start - 1].is_ascii_digit() && colon - start < 2 {
        start -= 1;
    }
    if start == colon {
        return None;
    }
    let hour: u32 = s[start..colon].parse().ok()?;
    let min_str: String = s[colon + 1..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if min_str.len() != 2 {
        return None;
    }
    let minute: u32 = min_str.parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

/// Parse "3 days ago" / "3天前".
fn extract_days_ago(s: &str) -> Option<i64> {
    if !s.contains("days ago") && !s.contains("day ago") && !s.contains("天前") {
        return None;
    }
    let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
