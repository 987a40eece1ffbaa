//! Chat context assembly: structured DB context routed by keywords in the
//! utterance, plus top-K semantic retrieval.
//!
//! The system prompt stays deliberately terse; all data context rides in the
//! user turn so the provider keeps honouring system instructions under
//! long-context pressure.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDateTime};

use vita_core::types::Category;
use vita_rag::VectorIndexer;
use vita_store::meta::SleepMeta;
use vita_store::types::LifeRecord;
use vita_store::RecordStore;

/// Character budgets: tighter when history rides along.
const DB_CTX_WITH_HISTORY: usize = 800;
const DB_CTX_BARE: usize = 1500;
const RAG_CTX_WITH_HISTORY: usize = 500;
const RAG_CTX_BARE: usize = 800;

const SEMANTIC_TOP_K: usize = 5;

/// Structured DB context for an utterance: always the overview, then one
/// block per matched keyword set.
pub fn gather_db_context(records: &RecordStore, message: &str, now: NaiveDateTime) -> String {
    let msg = message.to_lowercase();
    let mut parts: Vec<String> = vec![overview_block(records, now)];

    if contains_any(&msg, &["today", "今天", "今日"]) {
        parts.push(today_block(records, now));
    }
    if contains_any(&msg, &["week", "本周", "这周", "这一周", "最近一周"]) {
        parts.push(week_block(records, now));
    }
    if contains_any(&msg, &["month", "本月", "这个月"]) {
        parts.push(month_block(records, now));
    }
    if contains_any(&msg, &["sleep", "睡眠", "睡觉", "作息", "休息"]) {
        parts.push(category_block(records, Category::Sleep, now));
    }
    if contains_any(&msg, &["mood", "心情", "情绪", "心态", "感觉"]) {
        parts.push(category_block(records, Category::Mood, now));
    }
    if contains_any(&msg, &["exercise", "workout", "运动", "锻炼", "健身", "活动"]) {
        parts.push(category_block(records, Category::Activity, now));
    }
    if contains_any(&msg, &["trend", "趋势", "变化"]) {
        parts.push(trend_block(records, now));
    }
    if contains_any(&msg, &["best", "最好", "最佳", "最高"]) {
        parts.push(extreme_block(records, now, true));
    }
    if contains_any(&msg, &["worst", "最差", "最低"]) {
        parts.push(extreme_block(records, now, false));
    }

    parts.retain(|p| !p.is_empty());
    parts.join("\n\n")
}

/// Top-K nearest neighbours rendered as quoted lines.
pub async fn gather_rag_context(indexer: &VectorIndexer, message: &str) -> String {
    let hits = indexer.search(message, SEMANTIC_TOP_K).await;
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "[semantic {}] ({} {}) {}",
                i + 1,
                hit.date,
                hit.category,
                hit.document.replace('\n', " ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Terse system prompt: wall clock plus output-format rules only.
pub fn build_system_prompt(now: NaiveDateTime) -> String {
    format!(
        "You are Vita's AI life assistant. Current time: {}.\n\
         Rules: answer from the provided data, Markdown with a few emoji, \
         concise and insightful, never invent numbers.",
        now.format("%Y-%m-%d %H:%M %A")
    )
}

/// User turn: question + budget-trimmed data blocks.
pub fn build_user_prompt(
    message: &str,
    db_context: &str,
    rag_context: &str,
    has_history: bool,
) -> String {
    let (db_budget, rag_budget) = if has_history {
        (DB_CTX_WITH_HISTORY, RAG_CTX_WITH_HISTORY)
    } else {
        (DB_CTX_BARE, RAG_CTX_BARE)
    };
    let db_ctx = truncate_chars(db_context, db_budget);
    let rag_ctx = truncate_chars(rag_context, rag_budget);

    let mut parts = vec![
        format!("My question: {message}"),
        String::new(),
        "== Data ==".to_string(),
        db_ctx,
    ];
    if !rag_ctx.is_empty() {
        parts.push(String::new());
        parts.push("== Related records ==".to_string());
        parts.push(rag_ctx);
    }
    parts.push("\nPlease answer.".to_string());
    parts.join("\n")
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

pub fn truncate_chars(s: &str, budget: usize) -> String {
    if s.chars().count() <= budget {
        s.to_string()
    } else {
        s.chars().take(budget).collect()
    }
}

fn overview_block(records: &RecordStore, now: NaiveDateTime) -> String {
    let total = records.count_live().unwrap_or(0);
    let week = records.count_live_since(week_ago(now)).unwrap_or(0);
    let cats = records.counts_by_category().unwrap_or_default();
    let mut sorted: Vec<(Category, u64)> = cats.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1));
    let cat_str = sorted
        .iter()
        .map(|(c, n)| format!("{c}: {n}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("[overview] {total} records total, {week} in the last 7 days. By category: {cat_str}")
}

fn today_block(records: &RecordStore, now: NaiveDateTime) -> String {
    let start = now.date().and_hms_opt(0, 0, 0).unwrap_or(now);
    let today = records.live_since(start).unwrap_or_default();
    if today.is_empty() {
        return "[today] no records yet today".to_string();
    }
    let mut cats: BTreeMap<&str, u64> = BTreeMap::new();
    let mut insights = Vec::new();
    for r in &today {
        *cats.entry(r.category.as_str()).or_insert(0) += 1;
        if let Some(insight) = &r.ai_insight {
            if !insight.is_empty() && insights.len() < 5 {
                insights.push(format!(
                    "  - [{}] {}",
                    r.category,
                    truncate_chars(insight, 80)
                ));
            }
        }
    }
    let cat_str = cats
        .iter()
        .map(|(c, n)| format!("{c}: {n}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut out = format!("[today] {} records. Categories: {cat_str}", today.len());
    if !insights.is_empty() {
        out.push_str("\nInsights:\n");
        out.push_str(&insights.join("\n"));
    }
    out
}

fn week_block(records: &RecordStore, now: NaiveDateTime) -> String {
    let rows = records.live_since(week_ago(now)).unwrap_or_default();
    if rows.is_empty() {
        return "[week] no records".to_string();
    }
    let mut daily: BTreeMap<String, (u64, Vec<f64>)> = BTreeMap::new();
    for r in &rows {
        let day = r.submitted_at.format("%m/%d").to_string();
        let entry = daily.entry(day).or_default();
        entry.0 += 1;
        if let Some(mean) = r.dimension_scores.mean() {
            entry.1.push(mean);
        }
    }
    let mut lines = vec![format!("[week] {} records", rows.len())];
    for (day, (count, means)) in daily {
        let score = if means.is_empty() {
            String::new()
        } else {
            let avg = means.iter().sum::<f64>() / means.len() as f64;
            format!(" avg {avg:.0}")
        };
        lines.push(format!("  {day}: {count} records{score}"));
    }
    lines.join("\n")
}

fn month_block(records: &RecordStore, now: NaiveDateTime) -> String {
    let rows = records
        .live_since(now - Duration::days(30))
        .unwrap_or_default();
    if rows.is_empty() {
        return "[month] no records".to_string();
    }
    let mut cats: BTreeMap<&str, u64> = BTreeMap::new();
    let mut means = Vec::new();
    for r in &rows {
        *cats.entry(r.category.as_str()).or_insert(0) += 1;
        if let Some(mean) = r.dimension_scores.mean() {
            means.push(mean);
        }
    }
    let mut sorted: Vec<(&str, u64)> = cats.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1));
    let cat_str = sorted
        .iter()
        .map(|(c, n)| format!("{c}: {n}"))
        .collect::<Vec<_>>()
        .join(", ");
    let score = if means.is_empty() {
        String::new()
    } else {
        format!(
            ", mean state score {:.1}",
            means.iter().sum::<f64>() / means.len() as f64
        )
    };
    format!("[month] {} records{score}. Categories: {cat_str}", rows.len())
}

fn category_block(records: &RecordStore, category: Category, now: NaiveDateTime) -> String {
    let label = category.as_str().to_lowercase();
    let rows = records
        .live_by_category_since(category, now - Duration::days(14))
        .unwrap_or_default();
    if rows.is_empty() {
        return format!("[{label}] no records in the last 14 days");
    }
    let mut lines = vec![format!("[{label}] {} records in the last 14 days", rows.len())];
    for r in &rows {
        lines.push(format!("  {}", describe_record(r, category)));
    }
    lines.join("\n")
}

fn describe_record(r: &LifeRecord, category: Category) -> String {
    let date = r.effective_time().format("%m/%d").to_string();
    let insight = r
        .ai_insight
        .as_deref()
        .map(|s| truncate_chars(s, 60))
        .unwrap_or_default();
    match category {
        Category::Sleep => {
            let meta: SleepMeta = vita_store::meta::decode(&r.meta_data);
            let mut info = format!("{date}: ");
            if let Some(d) = meta.duration_hours {
                info.push_str(&format!("{d}h "));
            }
            if let Some(s) = meta.sleep_time {
                info.push_str(&format!("down {s} "));
            }
            if let Some(w) = meta.wake_time {
                info.push_str(&format!("up {w} "));
            }
            if !insight.is_empty() {
                info.push_str(&format!("- {insight}"));
            }
            info.trim_end().to_string()
        }
        Category::Mood => {
            let tags = r.tags.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
            if insight.is_empty() {
                format!("{date}: {tags}")
            } else {
                format!("{date}: {tags} - {insight}")
            }
        }
        _ => format!("{date}: {insight}"),
    }
}

fn trend_block(records: &RecordStore, now: NaiveDateTime) -> String {
    let rows = records
        .live_since(now - Duration::days(14))
        .unwrap_or_default();
    if rows.len() < 3 {
        return "[trend] not enough data".to_string();
    }
    let mut daily: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for r in &rows {
        if let Some(mean) = r.dimension_scores.mean() {
            daily
                .entry(r.submitted_at.format("%m/%d").to_string())
                .or_default()
                .push(mean);
        }
    }
    if daily.is_empty() {
        return "[trend] no scored data".to_string();
    }
    let mut lines = vec!["[trend] daily mean state score:".to_string()];
    for (day, means) in daily {
        let avg = means.iter().sum::<f64>() / means.len() as f64;
        let filled = (avg / 10.0) as usize;
        let bar: String = "█".repeat(filled) + &"░".repeat(10usize.saturating_sub(filled));
        lines.push(format!("  {day}: {bar} {avg:.0}"));
    }
    lines.join("\n")
}

fn extreme_block(records: &RecordStore, now: NaiveDateTime, best: bool) -> String {
    let label = if best { "best" } else { "worst" };
    let rows = records
        .live_since(now - Duration::days(30))
        .unwrap_or_default();
    let mut daily: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for r in &rows {
        if let Some(mean) = r.dimension_scores.mean() {
            daily
                .entry(r.submitted_at.format("%Y-%m-%d").to_string())
                .or_default()
                .push(mean);
        }
    }
    if daily.is_empty() {
        return format!("[{label} day] not enough data");
    }
    let averaged: Vec<(String, f64)> = daily
        .into_iter()
        .map(|(d, m)| (d, m.iter().sum::<f64>() / m.len() as f64))
        .collect();
    let target = if best {
        averaged
            .iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    } else {
        averaged
            .iter()
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    };
    match target {
        Some((day, avg)) => {
            format!("[{label} day] {label} day of the last 30: {day}, mean score {avg:.1}")
        }
        None => format!("[{label} day] not enough data"),
    }
}

fn week_ago(now: NaiveDateTime) -> NaiveDateTime {
    now - Duration::days(7)
}
