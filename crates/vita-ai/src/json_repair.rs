//! Permissive parser for LLM structured output.
//!
//! Models asked for JSON still wrap it in markdown fences, prepend prose, or
//! get truncated by the token budget. The ladder below tries progressively
//! more forgiving strategies and stops at the first success.

use serde_json::Value;
use tracing::{info, warn};

use crate::error::AiError;

/// Truncation endings worth trying before brace-closing, paired with an
/// optional trailing-comma trim.
const REPAIR_SUFFIXES: &[&str] = &["", "\"", "\"}", "\"]", "\"}]}", "\"}}"];

/// Extract a JSON value from raw model output.
///
/// Strategies, in order: parse as-is; strip a markdown fence; outermost
/// `{…}`; outermost `[…]`; close an unterminated object/array. Fails with
/// [`AiError::Parse`] when nothing works.
pub fn extract_json(raw: &str, model_name: &str) -> Result<Value, AiError> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(AiError::Parse("model returned empty content".into()));
    }

    if let Ok(v) = serde_json::from_str::<Value>(content) {
        return Ok(v);
    }

    let content = strip_fence(content);

    // Outermost object.
    if let Some(candidate) = slice_outermost(content, '{', '}') {
        if let Ok(v) = serde_json::from_str::<Value>(candidate) {
            return Ok(v);
        }
    }

    // Outermost array.
    if let Some(candidate) = slice_outermost(content, '[', ']') {
        if let Ok(v) = serde_json::from_str::<Value>(candidate) {
            return Ok(v);
        }
    }

    // Possibly truncated: take from the first opener and try to close it.
    if let Some(start) = content.find(['{', '[']) {
        if let Some(v) = try_repair(&content[start..]) {
            info!(model = model_name, "repaired truncated JSON");
            return Ok(v);
        }
    }

    let head: String = raw.chars().take(200).collect();
    warn!(model = model_name, head = %head, "model output is not parseable JSON");
    Err(AiError::Parse(format!(
        "unparseable model output: {}",
        raw.chars().take(100).collect::<String>()
    )))
}

/// Fallback-returning variant for non-critical enrichment parses.
pub fn safe_extract_json(raw: &str, model_name: &str, fallback: Value) -> Value {
    match extract_json(raw, model_name) {
        Ok(v) => v,
        Err(e) => {
            warn!(model = model_name, error = %e, "JSON parse failed, using fallback");
            fallback
        }
    }
}

/// Remove a ```json … ``` (or plain ```) fence when one wraps the payload.
fn strip_fence(content: &str) -> &str {
    let Some(open) = content.find("```") else {
        return content;
    };
    let after = &content[open + 3..];
    // Skip an optional language marker up to the first newline.
    let body_start = match after.find('\n') {
        Some(nl) if after[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => nl + 1,
        _ => 0,
    };
    let body = &after[body_start..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

fn slice_outermost(content: &str, open: char, close: char) -> Option<&str> {
    let start = content.find(open)?;
    let end = content.rfind(close)?;
    (end > start).then(|| &content[start..=end])
}

fn try_repair(truncated: &str) -> Option<Value> {
    let text = truncated.trim_end();
    for suffix in REPAIR_SUFFIXES {
        for trim_comma in [false, true] {
            let mut candidate = text.to_string();
            if trim_comma {
                if let Some(stripped) = candidate.strip_suffix(',') {
                    candidate = stripped.to_string();
                } else {
                    continue;
                }
            }
            candidate.push_str(suffix);

            let (open_braces, open_brackets) = unmatched_depth(&candidate);
            if open_braces < 0 || open_brackets < 0 {
                continue;
            }
            for _ in 0..open_brackets {
                candidate.push(']');
            }
            for _ in 0..open_braces {
                candidate.push('}');
            }
            if let Ok(v) = serde_json::from_str::<Value>(&candidate) {
                return Some(v);
            }
        }
    }
    None
}

/// Count unmatched `{`/`[` outside string literals.
fn unmatched_depth(s: &str) -> (i32, i32) {
    let mut braces = 0i32;
    let mut brackets = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => braces += 1,
            '}' if !in_string => braces -= 1,
            '[' if !in_string => brackets += 1,
            ']' if !in_string => brackets -= 1,
            _ => {}
        }
    }
    (braces, brackets)
}
