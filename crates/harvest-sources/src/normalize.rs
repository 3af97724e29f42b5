//! `RawItem` → [`Post`] mapping shared by every adapter.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use harvest_core::{Engagement, Post};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::raw::RawItem;

const UNKNOWN_AUTHOR: &str = "unknown";

/// Only structurally malformed items fail; everything else gets a default.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("{platform} item has no id")]
    MissingId { platform: String },

    #[error("{platform} item id must be a string or integer, got {found}")]
    InvalidId { platform: String, found: String },

    #[error("{platform} item {id} has unparseable created_at {value}")]
    InvalidTimestamp {
        platform: String,
        id: String,
        value: String,
    },
}

/// Convert `raw` into a canonical post. `observed_at` stands in for a
/// missing `created_at`.
///
/// # Errors
///
/// Returns [`NormalizationError`] for a missing, empty or non-scalar `id`,
/// or a `created_at` that is neither RFC 3339 nor unix seconds.
pub fn normalize(raw: RawItem, observed_at: DateTime<Utc>) -> Result<Post, NormalizationError> {
    let RawItem { platform, fields } = raw;

    let source_id = extract_id(&platform, fields.get("id"))?;
    let created_at = match fields.get("created_at") {
        None | Some(Value::Null) => observed_at,
        Some(value) => parse_timestamp(value).ok_or_else(|| NormalizationError::InvalidTimestamp {
            platform: platform.clone(),
            id: source_id.clone(),
            value: value.to_string(),
        })?,
    };

    let author = non_empty_str(fields.get("author"))
        .unwrap_or(UNKNOWN_AUTHOR)
        .to_string();

    Ok(Post {
        source_id,
        author,
        content: extract_content(&fields),
        created_at,
        url: non_empty_str(fields.get("url")).unwrap_or_default().to_string(),
        engagement: Engagement {
            likes: count(fields.get("likes")),
            shares: count(fields.get("shares")),
            comments: count(fields.get("comments")),
        },
        tags: extract_tags(fields.get("tags")),
        metadata: match fields.get("metadata") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        },
        collected_at: None,
        platform,
    })
}

fn extract_id(platform: &str, value: Option<&Value>) -> Result<String, NormalizationError> {
    match value {
        None | Some(Value::Null) => Err(NormalizationError::MissingId {
            platform: platform.to_string(),
        }),
        Some(Value::String(s)) if s.trim().is_empty() => Err(NormalizationError::MissingId {
            platform: platform.to_string(),
        }),
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        Some(other) => Err(NormalizationError::InvalidId {
            platform: platform.to_string(),
            found: json_kind(other).to_string(),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "non-integer number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|at| at.with_timezone(&Utc)),
        Value::Number(n) => {
            if let Some(secs) = n.as_i64() {
                DateTime::from_timestamp(secs, 0)
            } else {
                timestamp_from_secs(n.as_f64()?)
            }
        }
        _ => None,
    }
}

/// Fractional unix seconds to an instant, kept to the microsecond.
pub(crate) fn timestamp_from_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    let micros = (secs * 1_000_000.0).round() as i64;
    DateTime::from_timestamp_micros(micros)
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn extract_content(fields: &Map<String, Value>) -> String {
    if let Some(content) = non_empty_str(fields.get("content")) {
        return content.to_string();
    }
    [fields.get("title"), fields.get("body")]
        .into_iter()
        .filter_map(non_empty_str)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Non-negative integer count; negatives and anything non-numeric become `0`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn count(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n.as_u64().unwrap_or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f > 0.0)
                .map_or(0, |f| f as u64)
        }),
        _ => 0,
    }
}

fn extract_tags(value: Option<&Value>) -> BTreeSet<String> {
    let clean = |s: &str| {
        let t = s.trim();
        (!t.is_empty()).then(|| t.to_string())
    };
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(clean)
            .collect(),
        Some(Value::String(s)) => s.split(',').filter_map(clean).collect(),
        _ => BTreeSet::new(),
    }
}

#[cfg(test)]
#[path = "normalize_test.rs"]
mod tests;
