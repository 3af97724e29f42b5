use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Engagement counters reported by the source. Unknown counts are `0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub likes: u64,
    pub shares: u64,
    pub comments: u64,
}

/// A collected item, normalized across every platform.
///
/// `(platform, source_id)` is the dedup key: the store holds at most one
/// row per pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Source type tag, e.g. `"reddit"` or `"rss"`.
    pub platform: String,
    /// Identifier assigned by the source, unique within `platform`.
    pub source_id: String,
    pub author: String,
    pub content: String,
    /// When the item was authored, as reported by the source.
    pub created_at: DateTime<Utc>,
    pub url: String,
    #[serde(default)]
    pub engagement: Engagement,
    /// Hashtags / categories. Kept sorted so equality ignores source order.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Platform-specific extras, opaque to the collector.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Assigned by the store on first write; `None` until then.
    #[serde(default)]
    pub collected_at: Option<DateTime<Utc>>,
}

impl Post {
    /// The `(platform, source_id)` pair identifying this post.
    #[must_use]
    pub fn key(&self) -> (&str, &str) {
        (&self.platform, &self.source_id)
    }

    /// Content length in characters, the unit the length filter uses.
    #[must_use]
    pub fn content_len(&self) -> usize {
        self.content.chars().count()
    }

    /// Metadata entries present here but absent from `stored`.
    #[must_use]
    pub fn metadata_missing_from(&self, stored: &Map<String, Value>) -> Map<String, Value> {
        self.metadata
            .iter()
            .filter(|(k, _)| !stored.contains_key(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
