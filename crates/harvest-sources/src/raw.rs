use serde_json::{Map, Value};

/// An item as a source delivered it, before normalization.
///
/// `fields` uses the keys [`crate::normalize`] recognizes (`id`, `author`,
/// `content`, `title`, `body`, `created_at`, `url`, `likes`, `shares`,
/// `comments`, `tags`, `metadata`). Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct RawItem {
    pub platform: String,
    pub fields: Map<String, Value>,
}

impl RawItem {
    #[must_use]
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            fields: Map::new(),
        }
    }

    /// Set `key`, skipping JSON `null` so absent and null read the same.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if !value.is_null() {
            self.fields.insert(key.to_string(), value);
        }
        self
    }

    /// Set `metadata` to an object of the given entries, dropping nulls.
    #[must_use]
    pub fn with_metadata<'k, I>(self, entries: I) -> Self
    where
        I: IntoIterator<Item = (&'k str, Value)>,
    {
        let metadata: Map<String, Value> = entries
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        self.with("metadata", Value::Object(metadata))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn with_skips_null_values() {
        let item = RawItem::new("rss")
            .with("id", "x")
            .with("author", Value::Null)
            .with("likes", json!(3));
        assert_eq!(item.get("id"), Some(&json!("x")));
        assert!(item.get("author").is_none());
        assert_eq!(item.fields.len(), 2);
    }

    #[test]
    fn with_metadata_drops_null_entries() {
        let item = RawItem::new("reddit")
            .with_metadata([("subreddit", json!("rust")), ("gilded", Value::Null)]);
        assert_eq!(item.get("metadata"), Some(&json!({"subreddit": "rust"})));
    }
}
