//! Content rules applied to every normalized post before it reaches the store.

use std::collections::BTreeSet;

use crate::posts::Post;
use crate::settings::CollectorSettings;

/// Why a post was rejected by [`ContentFilter::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterRejection {
    TooShort { len: usize, min: usize },
    TooLong { len: usize, max: usize },
    BlockedKeyword(String),
    BlockedAuthor(String),
}

impl std::fmt::Display for FilterRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterRejection::TooShort { len, min } => {
                write!(f, "content length {len} below minimum {min}")
            }
            FilterRejection::TooLong { len, max } => {
                write!(f, "content length {len} above maximum {max}")
            }
            FilterRejection::BlockedKeyword(k) => write!(f, "content contains blocked keyword '{k}'"),
            FilterRejection::BlockedAuthor(a) => write!(f, "author '{a}' is blocked"),
        }
    }
}

/// Length, keyword and author blocklist rules.
///
/// Lengths are measured in characters. Keywords match as case-insensitive
/// substrings of `content`; authors must match exactly.
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    min_content_length: usize,
    max_content_length: Option<usize>,
    /// Stored lowercased.
    blocked_keywords: Vec<String>,
    blocked_authors: BTreeSet<String>,
}

impl ContentFilter {
    #[must_use]
    pub fn new(min_content_length: usize, max_content_length: Option<usize>) -> Self {
        Self {
            min_content_length,
            max_content_length,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_settings(settings: &CollectorSettings) -> Self {
        Self::new(settings.min_content_length, settings.max_content_length)
            .with_blocked_keywords(settings.blocked_keywords.iter().cloned())
            .with_blocked_authors(settings.blocked_authors.iter().cloned())
    }

    #[must_use]
    pub fn with_blocked_keywords<I: IntoIterator<Item = String>>(mut self, keywords: I) -> Self {
        self.blocked_keywords = keywords
            .into_iter()
            .map(|k| k.to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        self
    }

    #[must_use]
    pub fn with_blocked_authors<I: IntoIterator<Item = String>>(mut self, authors: I) -> Self {
        self.blocked_authors = authors.into_iter().collect();
        self
    }

    /// Returns the first rule `post` violates, if any.
    ///
    /// # Errors
    ///
    /// Returns the [`FilterRejection`] describing the failed rule.
    pub fn check(&self, post: &Post) -> Result<(), FilterRejection> {
        let len = post.content_len();
        if len < self.min_content_length {
            return Err(FilterRejection::TooShort {
                len,
                min: self.min_content_length,
            });
        }
        if let Some(max) = self.max_content_length {
            if len > max {
                return Err(FilterRejection::TooLong { len, max });
            }
        }
        if self.blocked_authors.contains(&post.author) {
            return Err(FilterRejection::BlockedAuthor(post.author.clone()));
        }
        if !self.blocked_keywords.is_empty() {
            let content = post.content.to_lowercase();
            if let Some(hit) = self.blocked_keywords.iter().find(|k| content.contains(k.as_str())) {
                return Err(FilterRejection::BlockedKeyword(hit.clone()));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn keep(&self, post: &Post) -> bool {
        self.check(post).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posts::Engagement;
    use chrono::Utc;
    use serde_json::Map;

    fn post(platform: &str, author: &str, content: &str) -> Post {
        Post {
            platform: platform.to_string(),
            source_id: format!("{platform}-{}", content.len()),
            author: author.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            url: String::new(),
            engagement: Engagement::default(),
            tags: BTreeSet::new(),
            metadata: Map::new(),
            collected_at: None,
        }
    }

    #[test]
    fn min_length_drops_short_posts_on_every_platform() {
        let filter = ContentFilter::new(10, None);
        for platform in ["reddit", "hackernews", "discourse", "rss"] {
            assert!(!filter.keep(&post(platform, "a", "too short")), "{platform}");
            assert!(filter.keep(&post(platform, "a", "exactly 10")), "{platform}");
            assert!(filter.keep(&post(platform, "a", "comfortably long enough")), "{platform}");
        }
    }

    #[test]
    fn max_length_drops_long_posts() {
        let filter = ContentFilter::new(0, Some(5));
        assert_eq!(
            filter.check(&post("rss", "a", "abcdef")),
            Err(FilterRejection::TooLong { len: 6, max: 5 })
        );
        assert!(filter.keep(&post("rss", "a", "abcde")));
    }

    #[test]
    fn blocked_keywords_match_case_insensitive_substrings() {
        let filter = ContentFilter::new(0, None).with_blocked_keywords(["Casino".to_string()]);
        assert_eq!(
            filter.check(&post("reddit", "a", "Best CASINOS online")),
            Err(FilterRejection::BlockedKeyword("casino".to_string()))
        );
        assert!(filter.keep(&post("reddit", "a", "healthy gaming habits")));
    }

    #[test]
    fn blocked_authors_match_exactly() {
        let filter = ContentFilter::new(0, None).with_blocked_authors(["spambot".to_string()]);
        assert!(!filter.keep(&post("reddit", "spambot", "hello world")));
        assert!(filter.keep(&post("reddit", "SpamBot", "hello world")));
    }
}
