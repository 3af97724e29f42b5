use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};

/// Lower bound on `created_at` for the items a run keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeBound {
    #[default]
    Unbounded,
    /// Keep items authored at or after this instant.
    Since(DateTime<Utc>),
    /// Keep items from the trailing window ending at run start.
    Trailing(TimeDelta),
}

impl TimeBound {
    /// The absolute lower bound relative to `now`, if any.
    ///
    /// A trailing window reaching before the earliest representable instant
    /// bounds nothing and resolves to `None`.
    #[must_use]
    pub fn resolve(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TimeBound::Unbounded => None,
            TimeBound::Since(at) => Some(at),
            TimeBound::Trailing(window) => now.checked_sub_signed(window),
        }
    }
}

/// Input to one collection run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionQuery {
    /// OR-combined search terms. Empty means "whatever the source lists".
    pub keywords: Vec<String>,
    /// Restrict the run to these platforms; `None` runs every enabled adapter.
    pub platforms: Option<BTreeSet<String>>,
    pub max_posts_per_source: usize,
    pub time_bound: TimeBound,
}

impl CollectionQuery {
    #[must_use]
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(Into::into)
                .map(|k: String| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
            platforms: None,
            max_posts_per_source: 100,
            time_bound: TimeBound::Unbounded,
        }
    }

    #[must_use]
    pub fn with_platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = platforms.into_iter().map(Into::into).collect();
        self.platforms = if set.is_empty() { None } else { Some(set) };
        self
    }

    #[must_use]
    pub fn with_max_posts(mut self, max_posts: usize) -> Self {
        self.max_posts_per_source = max_posts;
        self
    }

    #[must_use]
    pub fn with_time_bound(mut self, bound: TimeBound) -> Self {
        self.time_bound = bound;
        self
    }

    /// Pin a trailing window to an absolute bound so every adapter in one
    /// run filters against the same instant.
    #[must_use]
    pub fn resolved_at(&self, now: DateTime<Utc>) -> Self {
        let mut resolved = self.clone();
        resolved.time_bound = match self.time_bound.resolve(now) {
            Some(at) => TimeBound::Since(at),
            None => TimeBound::Unbounded,
        };
        resolved
    }

    /// The lower bound on `created_at`, evaluated against the current time
    /// for an unresolved trailing window.
    #[must_use]
    pub fn since(&self) -> Option<DateTime<Utc>> {
        self.time_bound.resolve(Utc::now())
    }

    #[must_use]
    pub fn includes_platform(&self, platform: &str) -> bool {
        self.platforms
            .as_ref()
            .is_none_or(|set| set.contains(platform))
    }

    /// Case-insensitive OR match of the keywords against `text`.
    /// An empty keyword list matches everything.
    #[must_use]
    pub fn matches_keywords(&self, text: &str) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        let haystack = text.to_lowercase();
        self.keywords
            .iter()
            .any(|k| haystack.contains(&k.to_lowercase()))
    }

    #[must_use]
    pub fn is_within_bound(&self, created_at: DateTime<Utc>) -> bool {
        self.since().is_none_or(|since| created_at >= since)
    }
}
