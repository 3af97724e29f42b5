//! Collector settings loaded from `config/sources.yaml`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

pub const KNOWN_EXPORT_FORMATS: [&str; 4] = ["json", "jsonl", "csv", "xlsx"];

/// Platforms with a built-in adapter.
pub const KNOWN_PLATFORMS: [&str; 5] = ["reddit", "hackernews", "discourse", "rss", "web"];

const DEFAULT_MAX_POSTS: usize = 100;
const DEFAULT_TIME_RANGE_HOURS: u32 = 24;
const DEFAULT_MIN_CONTENT_LENGTH: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedditSettings {
    /// Restrict searches to these subreddits; empty searches all of reddit.
    pub subreddits: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscourseSettings {
    /// Base URLs of the Discourse forums to poll.
    pub forums: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RssSettings {
    /// RSS or Atom feed URLs.
    pub feeds: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebSettings {
    /// HTML pages to scrape on every run.
    pub pages: Vec<String>,
    /// CSS selectors for post elements, tried in order until one matches.
    /// Empty means the built-in forum selectors.
    pub selectors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorSettings {
    pub platforms: BTreeSet<String>,
    pub default_max_posts: usize,
    pub default_time_range_hours: u32,
    /// Minimum delay between outbound requests, per platform.
    pub request_delay_seconds: BTreeMap<String, f64>,
    pub blocked_keywords: BTreeSet<String>,
    pub blocked_authors: BTreeSet<String>,
    pub export_formats: BTreeSet<String>,
    pub min_content_length: usize,
    pub max_content_length: Option<usize>,
    pub reddit: RedditSettings,
    pub discourse: DiscourseSettings,
    pub rss: RssSettings,
    pub web: WebSettings,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            platforms: ["reddit", "hackernews"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            default_max_posts: DEFAULT_MAX_POSTS,
            default_time_range_hours: DEFAULT_TIME_RANGE_HOURS,
            request_delay_seconds: BTreeMap::new(),
            blocked_keywords: BTreeSet::new(),
            blocked_authors: BTreeSet::new(),
            export_formats: KNOWN_EXPORT_FORMATS
                .into_iter()
                .map(str::to_string)
                .collect(),
            min_content_length: DEFAULT_MIN_CONTENT_LENGTH,
            max_content_length: None,
            reddit: RedditSettings::default(),
            discourse: DiscourseSettings::default(),
            rss: RssSettings::default(),
            web: WebSettings::default(),
        }
    }
}

impl CollectorSettings {
    /// Configured pacing delay for `platform`, zero when unset.
    #[must_use]
    pub fn request_delay(&self, platform: &str) -> Duration {
        self.request_delay_seconds
            .get(platform)
            .map_or(Duration::ZERO, |secs| Duration::from_secs_f64(*secs))
    }

    #[must_use]
    pub fn is_enabled(&self, platform: &str) -> bool {
        self.platforms.contains(platform)
    }

    #[must_use]
    pub fn allows_export_format(&self, format: &str) -> bool {
        self.export_formats.contains(format)
    }

    /// Validate value ranges and cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.platforms.is_empty() {
            return Err(ConfigError::Validation(
                "at least one platform must be enabled".to_string(),
            ));
        }
        if let Some(unknown) = self
            .platforms
            .iter()
            .find(|p| !KNOWN_PLATFORMS.contains(&p.as_str()))
        {
            return Err(ConfigError::Validation(format!(
                "unknown platform '{unknown}'; expected one of {}",
                KNOWN_PLATFORMS.join(", ")
            )));
        }
        if self.default_max_posts == 0 {
            return Err(ConfigError::Validation(
                "default_max_posts must be greater than 0".to_string(),
            ));
        }
        if self.default_time_range_hours == 0 {
            return Err(ConfigError::Validation(
                "default_time_range_hours must be greater than 0".to_string(),
            ));
        }
        for (platform, delay) in &self.request_delay_seconds {
            if !delay.is_finite() || *delay < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "request_delay_seconds for '{platform}' must be a non-negative number, got {delay}"
                )));
            }
        }
        if let Some(max) = self.max_content_length {
            if max < self.min_content_length {
                return Err(ConfigError::Validation(format!(
                    "max_content_length {max} is below min_content_length {}",
                    self.min_content_length
                )));
            }
        }
        if self.export_formats.is_empty() {
            return Err(ConfigError::Validation(
                "export_formats must list at least one format".to_string(),
            ));
        }
        if let Some(unknown) = self
            .export_formats
            .iter()
            .find(|f| !KNOWN_EXPORT_FORMATS.contains(&f.as_str()))
        {
            return Err(ConfigError::Validation(format!(
                "unknown export format '{unknown}'; expected one of {}",
                KNOWN_EXPORT_FORMATS.join(", ")
            )));
        }
        if self.is_enabled("discourse") && self.discourse.forums.is_empty() {
            return Err(ConfigError::Validation(
                "discourse is enabled but discourse.forums is empty".to_string(),
            ));
        }
        if self.is_enabled("rss") && self.rss.feeds.is_empty() {
            return Err(ConfigError::Validation(
                "rss is enabled but rss.feeds is empty".to_string(),
            ));
        }
        if self.is_enabled("web") && self.web.pages.is_empty() {
            return Err(ConfigError::Validation(
                "web is enabled but web.pages is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load and validate collector settings from a YAML file.
///
/// When `required` is `false` and the file does not exist, validated
/// defaults are returned instead.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_collector_settings(path: &Path, required: bool) -> Result<CollectorSettings, ConfigError> {
    if !required && !path.exists() {
        let settings = CollectorSettings::default();
        settings.validate()?;
        return Ok(settings);
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::SettingsFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let settings: CollectorSettings = serde_yaml::from_str(&content)?;
    settings.validate()?;
    Ok(settings)
}
