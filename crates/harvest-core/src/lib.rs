//! Shared data model and configuration for the harvest collector.
//!
//! Everything here is free of I/O except configuration loading: the
//! canonical [`Post`], the [`CollectionQuery`] a run is driven by, the
//! [`RunStats`] it reports, the [`ContentFilter`] rules, and the error types
//! that cross crate boundaries.

pub mod app_config;
pub mod config;
pub mod error;
pub mod filter;
pub mod posts;
pub mod query;
pub mod run_stats;
pub mod settings;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use error::{ConfigError, SourceError};
pub use filter::{ContentFilter, FilterRejection};
pub use posts::{Engagement, Post};
pub use query::{CollectionQuery, TimeBound};
pub use run_stats::{PlatformStats, RunOutcome, RunStats, SubRunStatus};
pub use settings::{
    load_collector_settings, CollectorSettings, DiscourseSettings, RedditSettings, RssSettings,
    WebSettings, KNOWN_EXPORT_FORMATS, KNOWN_PLATFORMS,
};
