use std::sync::Arc;

use harvest_core::{CollectorSettings, ConfigError};

use crate::adapter::SourceAdapter;
use crate::discourse::DiscourseAdapter;
use crate::error::FetchError;
use crate::hackernews::HackerNewsAdapter;
use crate::http::HttpSettings;
use crate::reddit::RedditAdapter;
use crate::rss::RssAdapter;
use crate::web::WebAdapter;
use crate::{discourse, hackernews, reddit, rss, web};

type AdapterFactory =
    fn(&CollectorSettings, &HttpSettings) -> Result<Arc<dyn SourceAdapter>, FetchError>;

fn reddit_adapter(
    settings: &CollectorSettings,
    http: &HttpSettings,
) -> Result<Arc<dyn SourceAdapter>, FetchError> {
    let adapter = RedditAdapter::new(
        http,
        settings.request_delay(reddit::PLATFORM),
        settings.reddit.subreddits.clone(),
    )?;
    Ok(Arc::new(adapter))
}

fn hackernews_adapter(
    settings: &CollectorSettings,
    http: &HttpSettings,
) -> Result<Arc<dyn SourceAdapter>, FetchError> {
    let adapter = HackerNewsAdapter::new(http, settings.request_delay(hackernews::PLATFORM))?;
    Ok(Arc::new(adapter))
}

fn discourse_adapter(
    settings: &CollectorSettings,
    http: &HttpSettings,
) -> Result<Arc<dyn SourceAdapter>, FetchError> {
    let adapter = DiscourseAdapter::new(
        http,
        settings.request_delay(discourse::PLATFORM),
        settings.discourse.forums.clone(),
    )?;
    Ok(Arc::new(adapter))
}

fn rss_adapter(
    settings: &CollectorSettings,
    http: &HttpSettings,
) -> Result<Arc<dyn SourceAdapter>, FetchError> {
    let adapter = RssAdapter::new(
        http,
        settings.request_delay(rss::PLATFORM),
        settings.rss.feeds.clone(),
    )?;
    Ok(Arc::new(adapter))
}

fn web_adapter(
    settings: &CollectorSettings,
    http: &HttpSettings,
) -> Result<Arc<dyn SourceAdapter>, FetchError> {
    let adapter = WebAdapter::new(
        http,
        settings.request_delay(web::PLATFORM),
        settings.web.pages.clone(),
        &settings.web.selectors,
    )?;
    Ok(Arc::new(adapter))
}

const FACTORIES: &[(&str, AdapterFactory)] = &[
    (reddit::PLATFORM, reddit_adapter),
    (hackernews::PLATFORM, hackernews_adapter),
    (discourse::PLATFORM, discourse_adapter),
    (rss::PLATFORM, rss_adapter),
    (web::PLATFORM, web_adapter),
];

/// Instantiate one adapter per enabled platform, in `settings.platforms`
/// order.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] for a platform with no adapter, or if
/// an adapter's HTTP client cannot be built.
pub fn build_adapters(
    settings: &CollectorSettings,
    http: &HttpSettings,
) -> Result<Vec<Arc<dyn SourceAdapter>>, ConfigError> {
    settings
        .platforms
        .iter()
        .map(|name| {
            let (_, factory) = FACTORIES
                .iter()
                .find(|(platform, _)| *platform == name.as_str())
                .ok_or_else(|| ConfigError::Validation(format!("no adapter for platform '{name}'")))?;
            factory(settings, http).map_err(|e| {
                ConfigError::Validation(format!("failed to build {name} adapter: {e}"))
            })
        })
        .collect()
}
