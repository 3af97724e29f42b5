//! Reddit public JSON search (no OAuth).

use std::time::Duration;

use async_stream::stream;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use harvest_core::CollectionQuery;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::adapter::{ItemStream, SourceAdapter};
use crate::error::FetchError;
use crate::http::{HttpFetcher, HttpSettings};
use crate::normalize::timestamp_from_secs;
use crate::raw::RawItem;

pub const PLATFORM: &str = "reddit";

const DEFAULT_BASE_URL: &str = "https://www.reddit.com";
/// Permalinks are relative; stored URLs always point at the public site.
const PERMALINK_ORIGIN: &str = "https://www.reddit.com";
const MAX_PAGE_SIZE: usize = 100;
const MAX_PAGES: usize = 10;

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: PostData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PostData {
    id: Option<String>,
    author: Option<String>,
    title: Option<String>,
    selftext: Option<String>,
    created_utc: Option<f64>,
    permalink: Option<String>,
    score: Option<i64>,
    num_comments: Option<i64>,
    num_crossposts: Option<i64>,
    subreddit: Option<String>,
    upvote_ratio: Option<f64>,
    gilded: Option<i64>,
    over_18: Option<bool>,
}

impl PostData {
    /// Same conversion the normalizer applies to `created_at`.
    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_utc.and_then(timestamp_from_secs)
    }

    fn into_raw(self) -> RawItem {
        let url = self
            .permalink
            .as_deref()
            .map(|p| format!("{PERMALINK_ORIGIN}{p}"));
        RawItem::new(PLATFORM)
            .with("id", self.id)
            .with("author", self.author)
            .with("title", self.title)
            .with("body", self.selftext)
            .with("created_at", self.created_utc)
            .with("url", url)
            .with("likes", self.score)
            .with("comments", self.num_comments)
            .with("shares", self.num_crossposts)
            .with("tags", self.subreddit.clone().map(|s| vec![s]))
            .with_metadata([
                ("subreddit", Value::from(self.subreddit)),
                ("upvote_ratio", Value::from(self.upvote_ratio)),
                ("gilded", Value::from(self.gilded)),
                ("over_18", Value::from(self.over_18)),
            ])
    }
}

/// Searches `/search.json` (or `/r/{subs}/search.json` restricted to the
/// configured subreddits), newest first, following the `after` cursor.
/// Keywords are OR-joined into one query; with no keywords the `new`
/// listing is read instead.
#[derive(Debug)]
pub struct RedditAdapter {
    http: HttpFetcher,
    base_url: String,
    subreddits: Vec<String>,
}

impl RedditAdapter {
    /// # Errors
    ///
    /// Returns [`FetchError::Http`] if the HTTP client cannot be built.
    pub fn new(
        http: &HttpSettings,
        request_delay: Duration,
        subreddits: Vec<String>,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            http: HttpFetcher::new(http, request_delay)?,
            base_url: DEFAULT_BASE_URL.to_string(),
            subreddits,
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn listing_request(&self, query: &CollectionQuery) -> (String, Vec<(&'static str, String)>) {
        let scope = if self.subreddits.is_empty() {
            String::new()
        } else {
            format!("/r/{}", self.subreddits.join("+"))
        };

        if query.keywords.is_empty() {
            let url = format!("{}{scope}/new.json", self.base_url);
            return (url, vec![("raw_json", "1".to_string())]);
        }

        let mut params = vec![
            ("q", or_query(&query.keywords)),
            ("sort", "new".to_string()),
            ("raw_json", "1".to_string()),
        ];
        if !self.subreddits.is_empty() {
            params.push(("restrict_sr", "on".to_string()));
        }
        (format!("{}{scope}/search.json", self.base_url), params)
    }
}

/// `a OR "two words" OR c`
fn or_query(keywords: &[String]) -> String {
    keywords
        .iter()
        .map(|k| {
            if k.contains(char::is_whitespace) {
                format!("\"{k}\"")
            } else {
                k.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

impl SourceAdapter for RedditAdapter {
    fn platform_name(&self) -> &str {
        PLATFORM
    }

    fn fetch<'a>(
        &'a self,
        query: &'a CollectionQuery,
        cancel: &'a CancellationToken,
    ) -> ItemStream<'a> {
        stream! {
            let max = query.max_posts_per_source;
            let since = query.since();
            let (url, params) = self.listing_request(query);
            let mut after: Option<String> = None;
            let mut yielded = 0usize;

            for page in 0..MAX_PAGES {
                if cancel.is_cancelled() || yielded >= max {
                    break;
                }

                let mut page_params = params.clone();
                page_params.push(("limit", (max - yielded).min(MAX_PAGE_SIZE).to_string()));
                if let Some(cursor) = &after {
                    page_params.push(("after", cursor.clone()));
                }

                let listing: Listing = match self.http.get_json(&url, &page_params, cancel).await {
                    Ok(listing) => listing,
                    Err(FetchError::Cancelled) => break,
                    Err(e) => {
                        yield Err(e.into_source_error(PLATFORM));
                        break;
                    }
                };

                let received = listing.data.children.len();
                let mut reached_bound = false;
                for child in listing.data.children {
                    if let (Some(since), Some(created)) = (since, child.data.created_at()) {
                        if created < since {
                            reached_bound = true;
                            continue;
                        }
                    }
                    yield Ok(child.data.into_raw());
                    yielded += 1;
                    if yielded >= max {
                        break;
                    }
                }
                tracing::debug!(platform = PLATFORM, page, received, yielded, "fetched listing page");

                after = listing.data.after;
                if after.is_none() || received == 0 || reached_bound {
                    break;
                }
            }
        }
        .boxed()
    }
}
