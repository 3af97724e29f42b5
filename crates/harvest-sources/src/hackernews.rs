//! Hacker News stories via the Algolia search API.

use std::collections::HashSet;
use std::time::Duration;

use async_stream::stream;
use futures::StreamExt;
use harvest_core::CollectionQuery;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::adapter::{ItemStream, SourceAdapter};
use crate::error::FetchError;
use crate::html::strip_html;
use crate::http::{HttpFetcher, HttpSettings};
use crate::raw::RawItem;

pub const PLATFORM: &str = "hackernews";

const DEFAULT_BASE_URL: &str = "https://hn.algolia.com";
const ITEM_URL: &str = "https://news.ycombinator.com/item?id=";
const MAX_HITS_PER_PAGE: usize = 100;
/// Algolia serves at most 1000 hits per query; this covers them at any page size.
const MAX_PAGES: u32 = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<Hit>,
    #[serde(default)]
    nb_pages: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Hit {
    #[serde(rename = "objectID")]
    object_id: Option<String>,
    title: Option<String>,
    url: Option<String>,
    author: Option<String>,
    points: Option<i64>,
    story_text: Option<String>,
    num_comments: Option<i64>,
    created_at: Option<String>,
    created_at_i: Option<i64>,
}

impl Hit {
    fn into_raw(self) -> RawItem {
        let hn_url = self.object_id.as_deref().map(|id| format!("{ITEM_URL}{id}"));
        let url = self
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| hn_url.clone());
        let created_at = self
            .created_at_i
            .map(Value::from)
            .or_else(|| self.created_at.map(Value::from));
        RawItem::new(PLATFORM)
            .with("id", self.object_id)
            .with("author", self.author)
            .with("title", self.title)
            .with("body", self.story_text.as_deref().map(strip_html))
            .with("created_at", created_at)
            .with("url", url)
            .with("likes", self.points)
            .with("comments", self.num_comments)
            .with_metadata([
                ("hn_url", Value::from(hn_url)),
                ("story_url", Value::from(self.url)),
            ])
    }
}

/// One `search_by_date` query per keyword (or a single unfiltered query),
/// stories only. A story matching several keywords is yielded once.
#[derive(Debug)]
pub struct HackerNewsAdapter {
    http: HttpFetcher,
    base_url: String,
}

impl HackerNewsAdapter {
    /// # Errors
    ///
    /// Returns [`FetchError::Http`] if the HTTP client cannot be built.
    pub fn new(http: &HttpSettings, request_delay: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            http: HttpFetcher::new(http, request_delay)?,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

impl SourceAdapter for HackerNewsAdapter {
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
            let url = format!("{}/api/v1/search_by_date", self.base_url);
            let terms: Vec<&str> = if query.keywords.is_empty() {
                vec![""]
            } else {
                query.keywords.iter().map(String::as_str).collect()
            };
            let numeric_filter = query
                .since()
                .map(|since| format!("created_at_i>={}", since.timestamp()));

            let mut seen: HashSet<String> = HashSet::new();
            let mut yielded = 0usize;

            'terms: for term in terms {
                // Algolia pages by offset `page * hitsPerPage`, so the page
                // size must not change between pages of one term.
                let hits_per_page = (max - yielded).clamp(1, MAX_HITS_PER_PAGE);
                for page in 0..MAX_PAGES {
                    if cancel.is_cancelled() || yielded >= max {
                        break 'terms;
                    }

                    let mut params = vec![
                        ("query", term.to_string()),
                        ("tags", "story".to_string()),
                        ("hitsPerPage", hits_per_page.to_string()),
                        ("page", page.to_string()),
                    ];
                    if let Some(filter) = &numeric_filter {
                        params.push(("numericFilters", filter.clone()));
                    }

                    let response: SearchResponse = match self.http.get_json(&url, &params, cancel).await {
                        Ok(response) => response,
                        Err(FetchError::Cancelled) => break 'terms,
                        Err(e) => {
                            yield Err(e.into_source_error(PLATFORM));
                            break 'terms;
                        }
                    };

                    let received = response.hits.len();
                    for hit in response.hits {
                        if let Some(id) = &hit.object_id {
                            if !seen.insert(id.clone()) {
                                continue;
                            }
                        }
                        yield Ok(hit.into_raw());
                        yielded += 1;
                        if yielded >= max {
                            break 'terms;
                        }
                    }
                    tracing::debug!(platform = PLATFORM, term, page, received, yielded, "fetched search page");

                    if received == 0 || page + 1 >= response.nb_pages {
                        break;
                    }
                }
            }
        }
        .boxed()
    }
}
