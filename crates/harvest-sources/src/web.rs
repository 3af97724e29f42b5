//! Generic HTML page scraping for forums without an API.
//!
//! Each configured page is fetched and parsed with `scraper`. The first
//! selector that matches anything on the page picks the post elements; each
//! element's text becomes a post and its first link becomes the post URL.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use async_stream::stream;
use futures::StreamExt;
use harvest_core::{CollectionQuery, SourceError};
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::adapter::{ItemStream, SourceAdapter};
use crate::error::FetchError;
use crate::http::{HttpFetcher, HttpSettings};
use crate::raw::RawItem;

pub const PLATFORM: &str = "web";

/// Common forum markup, used when no selectors are configured.
pub const DEFAULT_SELECTORS: [&str; 6] = [
    "article",
    ".post",
    ".topic",
    ".thread",
    "tr[id*=\"post\"]",
    "div[id*=\"post\"]",
];

/// Elements with less text than this are navigation or chrome.
const MIN_TEXT_CHARS: usize = 10;

static ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid anchor selector"));

fn element_text(element: &ElementRef<'_>) -> String {
    element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

/// First navigable link inside `element`, resolved against the page.
fn element_link(element: &ElementRef<'_>, page_url: &Url) -> Option<Url> {
    element
        .select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty() && !href.starts_with('#') && !href.starts_with("javascript:"))
        .find_map(|href| {
            page_url
                .join(href)
                .ok()
                .filter(|url| matches!(url.scheme(), "http" | "https"))
        })
}

/// Stable across runs: the page plus the element's link, or its text when
/// the element links nowhere.
fn post_id(page_url: &Url, link: Option<&Url>, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(page_url.as_str().as_bytes());
    hasher.update(b"\n");
    match link {
        Some(link) => hasher.update(link.as_str().as_bytes()),
        None => hasher.update(text.as_bytes()),
    }
    format!("{:x}", hasher.finalize())
}

/// Parse `html` and turn the first matching selector's elements into items.
/// Kept synchronous: the parsed document is not `Send`.
fn extract_items(html: &str, page_url: &Url, selectors: &[Selector]) -> Vec<RawItem> {
    let document = Html::parse_document(html);
    let elements: Vec<ElementRef<'_>> = selectors
        .iter()
        .map(|selector| document.select(selector).collect::<Vec<_>>())
        .find(|found| !found.is_empty())
        .unwrap_or_default();

    let host = page_url.host_str().unwrap_or_default().to_string();
    let mut seen = HashSet::new();
    let mut items = Vec::with_capacity(elements.len());
    for element in elements {
        let text = element_text(&element);
        if text.chars().count() < MIN_TEXT_CHARS {
            continue;
        }
        let link = element_link(&element, page_url);
        let id = post_id(page_url, link.as_ref(), &text);
        if !seen.insert(id.clone()) {
            continue;
        }
        items.push(
            RawItem::new(PLATFORM)
                .with("id", id)
                .with("content", text)
                .with("url", link.map(String::from))
                .with("tags", vec![host.clone()])
                .with_metadata([
                    ("page_url", Value::from(page_url.as_str())),
                    ("host", Value::from(host.as_str())),
                ]),
        );
    }
    items
}

fn parse_selectors(selectors: &[String]) -> Result<Vec<Selector>, FetchError> {
    let configured: Vec<&str> = if selectors.is_empty() {
        DEFAULT_SELECTORS.to_vec()
    } else {
        selectors.iter().map(String::as_str).collect()
    };
    configured
        .into_iter()
        .map(|css| {
            Selector::parse(css).map_err(|e| FetchError::InvalidSelector {
                selector: css.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Scrapes every configured page in order. Pages carry no dates, so the
/// time bound does not apply and posts are stamped when observed.
#[derive(Debug)]
pub struct WebAdapter {
    http: HttpFetcher,
    pages: Vec<String>,
    selectors: Vec<Selector>,
}

impl WebAdapter {
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidSelector`] if a selector is not valid CSS,
    /// or [`FetchError::Http`] if the HTTP client cannot be built.
    pub fn new(
        http: &HttpSettings,
        request_delay: Duration,
        pages: Vec<String>,
        selectors: &[String],
    ) -> Result<Self, FetchError> {
        Ok(Self {
            selectors: parse_selectors(selectors)?,
            http: HttpFetcher::new(http, request_delay)?,
            pages,
        })
    }
}

impl SourceAdapter for WebAdapter {
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
            let mut yielded = 0usize;

            for page in &self.pages {
                if cancel.is_cancelled() || yielded >= max {
                    break;
                }

                let page_url = match Url::parse(page) {
                    Ok(url) => url,
                    Err(e) => {
                        tracing::warn!(platform = PLATFORM, page = %page, error = %e, "invalid page url");
                        yield Err(SourceError::fatal(PLATFORM, format!("{page}: {e}")));
                        continue;
                    }
                };

                let bytes = match self.http.get_bytes(page_url.as_str(), &[], cancel).await {
                    Ok(bytes) => bytes,
                    Err(FetchError::Cancelled) => break,
                    Err(e) => {
                        tracing::warn!(platform = PLATFORM, page = %page_url, error = %e, "page fetch failed");
                        yield Err(e.into_source_error(PLATFORM));
                        continue;
                    }
                };

                let items = extract_items(&String::from_utf8_lossy(&bytes), &page_url, &self.selectors);
                let found = items.len();
                for item in items {
                    let matches = item
                        .get("content")
                        .and_then(Value::as_str)
                        .is_some_and(|text| query.matches_keywords(text));
                    if !matches {
                        continue;
                    }
                    yield Ok(item);
                    yielded += 1;
                    if yielded >= max {
                        break;
                    }
                }
                tracing::debug!(platform = PLATFORM, page = %page_url, found, yielded, "scraped page");
            }
        }
        .boxed()
    }
}
