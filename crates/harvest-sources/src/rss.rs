//! RSS 1/2, Atom and JSON Feed sources, parsed with `feed-rs`.

use std::time::Duration;

use async_stream::stream;
use feed_rs::model::{Entry, Feed, Link, Text};
use futures::StreamExt;
use harvest_core::{CollectionQuery, SourceError};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::adapter::{ItemStream, SourceAdapter};
use crate::error::FetchError;
use crate::html::strip_html;
use crate::http::{HttpFetcher, HttpSettings};
use crate::raw::RawItem;

pub const PLATFORM: &str = "rss";

/// Id for entries that carry no `guid`/`id`: SHA-256 of the first link.
#[allow(clippy::ref_option)]
fn link_digest(links: &[Link], _title: &Option<Text>, _uri: Option<&str>) -> String {
    links
        .first()
        .map(|l| format!("{:x}", Sha256::digest(l.href.as_bytes())))
        .unwrap_or_default()
}

fn parse_feed(bytes: &[u8]) -> Result<Feed, feed_rs::parser::ParseFeedError> {
    feed_rs::parser::Builder::new()
        .id_generator(link_digest)
        .build()
        .parse(bytes)
}

fn entry_text(entry: &Entry) -> String {
    let title = entry.title.as_ref().map(|t| strip_html(&t.content));
    let body = entry
        .summary
        .as_ref()
        .map(|s| s.content.as_str())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.as_deref()))
        .map(strip_html);
    [title, body]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn entry_to_raw(entry: Entry, feed_url: &str, feed_title: Option<&str>) -> RawItem {
    let content = entry_text(&entry);
    let created_at = entry
        .published
        .or(entry.updated)
        .map(|at| at.to_rfc3339());
    let tags: Vec<String> = entry.categories.into_iter().map(|c| c.term).collect();
    RawItem::new(PLATFORM)
        .with("id", entry.id)
        .with("author", entry.authors.into_iter().next().map(|p| p.name))
        .with("content", content)
        .with("created_at", created_at)
        .with("url", entry.links.into_iter().next().map(|l| l.href))
        .with("tags", tags)
        .with_metadata([
            ("feed_url", Value::from(feed_url)),
            ("feed_title", Value::from(feed_title)),
        ])
}

/// Reads every configured feed in order. Feeds are not searchable, so
/// entries are matched against the keywords and the time bound locally.
#[derive(Debug)]
pub struct RssAdapter {
    http: HttpFetcher,
    feeds: Vec<String>,
}

impl RssAdapter {
    /// # Errors
    ///
    /// Returns [`FetchError::Http`] if the HTTP client cannot be built.
    pub fn new(
        http: &HttpSettings,
        request_delay: Duration,
        feeds: Vec<String>,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            http: HttpFetcher::new(http, request_delay)?,
            feeds,
        })
    }
}

impl SourceAdapter for RssAdapter {
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

            for feed_url in &self.feeds {
                if cancel.is_cancelled() || yielded >= max {
                    break;
                }

                let bytes = match self.http.get_bytes(feed_url, &[], cancel).await {
                    Ok(bytes) => bytes,
                    Err(FetchError::Cancelled) => break,
                    Err(e) => {
                        tracing::warn!(platform = PLATFORM, feed_url = %feed_url, error = %e, "feed fetch failed");
                        yield Err(e.into_source_error(PLATFORM));
                        continue;
                    }
                };

                let feed = match parse_feed(&bytes) {
                    Ok(feed) => feed,
                    Err(e) => {
                        tracing::warn!(platform = PLATFORM, feed_url = %feed_url, error = %e, "feed parse failed");
                        yield Err(SourceError::fatal(PLATFORM, format!("{feed_url}: {e}")));
                        continue;
                    }
                };

                let feed_title = feed.title.as_ref().map(|t| strip_html(&t.content));
                let entries = feed.entries.len();
                for entry in feed.entries {
                    let created = entry.published.or(entry.updated);
                    if created.is_some_and(|at| !query.is_within_bound(at)) {
                        continue;
                    }
                    if !query.matches_keywords(&entry_text(&entry)) {
                        continue;
                    }
                    yield Ok(entry_to_raw(entry, feed_url, feed_title.as_deref()));
                    yielded += 1;
                    if yielded >= max {
                        break;
                    }
                }
                tracing::debug!(platform = PLATFORM, feed_url = %feed_url, entries, yielded, "read feed");
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Example &amp; Co</title>
  <link>https://example.com</link>
  <description>x</description>
  <item>
    <title>With guid</title>
    <guid>urn:example:1</guid>
    <link>https://example.com/1</link>
    <category>rust</category>
    <description>&lt;p&gt;Hello &lt;b&gt;world&lt;/b&gt;&lt;/p&gt;</description>
    <pubDate>Wed, 01 May 2024 12:00:00 GMT</pubDate>
  </item>
  <item>
    <title>Without guid</title>
    <link>https://example.com/2</link>
  </item>
</channel></rss>"#;

    #[test]
    fn entries_without_guid_use_link_digest() {
        let feed = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(feed.entries[0].id, "urn:example:1");
        let expected = format!("{:x}", Sha256::digest(b"https://example.com/2"));
        assert_eq!(feed.entries[1].id, expected);
    }

    #[test]
    fn maps_entry_to_raw_item() {
        let feed = parse_feed(RSS.as_bytes()).unwrap();
        let entry = feed.entries.into_iter().next().unwrap();
        let raw = entry_to_raw(entry, "https://example.com/feed", Some("Example & Co"));
        assert_eq!(raw.get("content"), Some(&json!("With guid\n\nHello world")));
        assert_eq!(raw.get("url"), Some(&json!("https://example.com/1")));
        assert_eq!(raw.get("tags"), Some(&json!(["rust"])));
        assert_eq!(raw.get("created_at"), Some(&json!("2024-05-01T12:00:00+00:00")));
        assert_eq!(
            raw.get("metadata"),
            Some(&json!({"feed_url": "https://example.com/feed", "feed_title": "Example & Co"}))
        );
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse_feed(b"definitely not a feed").is_err());
    }
}
