//! Discourse forums via the public `latest.json` topic list.
//!
//! Discourse has no cross-forum search endpoint usable without an API key,
//! so topics are listed newest-bumped first and matched against the
//! keywords locally. A failing forum is reported and the next one is tried.

use std::collections::HashMap;
use std::time::Duration;

use async_stream::stream;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use harvest_core::{CollectionQuery, SourceError};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::adapter::{ItemStream, SourceAdapter};
use crate::error::FetchError;
use crate::html::strip_html;
use crate::http::{HttpFetcher, HttpSettings};
use crate::raw::RawItem;

pub const PLATFORM: &str = "discourse";

const MAX_PAGES: u32 = 5;

#[derive(Debug, Deserialize)]
struct LatestResponse {
    #[serde(default)]
    users: Vec<User>,
    topic_list: TopicList,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    username: String,
}

#[derive(Debug, Deserialize)]
struct TopicList {
    #[serde(default)]
    topics: Vec<Topic>,
    more_topics_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Topic {
    id: Option<i64>,
    title: Option<String>,
    slug: Option<String>,
    created_at: Option<String>,
    excerpt: Option<String>,
    like_count: Option<i64>,
    posts_count: Option<i64>,
    views: Option<i64>,
    category_id: Option<i64>,
    tags: Vec<Value>,
    posters: Vec<Poster>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Poster {
    user_id: Option<i64>,
    description: Option<String>,
}

impl Topic {
    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|at| at.with_timezone(&Utc))
    }

    /// Title and stripped excerpt, the text keywords are matched against.
    fn text(&self) -> String {
        [
            self.title.clone(),
            self.excerpt.as_deref().map(strip_html),
        ]
        .into_iter()
        .flatten()
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
    }

    fn author<'u>(&self, users: &'u HashMap<i64, String>) -> Option<&'u str> {
        let original = self
            .posters
            .iter()
            .find(|p| {
                p.description
                    .as_deref()
                    .is_some_and(|d| d.contains("Original Poster"))
            })
            .or_else(|| self.posters.first())?;
        users.get(&original.user_id?).map(String::as_str)
    }

    fn tag_names(&self) -> Vec<String> {
        self.tags
            .iter()
            .filter_map(|tag| match tag {
                Value::String(s) => Some(s.clone()),
                Value::Object(obj) => obj.get("name").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect()
    }

    fn into_raw(self, forum: &str, host: &str, users: &HashMap<i64, String>) -> RawItem {
        let content = self.text();
        let author = self.author(users).map(str::to_string);
        let tags = self.tag_names();
        let source_id = self.id.map(|id| format!("{host}:{id}"));
        let url = self.id.map(|id| {
            let slug = self.slug.as_deref().unwrap_or("topic");
            format!("{forum}/t/{slug}/{id}")
        });
        let replies = self.posts_count.map(|n| (n - 1).max(0));
        RawItem::new(PLATFORM)
            .with("id", source_id)
            .with("author", author)
            .with("content", content)
            .with("created_at", self.created_at)
            .with("url", url)
            .with("likes", self.like_count)
            .with("comments", replies)
            .with("tags", tags)
            .with_metadata([
                ("forum", Value::from(forum)),
                ("category_id", Value::from(self.category_id)),
                ("views", Value::from(self.views)),
                ("posts_count", Value::from(self.posts_count)),
            ])
    }
}

/// `host` or `host:port`, used to keep topic ids unique across forums.
fn forum_host(forum: &str) -> Option<String> {
    let url = Url::parse(forum).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

#[derive(Debug)]
pub struct DiscourseAdapter {
    http: HttpFetcher,
    forums: Vec<String>,
}

impl DiscourseAdapter {
    /// # Errors
    ///
    /// Returns [`FetchError::Http`] if the HTTP client cannot be built.
    pub fn new(
        http: &HttpSettings,
        request_delay: Duration,
        forums: Vec<String>,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            http: HttpFetcher::new(http, request_delay)?,
            forums: forums
                .into_iter()
                .map(|f| f.trim_end_matches('/').to_string())
                .collect(),
        })
    }

    #[must_use]
    pub fn forums(&self) -> &[String] {
        &self.forums
    }
}

impl SourceAdapter for DiscourseAdapter {
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

            'forums: for forum in &self.forums {
                let Some(host) = forum_host(forum) else {
                    yield Err(SourceError::fatal(PLATFORM, format!("invalid forum url '{forum}'")));
                    continue;
                };
                let url = format!("{forum}/latest.json");

                for page in 0..MAX_PAGES {
                    if cancel.is_cancelled() || yielded >= max {
                        break 'forums;
                    }

                    let params = [("page", page.to_string())];
                    let response: LatestResponse = match self.http.get_json(&url, &params, cancel).await {
                        Ok(response) => response,
                        Err(FetchError::Cancelled) => break 'forums,
                        Err(e) => {
                            tracing::warn!(platform = PLATFORM, forum = %forum, error = %e, "forum fetch failed");
                            yield Err(e.into_source_error(PLATFORM));
                            continue 'forums;
                        }
                    };

                    let users: HashMap<i64, String> = response
                        .users
                        .into_iter()
                        .map(|u| (u.id, u.username))
                        .collect();
                    let received = response.topic_list.topics.len();

                    for topic in response.topic_list.topics {
                        if topic.created_at().is_some_and(|at| !query.is_within_bound(at)) {
                            continue;
                        }
                        if !query.matches_keywords(&topic.text()) {
                            continue;
                        }
                        yield Ok(topic.into_raw(forum, &host, &users));
                        yielded += 1;
                        if yielded >= max {
                            break 'forums;
                        }
                    }
                    tracing::debug!(platform = PLATFORM, forum = %forum, page, received, yielded, "fetched topic page");

                    if received == 0 || response.topic_list.more_topics_url.is_none() {
                        break;
                    }
                }
            }
        }
        .boxed()
    }
}
