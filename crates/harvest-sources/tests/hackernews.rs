//! Integration tests for `HackerNewsAdapter` using wiremock HTTP mocks.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures::StreamExt;
use harvest_core::{CollectionQuery, SourceError, TimeBound};
use harvest_sources::{HackerNewsAdapter, HttpSettings, RawItem, SourceAdapter};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn adapter(server: &MockServer) -> HackerNewsAdapter {
    let http = HttpSettings {
        timeout: Duration::from_secs(5),
        max_retries: 0,
        retry_backoff_base_secs: 0,
        ..HttpSettings::default()
    };
    HackerNewsAdapter::new(&http, Duration::ZERO)
        .expect("client construction should not fail")
        .with_base_url(server.uri())
}

fn hit(id: &str) -> Value {
    json!({
        "objectID": id,
        "title": format!("Story {id}"),
        "url": format!("https://example.com/{id}"),
        "author": "pg",
        "points": 100,
        "num_comments": 25,
        "created_at": "2024-05-01T12:00:00.000Z",
        "created_at_i": 1_714_564_800
    })
}

fn page(hits: Vec<Value>, nb_pages: u32) -> Value {
    json!({ "hits": hits, "nbPages": nb_pages, "page": 0, "hitsPerPage": 100 })
}

async fn collect(adapter: &HackerNewsAdapter, query: &CollectionQuery) -> Vec<Result<RawItem, SourceError>> {
    adapter.fetch(query, &CancellationToken::new()).collect().await
}

#[tokio::test]
async fn story_matching_two_keywords_is_yielded_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/search_by_date"))
        .and(query_param("query", "rust"))
        .and(query_param("tags", "story"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(vec![hit("1"), hit("2")], 1)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/search_by_date"))
        .and(query_param("query", "tokio"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(vec![hit("2"), hit("3")], 1)))
        .mount(&server)
        .await;

    let items = collect(&adapter(&server), &CollectionQuery::new(["rust", "tokio"])).await;
    let ids: Vec<Value> = items
        .into_iter()
        .map(|r| r.expect("item").get("id").cloned().expect("id"))
        .collect();
    assert_eq!(ids, vec![json!("1"), json!("2"), json!("3")]);
}

#[tokio::test]
async fn pages_until_nb_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("page", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(vec![hit("1")], 2)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(vec![hit("2")], 2)))
        .expect(1)
        .mount(&server)
        .await;

    let items = collect(&adapter(&server), &CollectionQuery::new(["rust"])).await;
    assert_eq!(items.len(), 2);
}

#[tokio::test]
async fn time_bound_becomes_numeric_filter() {
    let server = MockServer::start().await;
    let since = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    Mock::given(method("GET"))
        .and(query_param("numericFilters", format!("created_at_i>={}", since.timestamp())))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(vec![hit("1")], 1)))
        .expect(1)
        .mount(&server)
        .await;

    let query = CollectionQuery::new(["rust"]).with_time_bound(TimeBound::Since(since));
    let items = collect(&adapter(&server), &query).await;
    assert_eq!(items.len(), 1);
}

#[tokio::test]
async fn rate_limit_surfaces_as_retryable_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .expect(1)
        .mount(&server)
        .await;

    let items = collect(&adapter(&server), &CollectionQuery::new(["rust"])).await;
    assert_eq!(items.len(), 1);
    let err = items[0].as_ref().expect_err("error");
    assert_eq!(err.platform, "hackernews");
    assert!(err.retryable);
}

#[tokio::test]
async fn malformed_body_is_a_fatal_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let items = collect(&adapter(&server), &CollectionQuery::new(["rust"])).await;
    assert_eq!(items.len(), 1);
    assert!(!items[0].as_ref().expect_err("error").retryable);
}

/// Serves `total` hits the way Algolia does: page `p` holds the hits from
/// offset `p * hitsPerPage`.
struct OffsetPager {
    total: usize,
}

impl Respond for OffsetPager {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let param = |name: &str| {
            request
                .url
                .query_pairs()
                .find(|(k, _)| k == name)
                .and_then(|(_, v)| v.parse::<usize>().ok())
        };
        let per_page = param("hitsPerPage").unwrap_or(20);
        let page_no = param("page").unwrap_or(0);
        let start = (page_no * per_page).min(self.total);
        let end = (start + per_page).min(self.total);
        let hits: Vec<Value> = (start..end).map(|i| hit(&i.to_string())).collect();
        let nb_pages = self.total.div_ceil(per_page);
        ResponseTemplate::new(200).set_body_json(json!({
            "hits": hits,
            "nbPages": nb_pages,
            "page": page_no,
            "hitsPerPage": per_page
        }))
    }
}

#[tokio::test]
async fn cap_above_one_page_is_filled_without_rereading_hits() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/search_by_date"))
        .respond_with(OffsetPager { total: 1000 })
        .mount(&server)
        .await;

    let query = CollectionQuery::new(["rust"]).with_max_posts(120);
    let items = collect(&adapter(&server), &query).await;

    let ids: Vec<String> = items
        .into_iter()
        .map(|r| r.expect("item").get("id").and_then(Value::as_str).expect("id").to_string())
        .collect();
    let expected: Vec<String> = (0..120).map(|i| i.to_string()).collect();
    assert_eq!(ids, expected);

    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 2);
    assert!(requests
        .iter()
        .all(|r| r.url.query_pairs().any(|(k, v)| k == "hitsPerPage" && v == "100")));
}
