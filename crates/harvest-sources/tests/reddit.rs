//! Integration tests for `RedditAdapter` using wiremock HTTP mocks.

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use futures::StreamExt;
use harvest_core::{CollectionQuery, SourceError, TimeBound};
use harvest_sources::{HttpSettings, RawItem, RedditAdapter, SourceAdapter};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn http_settings() -> HttpSettings {
    HttpSettings {
        timeout: Duration::from_secs(5),
        max_retries: 0,
        retry_backoff_base_secs: 0,
        ..HttpSettings::default()
    }
}

fn adapter(server: &MockServer, subreddits: &[&str]) -> RedditAdapter {
    RedditAdapter::new(
        &http_settings(),
        Duration::ZERO,
        subreddits.iter().map(|s| (*s).to_string()).collect(),
    )
    .expect("client construction should not fail")
    .with_base_url(server.uri())
}

fn post(id: &str, created_utc: i64) -> Value {
    json!({
        "kind": "t3",
        "data": {
            "id": id,
            "author": "ferris",
            "title": format!("Post {id}"),
            "selftext": "body text",
            "created_utc": created_utc,
            "permalink": format!("/r/rust/comments/{id}/post/"),
            "score": 10,
            "num_comments": 3,
            "num_crossposts": 1,
            "subreddit": "rust",
            "upvote_ratio": 0.9,
            "over_18": false
        }
    })
}

fn listing(children: Vec<Value>, after: Option<&str>) -> Value {
    json!({ "kind": "Listing", "data": { "children": children, "after": after } })
}

async fn collect(
    adapter: &RedditAdapter,
    query: &CollectionQuery,
    cancel: &CancellationToken,
) -> Vec<Result<RawItem, SourceError>> {
    adapter.fetch(query, cancel).collect().await
}

#[tokio::test]
async fn follows_after_cursor_across_pages() {
    let server = MockServer::start().await;
    let now = Utc::now().timestamp();

    Mock::given(method("GET"))
        .and(path("/search.json"))
        .and(query_param("after", "t3_b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(vec![post("c", now - 30)], None)))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search.json"))
        .and(query_param("q", "rust OR tokio"))
        .and(query_param("sort", "new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(
            vec![post("a", now - 10), post("b", now - 20)],
            Some("t3_b"),
        )))
        .mount(&server)
        .await;

    let adapter = adapter(&server, &[]);
    let items = collect(&adapter, &CollectionQuery::new(["rust", "tokio"]), &CancellationToken::new()).await;

    let ids: Vec<Value> = items
        .into_iter()
        .map(|r| r.expect("item").get("id").cloned().expect("id"))
        .collect();
    assert_eq!(ids, vec![json!("a"), json!("b"), json!("c")]);
}

#[tokio::test]
async fn maps_listing_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r/rust/search.json"))
        .and(query_param("restrict_sr", "on"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(vec![post("a", 1_714_564_800)], None)))
        .mount(&server)
        .await;

    let adapter = adapter(&server, &["rust"]);
    let items = collect(&adapter, &CollectionQuery::new(["ferris"]), &CancellationToken::new()).await;
    let item = items.into_iter().next().expect("one item").expect("ok");

    assert_eq!(item.platform, "reddit");
    assert_eq!(item.get("url"), Some(&json!("https://www.reddit.com/r/rust/comments/a/post/")));
    assert_eq!(item.get("likes"), Some(&json!(10)));
    assert_eq!(item.get("shares"), Some(&json!(1)));
    assert_eq!(item.get("tags"), Some(&json!(["rust"])));
    assert_eq!(item.get("metadata").and_then(|m| m.get("subreddit")), Some(&json!("rust")));
}

#[tokio::test]
async fn stops_at_max_posts_per_source() {
    let server = MockServer::start().await;
    let now = Utc::now().timestamp();
    let children = (0..5).map(|i| post(&format!("p{i}"), now - i)).collect();

    Mock::given(method("GET"))
        .and(path("/search.json"))
        .and(query_param("limit", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(children, Some("t3_p4"))))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = adapter(&server, &[]);
    let query = CollectionQuery::new(["rust"]).with_max_posts(3);
    let items = collect(&adapter, &query, &CancellationToken::new()).await;
    assert_eq!(items.len(), 3);
}

#[tokio::test]
async fn stops_paging_once_items_predate_the_bound() {
    let server = MockServer::start().await;
    let now = Utc::now().timestamp();

    Mock::given(method("GET"))
        .and(path("/search.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(
            vec![post("fresh", now - 60), post("stale", now - 3 * 3600)],
            Some("t3_stale"),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = adapter(&server, &[]);
    let query = CollectionQuery::new(["rust"]).with_time_bound(TimeBound::Trailing(TimeDelta::hours(1)));
    let items = collect(&adapter, &query, &CancellationToken::new()).await;

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].as_ref().expect("ok").get("id"), Some(&json!("fresh")));
}

#[tokio::test]
async fn client_error_is_fatal_and_ends_stream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = adapter(&server, &[]);
    let items = collect(&adapter, &CollectionQuery::new(["rust"]), &CancellationToken::new()).await;

    assert_eq!(items.len(), 1);
    let err = items[0].as_ref().expect_err("error");
    assert_eq!(err.platform, "reddit");
    assert!(!err.retryable);
}

#[tokio::test]
async fn server_error_is_reported_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let adapter = adapter(&server, &[]);
    let items = collect(&adapter, &CollectionQuery::new(["rust"]), &CancellationToken::new()).await;

    assert_eq!(items.len(), 1);
    assert!(items[0].as_ref().expect_err("error").retryable);
}

#[tokio::test]
async fn cancelled_token_issues_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(vec![], None)))
        .expect(0)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let adapter = adapter(&server, &[]);
    let items = collect(&adapter, &CollectionQuery::new(["rust"]), &cancel).await;
    assert!(items.is_empty());
}

#[tokio::test]
async fn timed_out_request_is_not_retried_in_place() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(listing(vec![], None))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let http = HttpSettings {
        timeout: Duration::from_millis(200),
        max_retries: 2,
        retry_backoff_base_secs: 0,
        ..HttpSettings::default()
    };
    let adapter = RedditAdapter::new(&http, Duration::ZERO, Vec::new())
        .expect("client construction should not fail")
        .with_base_url(server.uri());
    let items = collect(&adapter, &CollectionQuery::new(["rust"]), &CancellationToken::new()).await;

    assert_eq!(items.len(), 1);
    assert!(items[0].as_ref().expect_err("error").retryable);
    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 1);
}
