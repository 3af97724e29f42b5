//! End-to-end runs against a throwaway SQLite store.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use harvest_collector::{DbStore, Orchestrator, OrchestratorConfig, Scheduler};
use harvest_core::{CollectionQuery, ContentFilter, RunOutcome, SourceError};
use harvest_db::{
    connect_pool_with, count_posts, get_post, list_collection_runs, run_migrations, PoolConfig,
    SqlitePool,
};
use harvest_sources::{ItemStream, RawItem, SourceAdapter};
use serde_json::json;
use sqlx::sqlite::SqliteConnectOptions;
use tokio_util::sync::CancellationToken;

async fn open_store(dir: &Path) -> SqlitePool {
    let options = SqliteConnectOptions::new().filename(dir.join("harvest.db"));
    let pool = connect_pool_with(options, PoolConfig::default())
        .await
        .expect("connect");
    run_migrations(&pool).await.expect("migrate");
    pool
}

/// Returns the same items on every fetch, ignoring the query.
struct FixedAdapter {
    platform: &'static str,
    items: Vec<RawItem>,
    pace: Duration,
}

impl SourceAdapter for FixedAdapter {
    fn platform_name(&self) -> &str {
        self.platform
    }

    fn fetch<'a>(
        &'a self,
        _query: &'a CollectionQuery,
        cancel: &'a CancellationToken,
    ) -> ItemStream<'a> {
        let pace = self.pace;
        futures::stream::iter(self.items.iter().cloned())
            .then(move |item| async move {
                if !pace.is_zero() {
                    tokio::time::sleep(pace).await;
                }
                item
            })
            .take_while(move |_| futures::future::ready(!cancel.is_cancelled()))
            .map(Ok::<RawItem, SourceError>)
            .boxed()
    }
}

fn item(platform: &str, id: usize, metadata: serde_json::Value) -> RawItem {
    RawItem::new(platform)
        .with("id", format!("{platform}-{id}"))
        .with("author", "someone")
        .with("title", format!("Python tip #{id}"))
        .with("body", "use comprehensions wisely")
        .with("created_at", Utc::now().timestamp())
        .with("likes", 4)
        .with("metadata", metadata)
}

fn orchestrator(pool: &SqlitePool, adapters: Vec<Arc<dyn SourceAdapter>>) -> Orchestrator {
    Orchestrator::new(
        adapters,
        Arc::new(DbStore::new(pool.clone())),
        ContentFilter::new(10, None),
        OrchestratorConfig::default(),
    )
}

#[tokio::test]
async fn second_run_over_same_window_adds_no_rows() {
    let dir = tempfile::tempdir().unwrap();
    let pool = open_store(dir.path()).await;

    let first: Vec<RawItem> = (0..5).map(|i| item("mock", i, json!({"rank": i}))).collect();
    let orch = orchestrator(
        &pool,
        vec![Arc::new(FixedAdapter { platform: "mock", items: first, pace: Duration::ZERO })],
    );
    let stats = orch.run(&CollectionQuery::new(["python"]), &CancellationToken::new()).await;
    assert_eq!(stats.totals().stored, 5);

    // Same keys, one new metadata key each, plus two unseen posts.
    let second: Vec<RawItem> = (0..7)
        .map(|i| item("mock", i, json!({"rank": 100, "gilded": true})))
        .collect();
    let orch = orchestrator(
        &pool,
        vec![Arc::new(FixedAdapter { platform: "mock", items: second, pace: Duration::ZERO })],
    );
    let query = CollectionQuery::new(["python"]).with_max_posts(5);
    let stats = orch.run(&query, &CancellationToken::new()).await;

    let totals = stats.totals();
    assert_eq!(totals.fetched, 7);
    assert_eq!(totals.stored, 2);
    assert_eq!(totals.enriched, 5);
    assert_eq!(count_posts(&pool).await.unwrap(), 7);

    let kept = get_post(&pool, "mock", "mock-3").await.unwrap().unwrap();
    assert_eq!(kept.metadata.get("rank"), Some(&json!(3)));
    assert_eq!(kept.metadata.get("gilded"), Some(&json!(true)));
    assert_eq!(kept.content, "Python tip #3\n\nuse comprehensions wisely");

    let runs = list_collection_runs(&pool, 10).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.outcome == "completed"));
}

#[tokio::test]
async fn stopping_a_schedule_leaves_unique_rows_and_an_incomplete_run() {
    let dir = tempfile::tempdir().unwrap();
    let pool = open_store(dir.path()).await;

    let adapters: Vec<Arc<dyn SourceAdapter>> = ["alpha", "beta"]
        .into_iter()
        .map(|platform| {
            let items = (0..200).map(|i| item(platform, i, json!({}))).collect();
            Arc::new(FixedAdapter {
                platform,
                items,
                pace: Duration::from_millis(5),
            }) as Arc<dyn SourceAdapter>
        })
        .collect();
    let orch = Arc::new(orchestrator(&pool, adapters));
    let scheduler = Scheduler::new(orch, Duration::from_secs(5));

    let stop = CancellationToken::new();
    let trigger = stop.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });
    let report = scheduler
        .run_every(Duration::from_millis(100), &CollectionQuery::new(["python"]), &stop)
        .await;

    assert!(report.interrupted);
    assert_eq!(report.runs_completed, 0);
    assert_eq!(report.runs_incomplete, 1);
    let last = report.last_run.expect("stopped run reports its stats");
    assert_eq!(last.outcome, RunOutcome::Cancelled);

    let stored = count_posts(&pool).await.unwrap();
    assert_eq!(stored, last.totals().stored);
    assert!(stored > 0 && stored < 400);

    let (distinct,): (i64,) =
        sqlx::query_as("SELECT COUNT(DISTINCT platform || ':' || source_id) FROM posts")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(u64::try_from(distinct).unwrap(), stored);

    let runs = list_collection_runs(&pool, 10).await.unwrap();
    assert_eq!(runs[0].outcome, "cancelled");
}
