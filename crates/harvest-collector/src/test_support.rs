//! In-memory store and scripted adapters for orchestrator and scheduler tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use harvest_core::{CollectionQuery, Post, RunStats, SourceError};
use harvest_db::{InsertOutcome, StoreError};
use harvest_sources::{ItemStream, RawItem, SourceAdapter};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::store::CollectionStore;

#[derive(Default)]
pub(crate) struct MemoryStore {
    pub posts: Mutex<BTreeMap<(String, String), Post>>,
    pub runs: Mutex<Vec<RunStats>>,
    pub fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn failing() -> Self {
        let store = Self::default();
        store.fail_writes.store(true, Ordering::SeqCst);
        store
    }

    pub fn len(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    pub fn get(&self, platform: &str, source_id: &str) -> Option<Post> {
        self.posts
            .lock()
            .unwrap()
            .get(&(platform.to_string(), source_id.to_string()))
            .cloned()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Sqlx(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CollectionStore for MemoryStore {
    async fn lookup_metadata(
        &self,
        platform: &str,
        source_id: &str,
    ) -> Result<Option<Map<String, Value>>, StoreError> {
        Ok(self.get(platform, source_id).map(|p| p.metadata))
    }

    async fn insert_if_absent(&self, post: &Post) -> Result<InsertOutcome, StoreError> {
        self.check_writable()?;
        let mut posts = self.posts.lock().unwrap();
        let key = (post.platform.clone(), post.source_id.clone());
        if posts.contains_key(&key) {
            return Ok(InsertOutcome::Duplicate);
        }
        let collected_at = Utc::now();
        let mut stored = post.clone();
        stored.collected_at = Some(collected_at);
        posts.insert(key, stored);
        Ok(InsertOutcome::Inserted { collected_at })
    }

    async fn enrich_metadata(
        &self,
        platform: &str,
        source_id: &str,
        extra: &Map<String, Value>,
    ) -> Result<bool, StoreError> {
        self.check_writable()?;
        let mut posts = self.posts.lock().unwrap();
        let Some(post) = posts.get_mut(&(platform.to_string(), source_id.to_string())) else {
            return Ok(false);
        };
        let mut added = false;
        for (k, v) in extra {
            if !post.metadata.contains_key(k) {
                post.metadata.insert(k.clone(), v.clone());
                added = true;
            }
        }
        Ok(added)
    }

    async fn record_run(&self, stats: &RunStats) -> Result<(), StoreError> {
        self.runs.lock().unwrap().push(stats.clone());
        Ok(())
    }
}

/// Yields a fixed list of items, optionally pausing before each one.
pub(crate) struct ScriptedAdapter {
    pub platform: &'static str,
    pub items: Vec<Result<RawItem, SourceError>>,
    pub delay: Duration,
    pub fetches: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(platform: &'static str, items: Vec<Result<RawItem, SourceError>>) -> Self {
        Self {
            platform,
            items,
            delay: Duration::ZERO,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl SourceAdapter for ScriptedAdapter {
    fn platform_name(&self) -> &str {
        self.platform
    }

    fn fetch<'a>(
        &'a self,
        _query: &'a CollectionQuery,
        cancel: &'a CancellationToken,
    ) -> ItemStream<'a> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        async_stream::stream! {
            for item in self.items.iter().cloned() {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                if cancel.is_cancelled() {
                    break;
                }
                yield item;
            }
        }
        .boxed()
    }
}

/// Never yields and never ends.
pub(crate) struct HangingAdapter(pub &'static str);

impl SourceAdapter for HangingAdapter {
    fn platform_name(&self) -> &str {
        self.0
    }

    fn fetch<'a>(
        &'a self,
        _query: &'a CollectionQuery,
        _cancel: &'a CancellationToken,
    ) -> ItemStream<'a> {
        futures::stream::pending().boxed()
    }
}

pub(crate) fn raw_post(platform: &str, id: &str, content: &str, created_at: DateTime<Utc>) -> RawItem {
    RawItem::new(platform)
        .with("id", id)
        .with("author", "tester")
        .with("content", content)
        .with("created_at", created_at.to_rfc3339())
}
