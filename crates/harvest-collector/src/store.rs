use async_trait::async_trait;
use harvest_core::{Post, RunStats};
use harvest_db::{InsertOutcome, SqlitePool, StoreError};
use serde_json::{Map, Value};

/// The writes and lookups a collection run needs from persistent storage.
///
/// Implementations must make `insert_if_absent` atomic per
/// `(platform, source_id)`; deduplication relies on it rather than on the
/// preceding lookup.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn lookup_metadata(
        &self,
        platform: &str,
        source_id: &str,
    ) -> Result<Option<Map<String, Value>>, StoreError>;

    async fn insert_if_absent(&self, post: &Post) -> Result<InsertOutcome, StoreError>;

    /// Add the absent keys of `extra`; `false` when nothing changed.
    async fn enrich_metadata(
        &self,
        platform: &str,
        source_id: &str,
        extra: &Map<String, Value>,
    ) -> Result<bool, StoreError>;

    async fn record_run(&self, stats: &RunStats) -> Result<(), StoreError>;
}

/// [`CollectionStore`] over the SQLite pool.
#[derive(Debug, Clone)]
pub struct DbStore {
    pool: SqlitePool,
}

impl DbStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl CollectionStore for DbStore {
    async fn lookup_metadata(
        &self,
        platform: &str,
        source_id: &str,
    ) -> Result<Option<Map<String, Value>>, StoreError> {
        harvest_db::lookup_post_metadata(&self.pool, platform, source_id).await
    }

    async fn insert_if_absent(&self, post: &Post) -> Result<InsertOutcome, StoreError> {
        harvest_db::insert_post_if_absent(&self.pool, post).await
    }

    async fn enrich_metadata(
        &self,
        platform: &str,
        source_id: &str,
        extra: &Map<String, Value>,
    ) -> Result<bool, StoreError> {
        harvest_db::enrich_post_metadata(&self.pool, platform, source_id, extra).await
    }

    async fn record_run(&self, stats: &RunStats) -> Result<(), StoreError> {
        harvest_db::record_collection_run(&self.pool, stats)
            .await
            .map(|_| ())
    }
}
