use std::sync::Arc;

use chrono::{DateTime, Utc};
use harvest_core::Post;
use harvest_db::{InsertOutcome, StoreError};

use crate::store::CollectionStore;

/// What happened to one candidate post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// New key; the row was written.
    Stored { collected_at: DateTime<Utc> },
    /// Key already stored; absent metadata keys were added to it.
    Enriched,
    /// Key already stored and nothing new to add.
    Duplicate,
}

/// Routes each post to insert or enrich based on what the store holds.
#[derive(Clone)]
pub struct Deduplicator {
    store: Arc<dyn CollectionStore>,
}

impl std::fmt::Debug for Deduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deduplicator").finish_non_exhaustive()
    }
}

impl Deduplicator {
    #[must_use]
    pub fn new(store: Arc<dyn CollectionStore>) -> Self {
        Self { store }
    }

    /// # Errors
    ///
    /// Propagates the [`StoreError`] of whichever store call failed.
    pub async fn process(&self, post: &Post) -> Result<DedupOutcome, StoreError> {
        let (platform, source_id) = post.key();

        let stored = match self.store.lookup_metadata(platform, source_id).await? {
            Some(stored) => stored,
            None => match self.store.insert_if_absent(post).await? {
                InsertOutcome::Inserted { collected_at } => {
                    return Ok(DedupOutcome::Stored { collected_at });
                }
                InsertOutcome::Duplicate => {
                    tracing::debug!(platform, source_id, "insert raced a concurrent writer");
                    match self.store.lookup_metadata(platform, source_id).await? {
                        Some(stored) => stored,
                        None => return Ok(DedupOutcome::Duplicate),
                    }
                }
            },
        };

        let missing = post.metadata_missing_from(&stored);
        if missing.is_empty() {
            return Ok(DedupOutcome::Duplicate);
        }
        if self
            .store
            .enrich_metadata(platform, source_id, &missing)
            .await?
        {
            Ok(DedupOutcome::Enriched)
        } else {
            Ok(DedupOutcome::Duplicate)
        }
    }
}
