//! Run history in the `collection_runs` table.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use harvest_core::{PlatformStats, RunOutcome, RunStats, SourceError};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::timestamps::{from_micros, to_micros};
use crate::StoreError;

#[derive(Debug, sqlx::FromRow)]
struct CollectionRunRow {
    id: i64,
    public_id: String,
    outcome: String,
    keywords: String,
    started_at: i64,
    completed_at: i64,
    elapsed_ms: i64,
    posts_fetched: i64,
    posts_stored: i64,
    error_message: Option<String>,
    platform_stats: String,
    errors: String,
}

/// A finished run as read back from history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionRunRecord {
    pub id: i64,
    pub run_id: Uuid,
    /// `completed`, `cancelled` or `aborted`.
    pub outcome: String,
    pub keywords: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub posts_fetched: u64,
    pub posts_stored: u64,
    pub error_message: Option<String>,
    pub platforms: BTreeMap<String, PlatformStats>,
    pub errors: Vec<SourceError>,
}

impl CollectionRunRow {
    fn into_record(self) -> Result<CollectionRunRecord, StoreError> {
        let corrupt = |reason: String| StoreError::CorruptRow {
            platform: "collection_runs".to_string(),
            source_id: self.public_id.clone(),
            reason,
        };

        let run_id = Uuid::parse_str(&self.public_id)
            .map_err(|e| corrupt(format!("public_id is not a UUID: {e}")))?;
        let started_at = from_micros(self.started_at)
            .ok_or_else(|| corrupt("started_at out of range".to_string()))?;
        let completed_at = from_micros(self.completed_at)
            .ok_or_else(|| corrupt("completed_at out of range".to_string()))?;

        Ok(CollectionRunRecord {
            id: self.id,
            run_id,
            outcome: self.outcome,
            keywords: serde_json::from_str(&self.keywords)?,
            started_at,
            completed_at,
            elapsed_ms: u64::try_from(self.elapsed_ms).unwrap_or(0),
            posts_fetched: u64::try_from(self.posts_fetched).unwrap_or(0),
            posts_stored: u64::try_from(self.posts_stored).unwrap_or(0),
            error_message: self.error_message,
            platforms: serde_json::from_str(&self.platform_stats)?,
            errors: serde_json::from_str(&self.errors)?,
        })
    }
}

/// Persist a finished run. Returns the new row id.
///
/// # Errors
///
/// Returns [`StoreError::Sqlx`] if the insert fails (including a second
/// insert for the same `run_id`).
pub async fn record_collection_run(pool: &SqlitePool, stats: &RunStats) -> Result<i64, StoreError> {
    let totals = stats.totals();
    let elapsed = TimeDelta::milliseconds(i64::try_from(stats.elapsed_ms).unwrap_or(i64::MAX));
    let completed_at = stats
        .started_at
        .checked_add_signed(elapsed)
        .unwrap_or(stats.started_at);
    let error_message = match &stats.outcome {
        RunOutcome::Aborted { reason } => Some(reason.clone()),
        RunOutcome::Completed | RunOutcome::Cancelled => None,
    };

    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO collection_runs \
            (public_id, outcome, keywords, started_at, completed_at, elapsed_ms, \
             posts_fetched, posts_stored, error_message, platform_stats, errors) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         RETURNING id",
    )
    .bind(stats.run_id.to_string())
    .bind(stats.outcome.as_str())
    .bind(serde_json::to_string(&stats.keywords)?)
    .bind(to_micros(stats.started_at))
    .bind(to_micros(completed_at))
    .bind(i64::try_from(stats.elapsed_ms).unwrap_or(i64::MAX))
    .bind(i64::try_from(totals.fetched).unwrap_or(i64::MAX))
    .bind(i64::try_from(totals.stored).unwrap_or(i64::MAX))
    .bind(error_message)
    .bind(serde_json::to_string(&stats.platforms)?)
    .bind(serde_json::to_string(&stats.errors)?)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Most recent runs first.
///
/// # Errors
///
/// Returns [`StoreError`] on database failure or a corrupt row.
pub async fn list_collection_runs(
    pool: &SqlitePool,
    limit: i64,
) -> Result<Vec<CollectionRunRecord>, StoreError> {
    let rows = sqlx::query_as::<_, CollectionRunRow>(
        "SELECT id, public_id, outcome, keywords, started_at, completed_at, elapsed_ms, \
                posts_fetched, posts_stored, error_message, platform_stats, errors \
         FROM collection_runs \
         ORDER BY started_at DESC, id DESC \
         LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(CollectionRunRow::into_record).collect()
}
