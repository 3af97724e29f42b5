//! Database operations for the `posts` table.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use harvest_core::{Engagement, Post};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::timestamps::{from_micros, now, to_micros};
use crate::StoreError;

/// Compare-and-swap attempts before `enrich_post_metadata` gives up.
const MAX_ENRICH_ATTEMPTS: u32 = 5;

/// Distinct days reported by [`post_statistics`].
const POSTS_BY_DATE_DAYS: i64 = 30;

const POST_COLUMNS: &str = "platform, source_id, author, content, created_at, url, \
                            likes, shares, comments, tags, metadata, collected_at";

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
struct PostRow {
    platform: String,
    source_id: String,
    author: String,
    content: String,
    created_at: i64,
    url: String,
    likes: i64,
    shares: i64,
    comments: i64,
    tags: String,
    metadata: String,
    collected_at: i64,
}

impl PostRow {
    fn into_post(self) -> Result<Post, StoreError> {
        let corrupt = |reason: String| StoreError::CorruptRow {
            platform: self.platform.clone(),
            source_id: self.source_id.clone(),
            reason,
        };

        let created_at = from_micros(self.created_at)
            .ok_or_else(|| corrupt(format!("created_at out of range: {}", self.created_at)))?;
        let collected_at = from_micros(self.collected_at)
            .ok_or_else(|| corrupt(format!("collected_at out of range: {}", self.collected_at)))?;
        let tags: BTreeSet<String> = serde_json::from_str(&self.tags)
            .map_err(|e| corrupt(format!("tags are not a JSON string array: {e}")))?;
        let metadata: Map<String, Value> = serde_json::from_str(&self.metadata)
            .map_err(|e| corrupt(format!("metadata is not a JSON object: {e}")))?;

        Ok(Post {
            platform: self.platform,
            source_id: self.source_id,
            author: self.author,
            content: self.content,
            created_at,
            url: self.url,
            engagement: Engagement {
                likes: count_from_db(self.likes),
                shares: count_from_db(self.shares),
                comments: count_from_db(self.comments),
            },
            tags,
            metadata,
            collected_at: Some(collected_at),
        })
    }
}

fn count_to_db(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn count_from_db(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

/// Result of [`insert_post_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted { collected_at: DateTime<Utc> },
    /// A row with the same `(platform, source_id)` already exists; nothing was written.
    Duplicate,
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Insert `post` unless a row with the same `(platform, source_id)` exists.
///
/// A single `INSERT … ON CONFLICT DO NOTHING`, so concurrent callers racing
/// on one key produce exactly one row. `post.collected_at` is ignored; the
/// store assigns it.
///
/// # Errors
///
/// Returns [`StoreError::Sqlx`] on database failure or [`StoreError::Json`]
/// if tags or metadata cannot be encoded.
pub async fn insert_post_if_absent(
    pool: &SqlitePool,
    post: &Post,
) -> Result<InsertOutcome, StoreError> {
    let collected_at = now();
    let tags = serde_json::to_string(&post.tags)?;
    let metadata = serde_json::to_string(&post.metadata)?;

    let result = sqlx::query(
        "INSERT INTO posts (platform, source_id, author, content, created_at, url, \
                            likes, shares, comments, tags, metadata, collected_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (platform, source_id) DO NOTHING",
    )
    .bind(post.platform.as_str())
    .bind(post.source_id.as_str())
    .bind(post.author.as_str())
    .bind(post.content.as_str())
    .bind(to_micros(post.created_at))
    .bind(post.url.as_str())
    .bind(count_to_db(post.engagement.likes))
    .bind(count_to_db(post.engagement.shares))
    .bind(count_to_db(post.engagement.comments))
    .bind(tags)
    .bind(metadata)
    .bind(to_micros(collected_at))
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        Ok(InsertOutcome::Duplicate)
    } else {
        Ok(InsertOutcome::Inserted { collected_at })
    }
}

/// Add the keys of `extra` that the stored metadata lacks. Existing keys are
/// never overwritten and no other column is touched.
///
/// Returns `false` when the row does not exist or nothing was added.
///
/// # Errors
///
/// Returns [`StoreError::Conflict`] if the stored metadata kept changing
/// underneath every attempt, or [`StoreError::Sqlx`] on database failure.
pub async fn enrich_post_metadata(
    pool: &SqlitePool,
    platform: &str,
    source_id: &str,
    extra: &Map<String, Value>,
) -> Result<bool, StoreError> {
    if extra.is_empty() {
        return Ok(false);
    }

    for _ in 0..MAX_ENRICH_ATTEMPTS {
        let Some(stored_raw) = fetch_raw_metadata(pool, platform, source_id).await? else {
            return Ok(false);
        };
        let mut merged = parse_metadata(&stored_raw, platform, source_id)?;

        let mut added = false;
        for (key, value) in extra {
            if !merged.contains_key(key) {
                merged.insert(key.clone(), value.clone());
                added = true;
            }
        }
        if !added {
            return Ok(false);
        }

        let result = sqlx::query(
            "UPDATE posts SET metadata = ? \
             WHERE platform = ? AND source_id = ? AND metadata = ?",
        )
        .bind(serde_json::to_string(&merged)?)
        .bind(platform)
        .bind(source_id)
        .bind(stored_raw.as_str())
        .execute(pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        tracing::debug!(platform, source_id, "metadata changed concurrently, retrying");
    }

    Err(StoreError::Conflict {
        platform: platform.to_string(),
        source_id: source_id.to_string(),
        attempts: MAX_ENRICH_ATTEMPTS,
    })
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

async fn fetch_raw_metadata(
    pool: &SqlitePool,
    platform: &str,
    source_id: &str,
) -> Result<Option<String>, StoreError> {
    let raw = sqlx::query_scalar::<_, String>(
        "SELECT metadata FROM posts WHERE platform = ? AND source_id = ?",
    )
    .bind(platform)
    .bind(source_id)
    .fetch_optional(pool)
    .await?;
    Ok(raw)
}

fn parse_metadata(
    raw: &str,
    platform: &str,
    source_id: &str,
) -> Result<Map<String, Value>, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        platform: platform.to_string(),
        source_id: source_id.to_string(),
        reason: format!("metadata is not a JSON object: {e}"),
    })
}

/// Stored metadata for `(platform, source_id)`, or `None` if no such row.
///
/// # Errors
///
/// Returns [`StoreError`] on database failure or a corrupt metadata column.
pub async fn lookup_post_metadata(
    pool: &SqlitePool,
    platform: &str,
    source_id: &str,
) -> Result<Option<Map<String, Value>>, StoreError> {
    fetch_raw_metadata(pool, platform, source_id)
        .await?
        .map(|raw| parse_metadata(&raw, platform, source_id))
        .transpose()
}

/// # Errors
///
/// Returns [`StoreError`] on database failure or a corrupt row.
pub async fn get_post(
    pool: &SqlitePool,
    platform: &str,
    source_id: &str,
) -> Result<Option<Post>, StoreError> {
    let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE platform = ? AND source_id = ?");
    let row = sqlx::query_as::<_, PostRow>(&sql)
        .bind(platform)
        .bind(source_id)
        .fetch_optional(pool)
        .await?;
    row.map(PostRow::into_post).transpose()
}

/// # Errors
///
/// Returns [`StoreError::Sqlx`] if the query fails.
pub async fn count_posts(pool: &SqlitePool) -> Result<u64, StoreError> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM posts")
        .fetch_one(pool)
        .await?;
    Ok(count_from_db(count))
}

/// Criteria for [`query_posts`]. Empty lists mean "no restriction".
#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub platforms: Vec<String>,
    /// Case-insensitive substrings of `content`, OR-combined.
    pub keywords: Vec<String>,
    /// Inclusive lower bound on `created_at`.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl PostFilter {
    fn lowercase_keywords(&self) -> Vec<String> {
        self.keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect()
    }
}

/// Stored posts matching `filter`, newest `created_at` first.
///
/// Keyword matching happens after the SQL fetch so that case folding is
/// Unicode-aware rather than SQLite's ASCII-only `LIKE`.
///
/// # Errors
///
/// Returns [`StoreError`] on database failure or a corrupt row.
pub async fn query_posts(pool: &SqlitePool, filter: &PostFilter) -> Result<Vec<Post>, StoreError> {
    let keywords = filter.lowercase_keywords();

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT ");
    qb.push(POST_COLUMNS).push(" FROM posts WHERE 1 = 1");

    if !filter.platforms.is_empty() {
        qb.push(" AND platform IN (");
        let mut separated = qb.separated(", ");
        for platform in &filter.platforms {
            separated.push_bind(platform.clone());
        }
        separated.push_unseparated(")");
    }
    if let Some(start) = filter.start {
        qb.push(" AND created_at >= ").push_bind(to_micros(start));
    }
    if let Some(end) = filter.end {
        qb.push(" AND created_at <= ").push_bind(to_micros(end));
    }
    qb.push(" ORDER BY created_at DESC, id DESC");
    if keywords.is_empty() {
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ")
                .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }
    }

    let rows: Vec<PostRow> = qb.build_query_as().fetch_all(pool).await?;

    let mut posts = Vec::with_capacity(rows.len());
    for row in rows {
        if filter.limit.is_some_and(|limit| posts.len() >= limit) {
            break;
        }
        if !keywords.is_empty() {
            let content = row.content.to_lowercase();
            if !keywords.iter().any(|k| content.contains(k.as_str())) {
                continue;
            }
        }
        posts.push(row.into_post()?);
    }
    Ok(posts)
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateSpan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayCount {
    pub date: NaiveDate,
    pub posts: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PostStatistics {
    pub total_posts: u64,
    pub by_platform: BTreeMap<String, u64>,
    /// Oldest and newest `created_at`; `None` for an empty store.
    pub date_span: Option<DateSpan>,
    /// Post counts for the most recent days that have posts, newest first.
    pub posts_by_date: Vec<DayCount>,
}

/// Corpus-wide counts for the `stats` command.
///
/// # Errors
///
/// Returns [`StoreError`] if any of the aggregate queries fail.
pub async fn post_statistics(pool: &SqlitePool) -> Result<PostStatistics, StoreError> {
    let by_platform: BTreeMap<String, u64> = sqlx::query_as::<_, (String, i64)>(
        "SELECT platform, COUNT(*) FROM posts GROUP BY platform",
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|(platform, count)| (platform, count_from_db(count)))
    .collect();

    let (min, max) = sqlx::query_as::<_, (Option<i64>, Option<i64>)>(
        "SELECT MIN(created_at), MAX(created_at) FROM posts",
    )
    .fetch_one(pool)
    .await?;
    let date_span = match (min.and_then(from_micros), max.and_then(from_micros)) {
        (Some(start), Some(end)) => Some(DateSpan { start, end }),
        _ => None,
    };

    let days = sqlx::query_as::<_, (String, i64)>(
        "SELECT date(created_at / 1000000, 'unixepoch') AS day, COUNT(*) \
         FROM posts GROUP BY day ORDER BY day DESC LIMIT ?",
    )
    .bind(POSTS_BY_DATE_DAYS)
    .fetch_all(pool)
    .await?;

    let mut posts_by_date = Vec::with_capacity(days.len());
    for (day, count) in days {
        let date = NaiveDate::parse_from_str(&day, "%Y-%m-%d").map_err(|e| {
            StoreError::CorruptRow {
                platform: "*".to_string(),
                source_id: "*".to_string(),
                reason: format!("unparseable day bucket '{day}': {e}"),
            }
        })?;
        posts_by_date.push(DayCount {
            date,
            posts: count_from_db(count),
        });
    }

    Ok(PostStatistics {
        total_posts: by_platform.values().sum(),
        by_platform,
        date_span,
        posts_by_date,
    })
}
