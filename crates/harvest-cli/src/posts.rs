//! Read-side commands over stored posts: search, stats, export and import.

use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use clap::Args;
use harvest_core::{CollectorSettings, Post};
use harvest_db::{ExportFormat, InsertOutcome, PostFilter, SqlitePool};

const DEFAULT_SEARCH_LIMIT: usize = 20;
const CONTENT_PREVIEW_CHARS: usize = 60;

/// Filters shared by `search` and `export`.
#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// Case-insensitive content keyword; repeat for several, matched with OR
    #[arg(short = 'k', long = "keyword")]
    pub keywords: Vec<String>,

    #[arg(long = "platform")]
    pub platforms: Vec<String>,

    /// First day to include (YYYY-MM-DD, UTC)
    #[arg(long)]
    pub start_date: Option<NaiveDate>,

    /// Last day to include (YYYY-MM-DD, UTC)
    #[arg(long)]
    pub end_date: Option<NaiveDate>,

    #[arg(long)]
    pub limit: Option<usize>,
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Last representable instant of `date`, so the whole day is included.
fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    start_of_day(date) + TimeDelta::days(1) - TimeDelta::microseconds(1)
}

impl FilterArgs {
    pub(crate) fn to_post_filter(&self) -> anyhow::Result<PostFilter> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            anyhow::ensure!(
                start <= end,
                "--start-date {start} is after --end-date {end}"
            );
        }
        Ok(PostFilter {
            platforms: self.platforms.clone(),
            keywords: self.keywords.clone(),
            start: self.start_date.map(start_of_day),
            end: self.end_date.map(end_of_day),
            limit: self.limit,
        })
    }
}

fn preview(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > CONTENT_PREVIEW_CHARS {
        format!(
            "{}...",
            flat.chars().take(CONTENT_PREVIEW_CHARS).collect::<String>()
        )
    } else {
        flat
    }
}

fn print_posts(posts: &[Post]) {
    println!(
        "{:<18}{:<12}{:<20}{:>7}  CONTENT",
        "CREATED", "PLATFORM", "AUTHOR", "LIKES"
    );
    for post in posts {
        let author: String = post.author.chars().take(18).collect();
        println!(
            "{:<18}{:<12}{:<20}{:>7}  {}",
            post.created_at.format("%Y-%m-%d %H:%M"),
            post.platform,
            author,
            post.engagement.likes,
            preview(&post.content)
        );
    }
}

/// Print stored posts matching `args`, newest first.
///
/// # Errors
///
/// Returns an error if the filters are inconsistent or the query fails.
pub(crate) async fn run_search(pool: &SqlitePool, args: &FilterArgs, json: bool) -> anyhow::Result<()> {
    let mut filter = args.to_post_filter()?;
    filter.limit = Some(filter.limit.unwrap_or(DEFAULT_SEARCH_LIMIT));
    let posts = harvest_db::query_posts(pool, &filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&posts)?);
        return Ok(());
    }
    if posts.is_empty() {
        println!("no posts found; run `harvest collect` first");
        return Ok(());
    }
    print_posts(&posts);
    Ok(())
}

/// Print corpus totals, per-platform counts and the per-day histogram.
///
/// # Errors
///
/// Returns an error if the statistics query fails.
pub(crate) async fn run_stats(pool: &SqlitePool, json: bool) -> anyhow::Result<()> {
    let stats = harvest_db::post_statistics(pool).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("total posts: {}", stats.total_posts);
    if let Some(span) = &stats.date_span {
        println!(
            "date span:   {} .. {}",
            span.start.format("%Y-%m-%d %H:%M"),
            span.end.format("%Y-%m-%d %H:%M")
        );
    }
    if !stats.by_platform.is_empty() {
        println!();
        println!("{:<12}{:>8}", "PLATFORM", "POSTS");
        for (platform, count) in &stats.by_platform {
            println!("{platform:<12}{count:>8}");
        }
    }
    if !stats.posts_by_date.is_empty() {
        println!();
        println!("{:<12}{:>8}", "DATE", "POSTS");
        for day in &stats.posts_by_date {
            println!("{:<12}{:>8}", day.date, day.posts);
        }
    }
    Ok(())
}

/// Parse `format` and check it against the configured `export_formats`.
pub(crate) fn resolve_format(format: &str, settings: &CollectorSettings) -> anyhow::Result<ExportFormat> {
    let parsed = ExportFormat::from_str(format)?;
    Ok(parsed.ensure_allowed(&settings.export_formats)?)
}

/// Export posts matching `args` to `output`.
///
/// # Errors
///
/// Returns an error if the format is unknown or disabled, the query fails,
/// or the file cannot be written.
pub(crate) async fn run_export(
    pool: &SqlitePool,
    settings: &CollectorSettings,
    output: &Path,
    format: &str,
    args: &FilterArgs,
) -> anyhow::Result<()> {
    let format = resolve_format(format, settings)?;
    let filter = args.to_post_filter()?;
    let posts = harvest_db::query_posts(pool, &filter).await?;
    let bytes = harvest_db::export_posts(&posts, format)?;
    tokio::fs::write(output, &bytes)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;

    tracing::info!(posts = posts.len(), format = %format, path = %output.display(), "export written");
    println!(
        "exported {} post(s) as {format} to {}",
        posts.len(),
        output.display()
    );
    Ok(())
}

/// Load posts from `input`, inserting those whose key is not stored yet.
///
/// # Errors
///
/// Returns an error if the file cannot be read or decoded, or a write fails.
pub(crate) async fn run_import(pool: &SqlitePool, input: &Path, format: &str) -> anyhow::Result<()> {
    let format = ExportFormat::from_str(format)?;
    let bytes = tokio::fs::read(input)
        .await
        .with_context(|| format!("failed to read {}", input.display()))?;
    let posts = harvest_db::import_posts(&bytes, format)
        .with_context(|| format!("failed to decode {} as {format}", input.display()))?;

    let mut inserted = 0_usize;
    let mut duplicates = 0_usize;
    for post in &posts {
        match harvest_db::insert_post_if_absent(pool, post).await? {
            InsertOutcome::Inserted { .. } => inserted += 1,
            InsertOutcome::Duplicate => duplicates += 1,
        }
    }

    tracing::info!(inserted, duplicates, path = %input.display(), "import finished");
    println!("imported {inserted} post(s), skipped {duplicates} already stored");
    Ok(())
}
