//! Export and import of posts as JSON, JSON Lines, CSV or an Excel workbook.
//!
//! CSV rows and spreadsheet cells carry `tags` and `metadata` as JSON text so
//! that a re-import yields the same structured values.

use std::collections::BTreeSet;
use std::fmt;
use std::io::{BufRead, Cursor};
use std::str::FromStr;

use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
use chrono::{DateTime, SecondsFormat, Utc};
use harvest_core::{Engagement, Post};
use rust_xlsxwriter::Workbook;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::posts::{query_posts, PostFilter};
use crate::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Jsonl,
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 4] = [
        ExportFormat::Json,
        ExportFormat::Jsonl,
        ExportFormat::Csv,
        ExportFormat::Xlsx,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }

    /// Reject formats outside the configured `export_formats`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnsupportedFormat`] if `self` is not in `allowed`.
    pub fn ensure_allowed(self, allowed: &BTreeSet<String>) -> Result<Self, StoreError> {
        if allowed.contains(self.as_str()) {
            Ok(self)
        } else {
            Err(StoreError::UnsupportedFormat(self.as_str().to_string()))
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "jsonl" | "ndjson" => Ok(ExportFormat::Jsonl),
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" => Ok(ExportFormat::Xlsx),
            other => Err(StoreError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Flat record shared by CSV rows and spreadsheet rows. Column order follows
/// field order.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRecord {
    platform: String,
    source_id: String,
    author: String,
    content: String,
    created_at: String,
    url: String,
    likes: u64,
    shares: u64,
    comments: u64,
    tags: String,
    metadata: String,
    collected_at: String,
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| {
            StoreError::Csv(csv::Error::from(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{column} '{raw}' is not RFC 3339: {e}"),
            )))
        })
}

impl CsvRecord {
    fn from_post(post: &Post) -> Result<Self, StoreError> {
        Ok(Self {
            platform: post.platform.clone(),
            source_id: post.source_id.clone(),
            author: post.author.clone(),
            content: post.content.clone(),
            created_at: format_timestamp(post.created_at),
            url: post.url.clone(),
            likes: post.engagement.likes,
            shares: post.engagement.shares,
            comments: post.engagement.comments,
            tags: serde_json::to_string(&post.tags)?,
            metadata: serde_json::to_string(&post.metadata)?,
            collected_at: post.collected_at.map(format_timestamp).unwrap_or_default(),
        })
    }

    fn into_post(self) -> Result<Post, StoreError> {
        let collected_at = if self.collected_at.is_empty() {
            None
        } else {
            Some(parse_timestamp(&self.collected_at, "collected_at")?)
        };
        Ok(Post {
            created_at: parse_timestamp(&self.created_at, "created_at")?,
            platform: self.platform,
            source_id: self.source_id,
            author: self.author,
            content: self.content,
            url: self.url,
            engagement: Engagement {
                likes: self.likes,
                shares: self.shares,
                comments: self.comments,
            },
            tags: serde_json::from_str(&self.tags)?,
            metadata: serde_json::from_str(&self.metadata)?,
            collected_at,
        })
    }
}

const SHEET_NAME: &str = "posts";

const COLUMNS: [&str; 12] = [
    "platform",
    "source_id",
    "author",
    "content",
    "created_at",
    "url",
    "likes",
    "shares",
    "comments",
    "tags",
    "metadata",
    "collected_at",
];

#[allow(clippy::needless_pass_by_value)]
fn spreadsheet_error(e: impl fmt::Display) -> StoreError {
    StoreError::Spreadsheet(e.to_string())
}

/// One `posts` sheet with a header row. Counts are numeric cells, every
/// other column is text.
#[allow(clippy::cast_precision_loss)]
fn write_xlsx(posts: &[Post]) -> Result<Vec<u8>, StoreError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME).map_err(spreadsheet_error)?;
    for (col, name) in (0u16..).zip(COLUMNS) {
        sheet.write_string(0, col, name).map_err(spreadsheet_error)?;
    }
    for (row, post) in (1u32..).zip(posts) {
        let record = CsvRecord::from_post(post)?;
        let text = [
            (0, &record.platform),
            (1, &record.source_id),
            (2, &record.author),
            (3, &record.content),
            (4, &record.created_at),
            (5, &record.url),
            (9, &record.tags),
            (10, &record.metadata),
            (11, &record.collected_at),
        ];
        for (col, value) in text {
            sheet.write_string(row, col, value).map_err(spreadsheet_error)?;
        }
        for (col, count) in [(6, record.likes), (7, record.shares), (8, record.comments)] {
            sheet
                .write_number(row, col, count as f64)
                .map_err(spreadsheet_error)?;
        }
    }
    workbook.save_to_buffer().map_err(spreadsheet_error)
}

fn cell_text(cell: Option<&Data>) -> String {
    match cell {
        Some(Data::String(s)) => s.clone(),
        Some(Data::Empty) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[allow(
    clippy::float_cmp,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn cell_count(cell: Option<&Data>, column: &str) -> Result<u64, StoreError> {
    let count = match cell {
        Some(Data::Int(n)) => u64::try_from(*n).ok(),
        Some(Data::Float(f)) if *f >= 0.0 && f.trunc() == *f && *f <= u64::MAX as f64 => Some(*f as u64),
        Some(Data::String(s)) => s.trim().parse().ok(),
        Some(Data::Empty) | None => Some(0),
        Some(_) => None,
    };
    count.ok_or_else(|| StoreError::Spreadsheet(format!("{column} cell is not a count")))
}

/// Columns are located by header name, so reordered sheets still import.
fn read_xlsx(bytes: &[u8]) -> Result<Vec<Post>, StoreError> {
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes)).map_err(spreadsheet_error)?;
    let range = workbook
        .worksheet_range(SHEET_NAME)
        .map_err(spreadsheet_error)?;
    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok(Vec::new());
    };
    let index = COLUMNS
        .into_iter()
        .map(|name| {
            header
                .iter()
                .position(|cell| matches!(cell, Data::String(s) if s.as_str() == name))
                .ok_or_else(|| StoreError::Spreadsheet(format!("missing column '{name}'")))
        })
        .collect::<Result<Vec<usize>, _>>()?;

    let mut posts = Vec::new();
    for row in rows {
        if row.iter().all(|cell| matches!(cell, Data::Empty)) {
            continue;
        }
        let text = |col: usize| cell_text(row.get(index[col]));
        let count = |col: usize| cell_count(row.get(index[col]), COLUMNS[col]);
        let record = CsvRecord {
            platform: text(0),
            source_id: text(1),
            author: text(2),
            content: text(3),
            created_at: text(4),
            url: text(5),
            likes: count(6)?,
            shares: count(7)?,
            comments: count(8)?,
            tags: text(9),
            metadata: text(10),
            collected_at: text(11),
        };
        posts.push(record.into_post()?);
    }
    Ok(posts)
}

/// Serialize `posts` in `format`.
///
/// # Errors
///
/// Returns [`StoreError::Json`], [`StoreError::Csv`] or
/// [`StoreError::Spreadsheet`] if encoding fails. A spreadsheet cell holds at
/// most 32767 characters, so longer content cannot be written as `xlsx`.
pub fn export_posts(posts: &[Post], format: ExportFormat) -> Result<Vec<u8>, StoreError> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_vec_pretty(posts)?),
        ExportFormat::Jsonl => {
            let mut out = Vec::new();
            for post in posts {
                serde_json::to_writer(&mut out, post)?;
                out.push(b'\n');
            }
            Ok(out)
        }
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            for post in posts {
                writer.serialize(CsvRecord::from_post(post)?)?;
            }
            writer
                .into_inner()
                .map_err(|e| StoreError::Csv(csv::Error::from(e.into_error())))
        }
        ExportFormat::Xlsx => write_xlsx(posts),
    }
}

/// Parse posts previously written by [`export_posts`].
///
/// # Errors
///
/// Returns [`StoreError::Json`], [`StoreError::Csv`] or
/// [`StoreError::Spreadsheet`] on malformed input.
pub fn import_posts(bytes: &[u8], format: ExportFormat) -> Result<Vec<Post>, StoreError> {
    match format {
        ExportFormat::Json => Ok(serde_json::from_slice(bytes)?),
        ExportFormat::Jsonl => {
            let mut posts = Vec::new();
            for line in bytes.lines() {
                let line = line.map_err(|e| StoreError::Csv(csv::Error::from(e)))?;
                if line.trim().is_empty() {
                    continue;
                }
                posts.push(serde_json::from_str(&line)?);
            }
            Ok(posts)
        }
        ExportFormat::Csv => {
            let mut reader = csv::Reader::from_reader(bytes);
            let mut posts = Vec::new();
            for record in reader.deserialize::<CsvRecord>() {
                posts.push(record?.into_post()?);
            }
            Ok(posts)
        }
        ExportFormat::Xlsx => read_xlsx(bytes),
    }
}

/// Query the store and serialize the result.
///
/// # Errors
///
/// Returns [`StoreError`] if the query or the encoding fails.
pub async fn export_query(
    pool: &SqlitePool,
    filter: &PostFilter,
    format: ExportFormat,
) -> Result<Vec<u8>, StoreError> {
    let posts = query_posts(pool, filter).await?;
    export_posts(&posts, format)
}
