//! Source adapters and the plumbing they share.
//!
//! Each platform implements [`SourceAdapter`]: a lazy, cancellable stream of
//! [`RawItem`]s for a [`harvest_core::CollectionQuery`]. [`normalize`] turns
//! those into canonical posts. [`build_adapters`] is the only place that maps
//! platform names to implementations.

pub mod adapter;
pub mod discourse;
pub mod error;
pub mod hackernews;
mod html;
pub mod http;
pub mod normalize;
mod rate_limit;
pub mod raw;
pub mod reddit;
pub mod registry;
pub mod rss;
pub mod web;

pub use adapter::{ItemStream, SourceAdapter};
pub use discourse::DiscourseAdapter;
pub use error::FetchError;
pub use hackernews::HackerNewsAdapter;
pub use http::{HttpFetcher, HttpSettings};
pub use normalize::{normalize, NormalizationError};
pub use raw::RawItem;
pub use reddit::RedditAdapter;
pub use registry::build_adapters;
pub use rss::RssAdapter;
pub use web::WebAdapter;
