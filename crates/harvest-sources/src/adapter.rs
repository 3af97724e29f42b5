use futures::stream::BoxStream;
use harvest_core::{CollectionQuery, SourceError};
use tokio_util::sync::CancellationToken;

use crate::raw::RawItem;

pub type ItemStream<'a> = BoxStream<'a, Result<RawItem, SourceError>>;

/// A platform the collector can pull items from.
///
/// Implementations pace their own requests, check `cancel` before every
/// network round-trip, and end the stream quietly once it fires. An error
/// that prevents further progress is yielded as the last item; an error
/// confined to one sub-source (a single feed or forum) is yielded and the
/// stream moves on. At most `query.max_posts_per_source` items are yielded.
pub trait SourceAdapter: Send + Sync {
    fn platform_name(&self) -> &str;

    fn fetch<'a>(
        &'a self,
        query: &'a CollectionQuery,
        cancel: &'a CancellationToken,
    ) -> ItemStream<'a>;
}
