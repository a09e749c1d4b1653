//! Offset pagination over remote collections.
//!
//! A [`PageSource`] returns one page per call; [`fetch_all`] drives it from
//! offset zero until a short page comes back. Pages are fetched strictly in
//! sequence and never re-fetched.

use async_trait::async_trait;

use crate::error::{Result, SyncError};
use crate::sync::{ProgressCallback, SyncProgress, emit};

/// Default number of nodes requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Filter object sent with every page request.
pub type Filters = serde_json::Map<String, serde_json::Value>;

/// One page request.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub page_size: usize,
    pub offset: usize,
    pub filters: Filters,
}

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub nodes: Vec<T>,
    /// Collection size reported by the server, when it reports one.
    pub total_count: Option<u64>,
}

/// A remote collection that can be read one page at a time.
#[async_trait]
pub trait PageSource<T>: Send + Sync {
    /// Collection name used in logs and progress events.
    fn collection(&self) -> &str;

    /// Fetch a single page.
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page<T>>;
}

/// Fetch every node of a collection.
///
/// Returns nodes in remote order. Stops at the first page shorter than
/// `page_size`, so a collection whose size is an exact multiple of
/// `page_size` costs one extra (empty) request. Any error aborts the fetch
/// and discards what was collected.
pub async fn fetch_all<T, S>(
    source: &S,
    filters: &Filters,
    page_size: usize,
    on_progress: Option<&ProgressCallback>,
) -> Result<Vec<T>>
where
    S: PageSource<T> + ?Sized,
    T: Send,
{
    if page_size == 0 {
        return Err(SyncError::validation("page size must be greater than zero"));
    }

    let collection = source.collection().to_string();
    emit(
        on_progress,
        SyncProgress::FetchingCollection {
            collection: collection.clone(),
            page_size,
        },
    );

    let mut all = Vec::new();
    let mut offset = 0;
    loop {
        let request = PageRequest {
            page_size,
            offset,
            filters: filters.clone(),
        };
        let page = source.fetch_page(&request).await?;
        let count = page.nodes.len();
        all.extend(page.nodes);

        tracing::debug!(
            collection = %collection,
            offset,
            count,
            total = all.len(),
            "Fetched page"
        );
        emit(
            on_progress,
            SyncProgress::FetchedPage {
                collection: collection.clone(),
                offset,
                count,
                total_so_far: all.len(),
                total_count: page.total_count,
            },
        );

        if count < page_size {
            break;
        }
        offset += page_size;
    }

    emit(
        on_progress,
        SyncProgress::FetchComplete {
            collection,
            total: all.len(),
        },
    );
    Ok(all)
}
