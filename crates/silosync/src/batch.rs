use crate::error::{Result, SyncError};

/// Default number of entries sent in one write call.
pub const DEFAULT_WRITE_BATCH_LIMIT: usize = 20;

/// Split `items` into ordered chunks of at most `limit` entries.
///
/// Every chunk but the last holds exactly `limit` entries and concatenating
/// the chunks gives back `items`. An empty input yields no chunks.
pub fn chunk<T>(items: Vec<T>, limit: usize) -> Result<Vec<Vec<T>>> {
    if limit == 0 {
        return Err(SyncError::validation("batch limit must be greater than zero"));
    }

    let mut chunks = Vec::with_capacity(items.len().div_ceil(limit));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(limit).collect());
    }
    Ok(chunks)
}
