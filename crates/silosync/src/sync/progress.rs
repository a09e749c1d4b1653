//! Progress reporting types for sync operations.
//!
//! Every long-running operation in the library (pagination, batched writes,
//! bounded fan-out, request retries) reports through the same event type so
//! the CLI can render either progress bars or structured log lines.

/// Progress events emitted during fetch and sync operations.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SyncProgress {
    /// Starting to paginate through a remote collection.
    FetchingCollection {
        /// Name of the collection (GraphQL root field).
        collection: String,
        /// Page size used for every request.
        page_size: usize,
    },

    /// Fetched one page of a remote collection.
    FetchedPage {
        /// Name of the collection.
        collection: String,
        /// Offset the page was requested at.
        offset: usize,
        /// Number of nodes on this page.
        count: usize,
        /// Running total of nodes fetched so far.
        total_so_far: usize,
        /// Total size reported by the server, if any.
        total_count: Option<u64>,
    },

    /// Finished paginating a remote collection.
    FetchComplete {
        /// Name of the collection.
        collection: String,
        /// Total number of nodes fetched.
        total: usize,
    },

    /// Desired state has been partitioned against the remote index.
    PlanReady {
        /// Resource being synced.
        resource: String,
        /// Entries missing remotely.
        to_create: usize,
        /// Entries that already exist remotely.
        to_update: usize,
        /// Whether this is a dry run.
        dry_run: bool,
    },

    /// Sending one create batch.
    CreatingBatch {
        /// Resource being synced.
        resource: String,
        /// 1-based batch number.
        batch: usize,
        /// Total number of create batches.
        batches: usize,
        /// Number of entries in this batch.
        count: usize,
    },

    /// A create batch completed.
    CreatedBatch {
        /// Resource being synced.
        resource: String,
        /// 1-based batch number.
        batch: usize,
        /// Number of identities the remote returned.
        created: usize,
    },

    /// Starting a bounded-concurrency run.
    RunStarted {
        /// What the run is doing (e.g. "update data silos").
        label: String,
        /// Number of items to process.
        total: usize,
        /// Concurrency ceiling.
        concurrency: usize,
    },

    /// One item of a bounded-concurrency run settled.
    ItemCompleted {
        /// Label of the run.
        label: String,
        /// Key of the item that settled.
        key: String,
        /// Number of items settled so far (monotonic).
        completed: usize,
        /// Total number of items in the run.
        total: usize,
        /// Error message if the item failed.
        error: Option<String>,
    },

    /// A bounded-concurrency run finished.
    RunComplete {
        /// Label of the run.
        label: String,
        /// Number of items that succeeded.
        succeeded: usize,
        /// Number of items that failed.
        failed: usize,
    },

    /// A resource sync finished.
    SyncComplete {
        /// Resource that was synced.
        resource: String,
        /// Number of entries synced successfully.
        succeeded: usize,
        /// Number of entries that failed.
        failed: usize,
    },

    /// A request failed and is being retried.
    RequestRetry {
        /// Operation name of the request.
        operation: String,
        /// Attempt that just failed (1-based).
        attempt: u32,
        /// Attempt ceiling.
        max_attempts: u32,
        /// Short error message.
        error: String,
    },

    /// Rate limited, sleeping before the next attempt.
    RateLimitBackoff {
        /// Operation name of the request.
        operation: String,
        /// Time to wait before retry (ms).
        retry_after_ms: u64,
        /// Number of consecutive rate-limit waits so far.
        wait: u32,
    },

    /// Warning message (non-fatal).
    Warning {
        /// Warning message.
        message: String,
    },
}

/// Callback for progress updates during sync operations.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Emit a progress event if a callback is provided.
///
/// # Example
///
/// ```ignore
/// use silosync::sync::{emit, SyncProgress, ProgressCallback};
///
/// fn my_fetch(on_progress: Option<&ProgressCallback>) {
///     emit(
///         on_progress,
///         SyncProgress::FetchComplete { collection: "dataSilos".into(), total: 42 },
///     );
/// }
/// ```
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: SyncProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}
