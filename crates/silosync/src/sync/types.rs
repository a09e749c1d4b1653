//! Shared sync types and constants for every resource.

use async_trait::async_trait;

use super::index::RemoteIndex;
use crate::batch::DEFAULT_WRITE_BATCH_LIMIT;
use crate::error::Result;
use crate::paginate::{DEFAULT_PAGE_SIZE, Filters, PageSource};

/// Default concurrency for update batches (one at a time).
pub const DEFAULT_UPDATE_CONCURRENCY: usize = 1;

/// Default concurrency for per-item fan-out such as request approval.
pub const DEFAULT_CONCURRENCY: usize = 100;

/// A local entry identified by a stable natural key (title, name, ...).
pub trait NaturalKey {
    fn natural_key(&self) -> &str;
}

/// A remote entity: a natural key plus the server-assigned id.
pub trait RemoteEntity: NaturalKey {
    fn remote_id(&self) -> &str;
}

/// Identity of a remote entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteRef {
    pub id: String,
    pub key: String,
}

impl RemoteRef {
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
        }
    }

    pub fn of<R: RemoteEntity + ?Sized>(entity: &R) -> Self {
        Self::new(entity.remote_id(), entity.natural_key())
    }
}

/// What to do when the remote snapshot holds the same key twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicateKeyPolicy {
    /// Abort the sync with an error naming the key.
    #[default]
    Reject,
    /// Keep the entity that appears last in remote order.
    LastWins,
}

/// Options for syncing one resource.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Page size for the remote snapshot.
    pub page_size: usize,
    /// Maximum entries per create / update call.
    pub batch_limit: usize,
    /// Maximum update batches in flight.
    pub update_concurrency: usize,
    /// Dry run mode - compute the plan, send no writes.
    pub dry_run: bool,
    /// Duplicate remote key handling.
    pub duplicate_keys: DuplicateKeyPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            batch_limit: DEFAULT_WRITE_BATCH_LIMIT,
            update_concurrency: DEFAULT_UPDATE_CONCURRENCY,
            dry_run: false,
            duplicate_keys: DuplicateKeyPolicy::default(),
        }
    }
}

/// Desired entries partitioned against the remote index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Keys missing remotely, in desired order.
    pub to_create: Vec<String>,
    /// Keys that already exist remotely, in desired order.
    pub to_update: Vec<String>,
}

/// A desired entry that could not be synced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFailure {
    pub key: String,
    pub message: String,
}

/// Per-entry result of a sync.
///
/// `succeeded + failures.len() == attempted` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<KeyFailure>,
}

impl SyncOutcome {
    pub(crate) fn from_failures(attempted: usize, failures: Vec<KeyFailure>) -> Self {
        Self {
            attempted,
            succeeded: attempted.saturating_sub(failures.len()),
            failures,
        }
    }
}

/// Result of syncing one resource.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Resource name (e.g. "data silos").
    pub resource: String,
    /// How desired state was partitioned.
    pub plan: SyncPlan,
    /// Number of entities created.
    pub created: usize,
    /// Remote index after the create phase.
    pub index: RemoteIndex,
    /// Per-entry outcome of the update phase.
    pub outcome: SyncOutcome,
    /// Whether this was a dry run.
    pub dry_run: bool,
}

impl SyncReport {
    /// `true` iff no entry failed.
    #[must_use]
    pub fn success(&self) -> bool {
        self.outcome.failures.is_empty()
    }
}

/// A remote resource that can be reconciled against desired state.
///
/// The engine fetches [`snapshot`](Self::snapshot), creates the entries
/// missing from it in batches, then updates every desired entry in
/// batches.
#[async_trait]
pub trait SyncTarget: Send + Sync + 'static {
    /// Local desired-state entry.
    type Desired: NaturalKey + Clone + Send + Sync + 'static;
    /// Remote entity as returned by the snapshot.
    type Remote: RemoteEntity + Send + 'static;

    /// Human-readable name used in logs and progress.
    fn resource_name(&self) -> &str;

    /// Paginated source of the remote snapshot.
    fn snapshot(&self) -> &dyn PageSource<Self::Remote>;

    /// Filters applied to the snapshot.
    fn snapshot_filters(&self) -> Filters {
        Filters::new()
    }

    /// Target-specific checks on the whole desired set, run before any request.
    fn validate(&self, _desired: &[Self::Desired]) -> Result<()> {
        Ok(())
    }

    /// Create every entry of `batch`, returning the identities assigned.
    ///
    /// Entries left out of the result are recorded as failures of the sync.
    async fn create_batch(&self, batch: Vec<Self::Desired>) -> Result<Vec<RemoteRef>>;

    /// Update every entry of `batch` in place.
    async fn update_batch(&self, batch: Vec<(RemoteRef, Self::Desired)>) -> Result<()>;
}
