use silosync::sync::SyncProgress;

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, event: SyncProgress) {
        match event {
            SyncProgress::FetchingCollection {
                collection,
                page_size,
            } => {
                tracing::info!(collection = %collection, page_size, "Fetching collection");
            }

            SyncProgress::FetchedPage {
                collection,
                offset,
                count,
                total_so_far,
                total_count,
            } => {
                tracing::debug!(
                    collection = %collection,
                    offset,
                    count,
                    total_so_far,
                    total_count = ?total_count,
                    "Fetched page"
                );
            }

            SyncProgress::FetchComplete { collection, total } => {
                tracing::info!(collection = %collection, total, "Fetch complete");
            }

            SyncProgress::PlanReady {
                resource,
                to_create,
                to_update,
                dry_run,
            } => {
                tracing::info!(resource = %resource, to_create, to_update, dry_run, "Plan ready");
            }

            SyncProgress::CreatingBatch {
                resource,
                batch,
                batches,
                count,
            } => {
                tracing::debug!(resource = %resource, batch, batches, count, "Creating batch");
            }

            SyncProgress::CreatedBatch {
                resource,
                batch,
                created,
            } => {
                tracing::info!(resource = %resource, batch, created, "Created batch");
            }

            SyncProgress::RunStarted {
                label,
                total,
                concurrency,
            } => {
                tracing::info!(label = %label, total, concurrency, "Starting run");
            }

            SyncProgress::ItemCompleted {
                label,
                key,
                completed,
                total,
                error,
            } => match error {
                Some(error) => {
                    tracing::warn!(
                        label = %label,
                        key = %key,
                        completed,
                        total,
                        error = %error,
                        "Item failed"
                    );
                }
                None => {
                    tracing::debug!(label = %label, key = %key, completed, total, "Item done");
                }
            },

            SyncProgress::RunComplete {
                label,
                succeeded,
                failed,
            } => {
                tracing::info!(label = %label, succeeded, failed, "Run complete");
            }

            SyncProgress::SyncComplete {
                resource,
                succeeded,
                failed,
            } => {
                tracing::info!(resource = %resource, succeeded, failed, "Sync complete");
            }

            SyncProgress::RequestRetry {
                operation,
                attempt,
                max_attempts,
                error,
            } => {
                tracing::warn!(
                    operation = %operation,
                    attempt,
                    max_attempts,
                    error = %error,
                    "Retrying request"
                );
            }

            SyncProgress::RateLimitBackoff {
                operation,
                retry_after_ms,
                wait,
            } => {
                tracing::warn!(
                    operation = %operation,
                    retry_after_ms,
                    wait,
                    "Rate limited, backing off"
                );
            }

            SyncProgress::Warning { message } => {
                tracing::warn!(message = %message, "Warning");
            }

            _ => {}
        }
    }
}

impl Default for LoggingReporter {
    fn default() -> Self {
        Self::new()
    }
}
