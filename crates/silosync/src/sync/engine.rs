//! Sync engine: reconcile desired state against a remote collection.
//!
//! 1. Fetch the remote snapshot page by page.
//! 2. Index it by natural key.
//! 3. Partition desired entries into "create" and "update".
//! 4. Create missing entries in sequential batches, merging the returned
//!    identities into the index.
//! 5. Update every desired entry in batches, recording failed batches
//!    against each of their keys.
//!
//! Snapshot and create failures abort the sync. Update failures do not.

use std::collections::HashSet;
use std::sync::Arc;

use super::index::RemoteIndex;
use super::progress::{ProgressCallback, SyncProgress, emit};
use super::types::{
    KeyFailure, NaturalKey, RemoteRef, SyncOptions, SyncOutcome, SyncPlan, SyncReport, SyncTarget,
};
use crate::batch::chunk;
use crate::error::{Result, SyncError};
use crate::paginate::fetch_all;
use crate::runner::run_all_collect;

/// Reject desired state that cannot be reconciled.
///
/// Keys must be non-empty and unique.
pub fn validate_desired<D: NaturalKey>(resource: &str, desired: &[D]) -> Result<()> {
    let mut seen = HashSet::with_capacity(desired.len());
    for (position, entry) in desired.iter().enumerate() {
        let key = entry.natural_key();
        if key.trim().is_empty() {
            return Err(SyncError::validation(format!(
                "{} entry #{} has an empty key",
                resource,
                position + 1
            )));
        }
        if !seen.insert(key) {
            return Err(SyncError::validation(format!(
                "{} \"{}\" is listed more than once",
                resource, key
            )));
        }
    }
    Ok(())
}

fn validate_options(options: &SyncOptions) -> Result<()> {
    if options.page_size == 0 {
        return Err(SyncError::validation("page size must be greater than zero"));
    }
    if options.batch_limit == 0 {
        return Err(SyncError::validation("batch limit must be greater than zero"));
    }
    if options.update_concurrency == 0 {
        return Err(SyncError::validation(
            "update concurrency must be greater than zero",
        ));
    }
    Ok(())
}

/// Partition desired entries against the index, keeping desired order.
pub fn plan<D: NaturalKey>(desired: &[D], index: &RemoteIndex) -> SyncPlan {
    let (to_update, to_create): (Vec<&D>, Vec<&D>) = desired
        .iter()
        .partition(|entry| index.contains(entry.natural_key()));
    SyncPlan {
        to_create: to_create
            .into_iter()
            .map(|e| e.natural_key().to_string())
            .collect(),
        to_update: to_update
            .into_iter()
            .map(|e| e.natural_key().to_string())
            .collect(),
    }
}

/// Sync `desired` into the remote resource behind `target`.
///
/// # Arguments
///
/// * `target` - The remote resource
/// * `desired` - Desired entries; keys must be unique and non-empty
/// * `options` - Page size, batch limit, update concurrency, dry run
/// * `on_progress` - Optional callback for progress updates
///
/// # Returns
///
/// A report whose outcome lists every entry that failed to update. `Err` is
/// returned only for validation errors and for failures of the snapshot or
/// create phases. Validation runs before the first request.
#[tracing::instrument(
    skip_all,
    fields(resource = %target.resource_name(), desired = desired.len(), dry_run = options.dry_run)
)]
pub async fn sync<T: SyncTarget>(
    target: Arc<T>,
    desired: Vec<T::Desired>,
    options: &SyncOptions,
    on_progress: Option<&ProgressCallback>,
) -> Result<SyncReport> {
    let resource = target.resource_name().to_string();
    validate_options(options)?;
    validate_desired(&resource, &desired)?;
    target.validate(&desired)?;

    let remote = fetch_all(
        target.snapshot(),
        &target.snapshot_filters(),
        options.page_size,
        on_progress,
    )
    .await?;
    let index = RemoteIndex::from_snapshot(
        target.snapshot().collection(),
        &remote,
        options.duplicate_keys,
    )?;
    drop(remote);

    let plan = plan(&desired, &index);
    tracing::info!(
        to_create = plan.to_create.len(),
        to_update = plan.to_update.len(),
        "Planned {} sync",
        resource
    );
    emit(
        on_progress,
        SyncProgress::PlanReady {
            resource: resource.clone(),
            to_create: plan.to_create.len(),
            to_update: plan.to_update.len(),
            dry_run: options.dry_run,
        },
    );

    if options.dry_run {
        emit(
            on_progress,
            SyncProgress::SyncComplete {
                resource: resource.clone(),
                succeeded: 0,
                failed: 0,
            },
        );
        return Ok(SyncReport {
            resource,
            plan,
            created: 0,
            index,
            outcome: SyncOutcome::default(),
            dry_run: true,
        });
    }

    let to_create: Vec<T::Desired> = desired
        .iter()
        .filter(|entry| !index.contains(entry.natural_key()))
        .cloned()
        .collect();
    let (index, created) =
        create_missing(target.as_ref(), &resource, to_create, index, options, on_progress).await?;

    let outcome = update_all(target, &resource, desired, &index, options, on_progress).await?;

    tracing::info!(
        created,
        succeeded = outcome.succeeded,
        failed = outcome.failures.len(),
        "Finished {} sync",
        resource
    );
    emit(
        on_progress,
        SyncProgress::SyncComplete {
            resource: resource.clone(),
            succeeded: outcome.succeeded,
            failed: outcome.failures.len(),
        },
    );

    Ok(SyncReport {
        resource,
        plan,
        created,
        index,
        outcome,
        dry_run: false,
    })
}

/// Create phase: sequential batches, each merged into a new index.
async fn create_missing<T: SyncTarget>(
    target: &T,
    resource: &str,
    to_create: Vec<T::Desired>,
    mut index: RemoteIndex,
    options: &SyncOptions,
    on_progress: Option<&ProgressCallback>,
) -> Result<(RemoteIndex, usize)> {
    let batches = chunk(to_create, options.batch_limit)?;
    let total_batches = batches.len();
    let mut created = 0;

    for (i, batch) in batches.into_iter().enumerate() {
        let batch_number = i + 1;
        emit(
            on_progress,
            SyncProgress::CreatingBatch {
                resource: resource.to_string(),
                batch: batch_number,
                batches: total_batches,
                count: batch.len(),
            },
        );
        tracing::debug!(
            batch = batch_number,
            batches = total_batches,
            count = batch.len(),
            "Creating {}",
            resource
        );

        let refs: Vec<RemoteRef> = target.create_batch(batch).await?;
        created += refs.len();
        emit(
            on_progress,
            SyncProgress::CreatedBatch {
                resource: resource.to_string(),
                batch: batch_number,
                created: refs.len(),
            },
        );
        index = index.with_created(refs);
    }

    Ok((index, created))
}

/// Update phase: every desired entry, batched, failures recorded per key.
async fn update_all<T: SyncTarget>(
    target: Arc<T>,
    resource: &str,
    desired: Vec<T::Desired>,
    index: &RemoteIndex,
    options: &SyncOptions,
    on_progress: Option<&ProgressCallback>,
) -> Result<SyncOutcome> {
    let attempted = desired.len();
    let mut failures = Vec::new();
    let mut resolved = Vec::with_capacity(attempted);

    for entry in desired {
        match index.get(entry.natural_key()) {
            Some(remote) => resolved.push((remote.clone(), entry)),
            None => {
                tracing::warn!(key = entry.natural_key(), "No remote id after create phase");
                failures.push(KeyFailure {
                    key: entry.natural_key().to_string(),
                    message: format!("{} was not returned by the create call", resource),
                });
            }
        }
    }

    let batches = chunk(resolved, options.batch_limit)?;
    let batch_keys: Vec<Vec<String>> = batches
        .iter()
        .map(|batch| batch.iter().map(|(remote, _)| remote.key.clone()).collect())
        .collect();

    let outcome = run_all_collect(
        &format!("update {}", resource),
        batches,
        options.update_concurrency,
        |batch| batch_label(batch),
        move |batch| {
            let target = Arc::clone(&target);
            async move { target.update_batch(batch).await }
        },
        on_progress,
    )
    .await?;

    for failure in outcome.failures {
        let keys = batch_keys.get(failure.index).cloned().unwrap_or_default();
        failures.extend(keys.into_iter().map(|key| KeyFailure {
            key,
            message: failure.message.clone(),
        }));
    }

    Ok(SyncOutcome::from_failures(attempted, failures))
}

fn batch_label<D>(batch: &[(RemoteRef, D)]) -> String {
    match (batch.first(), batch.last()) {
        (Some((first, _)), Some((last, _))) if batch.len() > 1 => {
            format!("{} .. {}", first.key, last.key)
        }
        (Some((first, _)), _) => first.key.clone(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Entry(&'static str);

    impl NaturalKey for Entry {
        fn natural_key(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn empty_and_duplicate_keys_are_rejected() {
        let err = validate_desired("data silos", &[Entry("A"), Entry(" ")])
            .expect_err("empty key");
        assert!(err.to_string().contains("#2"));

        let err = validate_desired("data silos", &[Entry("A"), Entry("B"), Entry("A")])
            .expect_err("duplicate");
        assert!(err.to_string().contains("\"A\""));

        assert!(validate_desired("data silos", &[Entry("A"), Entry("B")]).is_ok());
    }

    #[test]
    fn plan_partitions_in_desired_order() {
        let index = RemoteIndex::default().with_created([RemoteRef::new("1", "B")]);
        let plan = plan(&[Entry("C"), Entry("B"), Entry("A")], &index);
        assert_eq!(plan.to_create, vec!["C", "A"]);
        assert_eq!(plan.to_update, vec!["B"]);
    }

    #[test]
    fn zero_batch_limit_is_rejected() {
        let options = SyncOptions {
            batch_limit: 0,
            ..SyncOptions::default()
        };
        assert!(matches!(
            validate_options(&options),
            Err(SyncError::Validation { .. })
        ));
    }

    #[test]
    fn batch_label_names_first_and_last_key() {
        let batch = vec![
            (RemoteRef::new("1", "A"), ()),
            (RemoteRef::new("2", "B"), ()),
            (RemoteRef::new("3", "C"), ()),
        ];
        assert_eq!(batch_label(&batch), "A .. C");
        assert_eq!(batch_label(&batch[..1]), "A");
    }
}
