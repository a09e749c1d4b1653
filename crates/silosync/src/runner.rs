//! Bounded-concurrency execution of independent async operations.
//!
//! Items are started in input order with at most `concurrency` workers in
//! flight; each time one settles, the next pending item starts. Two modes:
//!
//! - [`run_all_fail_fast`] returns the first failure. Pending items are never
//!   started; workers already in flight are detached and left to finish,
//!   their results discarded.
//! - [`run_all_collect`] records every failure against the item's key and
//!   always runs every item.
//!
//! Worker panics are caught and reported like failures.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::error::{Result, SyncError, short_error_message};
use crate::sync::{ProgressCallback, SyncProgress, emit};

/// A failed item of a collect-errors run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Position of the item in the input.
    pub index: usize,
    /// Key the item was reported under.
    pub key: String,
    /// One-line error message.
    pub message: String,
}

/// Aggregate result of a collect-errors run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome<R> {
    /// Number of items run.
    pub attempted: usize,
    /// Successful results as `(key, value)`, in input order.
    pub succeeded: Vec<(String, R)>,
    /// Failures, in input order.
    pub failures: Vec<ItemFailure>,
}

impl<R> RunOutcome<R> {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_keys(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.key.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    FailFast,
    CollectErrors,
}

struct Settled<R> {
    index: usize,
    key: String,
    result: Result<R>,
}

/// Run `worker` over every item, stopping at the first failure.
///
/// On success the results are returned in input order.
pub async fn run_all_fail_fast<T, R, F, Fut, K>(
    label: &str,
    items: Vec<T>,
    concurrency: usize,
    key_fn: K,
    worker: F,
    on_progress: Option<&ProgressCallback>,
) -> Result<Vec<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    K: Fn(&T) -> String,
{
    let outcome = drive(
        label,
        items,
        concurrency,
        key_fn,
        worker,
        RunMode::FailFast,
        on_progress,
    )
    .await?;
    Ok(outcome.succeeded.into_iter().map(|(_, value)| value).collect())
}

/// Run `worker` over every item, recording failures instead of stopping.
///
/// Only an invalid `concurrency` makes this return `Err`.
pub async fn run_all_collect<T, R, F, Fut, K>(
    label: &str,
    items: Vec<T>,
    concurrency: usize,
    key_fn: K,
    worker: F,
    on_progress: Option<&ProgressCallback>,
) -> Result<RunOutcome<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    K: Fn(&T) -> String,
{
    drive(
        label,
        items,
        concurrency,
        key_fn,
        worker,
        RunMode::CollectErrors,
        on_progress,
    )
    .await
}

async fn drive<T, R, F, Fut, K>(
    label: &str,
    items: Vec<T>,
    concurrency: usize,
    key_fn: K,
    worker: F,
    mode: RunMode,
    on_progress: Option<&ProgressCallback>,
) -> Result<RunOutcome<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    K: Fn(&T) -> String,
{
    if concurrency == 0 {
        return Err(SyncError::validation("concurrency must be greater than zero"));
    }

    let total = items.len();
    emit(
        on_progress,
        SyncProgress::RunStarted {
            label: label.to_string(),
            total,
            concurrency,
        },
    );

    let worker = Arc::new(worker);
    let mut pending = items.into_iter().enumerate();
    let mut join_set: JoinSet<Settled<R>> = JoinSet::new();
    let mut completed = 0usize;
    let mut succeeded: Vec<(usize, String, R)> = Vec::with_capacity(total);
    let mut failures: Vec<ItemFailure> = Vec::new();

    loop {
        while join_set.len() < concurrency
            && let Some((index, item)) = pending.next()
        {
            let key = key_fn(&item);
            let worker = Arc::clone(&worker);
            join_set.spawn(async move {
                // Inner task so a panicking worker still reports its key.
                let result = match tokio::spawn(async move { worker(item).await }).await {
                    Ok(result) => result,
                    Err(e) => Err(SyncError::internal(format!("worker panicked: {}", e))),
                };
                Settled { index, key, result }
            });
        }

        let Some(joined) = join_set.join_next().await else {
            break;
        };
        let settled = joined
            .map_err(|e| SyncError::internal(format!("{} task failed: {}", label, e)))?;
        completed += 1;

        match settled.result {
            Ok(value) => {
                emit(
                    on_progress,
                    SyncProgress::ItemCompleted {
                        label: label.to_string(),
                        key: settled.key.clone(),
                        completed,
                        total,
                        error: None,
                    },
                );
                succeeded.push((settled.index, settled.key, value));
            }
            Err(error) => {
                let message = short_error_message(&error);
                emit(
                    on_progress,
                    SyncProgress::ItemCompleted {
                        label: label.to_string(),
                        key: settled.key.clone(),
                        completed,
                        total,
                        error: Some(message.clone()),
                    },
                );

                if mode == RunMode::FailFast {
                    let in_flight = join_set.len();
                    join_set.detach_all();
                    tracing::debug!(
                        label,
                        key = %settled.key,
                        in_flight,
                        "Stopping run at first failure"
                    );
                    return Err(error);
                }

                tracing::warn!(label, key = %settled.key, "{}", message);
                failures.push(ItemFailure {
                    index: settled.index,
                    key: settled.key,
                    message,
                });
            }
        }
    }

    succeeded.sort_by_key(|(index, _, _)| *index);
    failures.sort_by_key(|f| f.index);

    emit(
        on_progress,
        SyncProgress::RunComplete {
            label: label.to_string(),
            succeeded: succeeded.len(),
            failed: failures.len(),
        },
    );

    Ok(RunOutcome {
        attempted: total,
        succeeded: succeeded
            .into_iter()
            .map(|(_, key, value)| (key, value))
            .collect(),
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
        started: AtomicUsize,
    }

    impl Gauge {
        fn enter(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn key(n: &u32) -> String {
        format!("item-{}", n)
    }

    async fn run_collect_at(concurrency: usize) -> (RunOutcome<u32>, usize) {
        let gauge = Arc::new(Gauge::default());
        let g = Arc::clone(&gauge);
        let outcome = run_all_collect(
            "test",
            (0..50u32).collect(),
            concurrency,
            key,
            move |n| {
                let g = Arc::clone(&g);
                async move {
                    g.enter();
                    tokio::time::sleep(Duration::from_millis(u64::from(n % 3) + 1)).await;
                    g.exit();
                    if n % 7 == 0 {
                        Err(SyncError::internal(format!("{} failed", n)))
                    } else {
                        Ok(n * 2)
                    }
                }
            },
            None,
        )
        .await
        .expect("collect never errors");
        (outcome, gauge.peak.load(Ordering::SeqCst))
    }

    #[tokio::test(start_paused = true)]
    async fn collect_mode_failed_set_is_independent_of_concurrency() {
        let expected: BTreeSet<String> = (0..50u32)
            .filter(|n| n % 7 == 0)
            .map(|n| key(&n))
            .collect();

        for ceiling in [1, 5, 100] {
            let (outcome, peak) = run_collect_at(ceiling).await;
            let failed: BTreeSet<String> = outcome.failed_keys().map(str::to_string).collect();
            assert_eq!(failed, expected, "ceiling {ceiling}");
            assert_eq!(outcome.attempted, 50);
            assert_eq!(outcome.succeeded.len() + outcome.failures.len(), 50);
            assert!(peak <= ceiling, "peak {peak} > ceiling {ceiling}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn collect_mode_results_are_in_input_order() {
        let (outcome, _) = run_collect_at(5).await;
        let indices: Vec<usize> = outcome.failures.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![0, 7, 14, 21, 28, 35, 42, 49]);
        assert_eq!(outcome.succeeded.first(), Some(&("item-1".to_string(), 2)));
        assert!(outcome.failures[1].message.contains("7 failed"));
    }

    #[tokio::test]
    async fn fail_fast_does_not_start_pending_items() {
        let gauge = Arc::new(Gauge::default());
        let g = Arc::clone(&gauge);
        let err = run_all_fail_fast(
            "test",
            (0..10u32).collect(),
            1,
            key,
            move |n| {
                let g = Arc::clone(&g);
                async move {
                    g.enter();
                    g.exit();
                    if n == 3 {
                        Err(SyncError::internal("boom"))
                    } else {
                        Ok(n)
                    }
                }
            },
            None,
        )
        .await
        .expect_err("should stop");

        assert_eq!(err.to_string(), "Internal error: boom");
        assert_eq!(gauge.started.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn fail_fast_success_keeps_input_order() {
        let values = run_all_fail_fast(
            "test",
            vec![30u64, 10, 20],
            3,
            |n| n.to_string(),
            |n| async move {
                tokio::time::sleep(Duration::from_millis(n)).await;
                Ok(n)
            },
            None,
        )
        .await
        .expect("should succeed");
        assert_eq!(values, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected() {
        let err = run_all_collect("test", vec![1u32], 0, key, |n| async move { Ok(n) }, None)
            .await
            .expect_err("should reject");
        assert!(matches!(err, SyncError::Validation { .. }));
    }

    #[tokio::test]
    async fn panics_become_failures() {
        let outcome = run_all_collect(
            "test",
            vec![1u32, 2, 3],
            2,
            key,
            |n| async move {
                assert_ne!(n, 2, "worker blew up");
                Ok(n)
            },
            None,
        )
        .await
        .expect("collect never errors");
        assert_eq!(outcome.failed_keys().collect::<Vec<_>>(), vec!["item-2"]);
        assert!(outcome.failures[0].message.contains("panicked"));

        let err = run_all_fail_fast(
            "test",
            vec![2u32],
            1,
            key,
            |n| async move {
                assert_ne!(n, 2, "worker blew up");
                Ok(n)
            },
            None,
        )
        .await
        .expect_err("panic is terminal");
        assert!(err.to_string().contains("panicked"));
    }

    #[tokio::test]
    async fn empty_input_completes_immediately() {
        let outcome = run_all_collect(
            "test",
            Vec::<u32>::new(),
            4,
            key,
            |n| async move { Ok(n) },
            None,
        )
        .await
        .expect("ok");
        assert_eq!(outcome.attempted, 0);
        assert!(outcome.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn completion_counter_increments_once_per_item() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let capture = Arc::clone(&events);
        let callback: ProgressCallback = Box::new(move |e| {
            capture.lock().unwrap_or_else(|e| e.into_inner()).push(e);
        });

        run_all_collect(
            "test",
            (0..12u32).collect(),
            4,
            key,
            |n| async move {
                tokio::time::sleep(Duration::from_millis(u64::from(12 - n))).await;
                Ok(n)
            },
            Some(&callback),
        )
        .await
        .expect("ok");

        let events = events.lock().unwrap_or_else(|e| e.into_inner());
        let counters: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                SyncProgress::ItemCompleted { completed, .. } => Some(*completed),
                _ => None,
            })
            .collect();
        assert_eq!(counters, (1..=12).collect::<Vec<_>>());
        assert!(matches!(
            events.last(),
            Some(SyncProgress::RunComplete { succeeded: 12, failed: 0, .. })
        ));
    }
}
