use std::collections::HashMap;
use std::sync::Mutex;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use silosync::sync::SyncProgress;

/// Consolidated progress state to avoid multiple mutex locks.
#[derive(Default)]
struct ProgressState {
    /// Fetch bars by collection name.
    fetch_bars: HashMap<String, ProgressBar>,
    /// Create bars by resource name.
    create_bars: HashMap<String, ProgressBar>,
    /// Run bars by run label.
    run_bars: HashMap<String, ProgressBar>,
}

/// Interactive progress reporter using indicatif.
pub struct InteractiveReporter {
    multi: MultiProgress,
    state: Mutex<ProgressState>,
}

impl InteractiveReporter {
    pub fn new() -> Self {
        Self::with_multi(MultiProgress::new())
    }

    fn with_multi(multi: MultiProgress) -> Self {
        Self {
            multi,
            state: Mutex::new(ProgressState::default()),
        }
    }

    fn println(&self, line: String) {
        // Only fails when the draw target is hidden
        let _ = self.multi.println(line);
    }

    pub fn handle(&self, event: SyncProgress) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        match event {
            SyncProgress::FetchingCollection { collection, .. } => {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.set_style(Self::counter_style());
                bar.enable_steady_tick(std::time::Duration::from_millis(100));
                bar.set_prefix(format!("{:12}", collection));
                bar.set_message("fetching...");
                state.fetch_bars.insert(collection, bar);
            }

            SyncProgress::FetchedPage {
                collection,
                total_so_far,
                total_count,
                ..
            } => {
                if let Some(bar) = state.fetch_bars.get(&collection) {
                    if let Some(total) = total_count
                        && bar.length() != Some(total)
                    {
                        bar.disable_steady_tick();
                        bar.set_length(total);
                        bar.set_style(Self::bar_style());
                    }
                    bar.set_position(total_so_far as u64);
                }
            }

            SyncProgress::FetchComplete { collection, total } => {
                if let Some(bar) = state.fetch_bars.remove(&collection) {
                    bar.finish_with_message(format!("fetched {}", total));
                }
            }

            SyncProgress::PlanReady {
                resource,
                to_create,
                to_update,
                dry_run,
            } => {
                let prefix = if dry_run { "[dry run] " } else { "" };
                self.println(format!(
                    "{}{}: {} to create, {} to update",
                    prefix,
                    style(&resource).bold(),
                    to_create,
                    to_update
                ));
            }

            SyncProgress::CreatingBatch {
                resource,
                batch,
                batches,
                count,
            } => {
                let bar = state.create_bars.entry(resource.clone()).or_insert_with(|| {
                    let bar = self.multi.add(ProgressBar::new(batches as u64));
                    bar.set_style(Self::bar_style());
                    bar.set_prefix(format!("{:12}", "Creating"));
                    bar
                });
                bar.set_message(format!("{} batch {} ({} entries)", resource, batch, count));
            }

            SyncProgress::CreatedBatch { resource, .. } => {
                if let Some(bar) = state.create_bars.get(&resource) {
                    bar.inc(1);
                    if bar.length().is_some_and(|len| bar.position() >= len) {
                        bar.finish_with_message(format!("{} created", resource));
                    }
                }
            }

            SyncProgress::RunStarted { label, total, .. } => {
                let bar = self.multi.add(ProgressBar::new(total as u64));
                bar.set_style(Self::bar_style());
                bar.set_prefix(format!("{:12}", "Running"));
                bar.set_message(label.clone());
                state.run_bars.insert(label, bar);
            }

            SyncProgress::ItemCompleted {
                label,
                key,
                completed,
                error,
                ..
            } => {
                if let Some(bar) = state.run_bars.get(&label) {
                    bar.set_position(completed as u64);
                }
                if let Some(error) = error {
                    self.println(format!("  {} {}: {}", style("✗").red(), key, error));
                }
            }

            SyncProgress::RunComplete {
                label,
                succeeded,
                failed,
            } => {
                if let Some(bar) = state.run_bars.remove(&label) {
                    bar.finish_with_message(format!(
                        "{}: {} ok, {} failed",
                        label, succeeded, failed
                    ));
                }
            }

            SyncProgress::SyncComplete {
                resource,
                succeeded,
                failed,
            } => {
                state.create_bars.remove(&resource);
                let mark = if failed == 0 {
                    style("✓").green()
                } else {
                    style("✗").red()
                };
                self.println(format!(
                    "{} {}: {} synced, {} failed",
                    mark, resource, succeeded, failed
                ));
            }

            SyncProgress::RequestRetry {
                operation,
                attempt,
                max_attempts,
                error,
            } => {
                self.println(format!(
                    "  {} {} attempt {}/{} failed: {}",
                    style("!").yellow(),
                    operation,
                    attempt,
                    max_attempts,
                    error
                ));
            }

            SyncProgress::RateLimitBackoff {
                operation,
                retry_after_ms,
                ..
            } => {
                self.println(format!(
                    "  {} {} rate limited, waiting {:.1}s",
                    style("!").yellow(),
                    operation,
                    retry_after_ms as f64 / 1000.0
                ));
            }

            SyncProgress::Warning { message } => {
                self.println(format!("  {} {}", style("!").yellow(), message));
            }

            _ => {}
        }
    }

    /// Finish every bar still on screen.
    pub fn finish(&self) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let state = &mut *guard;
        for (_, bar) in state
            .fetch_bars
            .drain()
            .chain(state.create_bars.drain())
            .chain(state.run_bars.drain())
        {
            bar.finish();
        }
    }

    fn counter_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.cyan} {spinner:.green} {pos:>4} {msg}")
            .expect("Invalid template")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {pos:>3}/{len:3} {msg}")
            .expect("Invalid template")
            .progress_chars("█▓░")
    }
}

impl Default for InteractiveReporter {
    fn default() -> Self {
        Self::new()
    }
}
