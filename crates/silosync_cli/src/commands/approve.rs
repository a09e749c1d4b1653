//! `silosync approve`: approve privacy requests in bulk.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use silosync::resources::{ApproveOptions, approve_requests};

use crate::CommonOptions;
use crate::commands::shared::{FailureRow, Settings, display_failures};
use crate::config::Config;
use crate::progress::ProgressReporter;

pub(crate) async fn handle_approve(
    actions: Vec<String>,
    silent_mode_before: Option<DateTime<Utc>>,
    common: &CommonOptions,
    config: &Config,
) -> Result<bool, Box<dyn std::error::Error>> {
    if common.dry_run {
        return Err("--dry-run is not supported by approve".into());
    }

    let settings = Settings::resolve(common, config)?;
    let reporter = Arc::new(ProgressReporter::new());
    let client = settings.client(&reporter)?;
    let callback = reporter.as_callback();

    let options = ApproveOptions {
        actions,
        silent_mode_before,
        concurrency: settings.concurrency,
    };
    let outcome = approve_requests(&client, &options, Some(callback.as_ref())).await;
    reporter.finish();
    let outcome = outcome?;

    if reporter.is_interactive() {
        println!(
            "Approved {} of {} requests",
            outcome.succeeded.len(),
            outcome.attempted
        );
    }

    let rows: Vec<FailureRow> = outcome
        .failures
        .iter()
        .map(|f| FailureRow::new("requests", &f.key, &f.message))
        .collect();
    display_failures(&rows, reporter.is_interactive());
    Ok(outcome.is_success())
}
