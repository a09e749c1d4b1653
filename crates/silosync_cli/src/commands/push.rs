//! `silosync push`: sync manifest resources to the remote API.

use std::path::PathBuf;
use std::sync::Arc;

use console::style;
use silosync::manifest::{Variables, load_manifests, parse_variables};
use silosync::resources::{PushOptions, PushResult, push_manifest};
use silosync::sync::{DEFAULT_UPDATE_CONCURRENCY, SyncOptions};

use crate::CommonOptions;
use crate::commands::shared::{FailureRow, Settings, display_failures};
use crate::config::Config;
use crate::progress::ProgressReporter;

/// Handle `push`. Returns `false` when anything failed.
pub(crate) async fn handle_push(
    files: &[PathBuf],
    variables: Option<&str>,
    update_concurrency: Option<usize>,
    common: &CommonOptions,
    config: &Config,
) -> Result<bool, Box<dyn std::error::Error>> {
    let variables = match variables {
        Some(list) => parse_variables(list)?,
        None => Variables::new(),
    };
    let manifest = load_manifests(files, &variables)?;
    if manifest.is_empty() {
        tracing::warn!("Nothing to push: manifest has no entries");
        return Ok(true);
    }

    let settings = Settings::resolve(common, config)?;
    let reporter = Arc::new(ProgressReporter::new());
    let client = settings.client(&reporter)?;
    let callback = reporter.as_callback();

    let options = push_options(&settings, update_concurrency);
    let result = push_manifest(&client, manifest, &options, Some(callback.as_ref())).await;
    reporter.finish();

    let is_tty = reporter.is_interactive();
    print_summary(&result, is_tty);
    display_failures(&failure_rows(&result), is_tty);
    Ok(result.success())
}

fn push_options(settings: &Settings, update_concurrency: Option<usize>) -> PushOptions {
    PushOptions {
        sync: SyncOptions {
            page_size: settings.page_size,
            batch_limit: settings.batch_limit,
            update_concurrency: update_concurrency.unwrap_or(DEFAULT_UPDATE_CONCURRENCY),
            dry_run: settings.dry_run,
            ..SyncOptions::default()
        },
        concurrency: settings.concurrency,
    }
}

fn print_summary(result: &PushResult, is_tty: bool) {
    for report in &result.reports {
        if is_tty {
            let verb = if report.dry_run { "would create" } else { "created" };
            println!(
                "{} {}: {} {}, {} updated, {} failed",
                style("→").cyan(),
                style(&report.resource).bold(),
                verb,
                if report.dry_run {
                    report.plan.to_create.len()
                } else {
                    report.created
                },
                report.outcome.succeeded,
                report.outcome.failures.len()
            );
        } else {
            tracing::info!(
                resource = %report.resource,
                created = report.created,
                to_create = report.plan.to_create.len(),
                updated = report.outcome.succeeded,
                failed = report.outcome.failures.len(),
                dry_run = report.dry_run,
                "Push finished"
            );
        }
    }
    for step in &result.steps {
        if is_tty {
            println!(
                "{} {}: {} synced, {} failed",
                style("→").cyan(),
                style(&step.resource).bold(),
                step.outcome.succeeded,
                step.outcome.failures.len()
            );
        } else {
            tracing::info!(
                resource = %step.resource,
                synced = step.outcome.succeeded,
                failed = step.outcome.failures.len(),
                "Push step finished"
            );
        }
    }
}

fn failure_rows(result: &PushResult) -> Vec<FailureRow> {
    let mut rows: Vec<FailureRow> = result
        .reports
        .iter()
        .flat_map(|report| {
            report
                .outcome
                .failures
                .iter()
                .map(|f| FailureRow::new(&report.resource, &f.key, &f.message))
        })
        .collect();
    rows.extend(result.steps.iter().flat_map(|step| {
        step.outcome
            .failures
            .iter()
            .map(|f| FailureRow::new(&step.resource, &f.key, &f.message))
    }));
    rows.extend(
        result
            .aborted
            .iter()
            .map(|a| FailureRow::new(&a.resource, "-", &a.message)),
    );
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use silosync::resources::{AbortedSync, StepReport};
    use silosync::sync::{KeyFailure, SyncOutcome};

    #[test]
    fn aborted_resources_are_listed_after_key_failures() {
        let result = PushResult {
            reports: Vec::new(),
            steps: Vec::new(),
            aborted: vec![AbortedSync {
                resource: "enrichers".into(),
                message: "Validation error: unknown identifier".into(),
            }],
        };
        let rows = failure_rows(&result);
        assert_eq!(
            rows,
            vec![FailureRow::new(
                "enrichers",
                "-",
                "Validation error: unknown identifier"
            )]
        );
        assert!(!result.success());
    }

    #[test]
    fn step_failures_are_listed_by_key() {
        let result = PushResult {
            reports: Vec::new(),
            steps: vec![StepReport {
                resource: "datapoints".into(),
                outcome: SyncOutcome {
                    attempted: 2,
                    succeeded: 1,
                    failures: vec![KeyFailure {
                        key: "Postgres/users".into(),
                        message: "Invalid path".into(),
                    }],
                },
            }],
            aborted: Vec::new(),
        };
        assert_eq!(
            failure_rows(&result),
            vec![FailureRow::new("datapoints", "Postgres/users", "Invalid path")]
        );
        assert!(!result.success());
    }

    #[test]
    fn concurrency_setting_reaches_push_options() {
        let mut config = Config::default();
        config.api.key = Some("k".into());
        config.sync.concurrency = 3;
        let settings = Settings::resolve(&CommonOptions::default(), &config).expect("settings");

        let options = push_options(&settings, Some(2));
        assert_eq!(options.concurrency, 3);
        assert_eq!(options.sync.update_concurrency, 2);
        assert_eq!(push_options(&settings, None).sync.update_concurrency, 1);
    }
}
