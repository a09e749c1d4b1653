use std::sync::Arc;
use std::time::Duration;

use console::style;
use silosync::{ApiRateLimiter, GraphQLClient, RetryConfig};
use tabled::Tabled;

use crate::CommonOptions;
use crate::config::Config;
use crate::progress::ProgressReporter;

/// Maximum failures listed in the summary table.
const MAX_DISPLAYED_FAILURES: usize = 50;

/// Connection and tuning settings after merging CLI flags over config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Settings {
    pub(crate) url: String,
    pub(crate) api_key: String,
    pub(crate) requests_per_second: u32,
    pub(crate) timeout: Duration,
    pub(crate) page_size: usize,
    pub(crate) batch_limit: usize,
    pub(crate) concurrency: usize,
    pub(crate) max_attempts: u32,
    pub(crate) no_rate_limit: bool,
    pub(crate) dry_run: bool,
}

impl Settings {
    /// CLI flags win over config values. An API key is required.
    pub(crate) fn resolve(
        common: &CommonOptions,
        config: &Config,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let api_key = common
            .auth
            .clone()
            .or_else(|| config.api.key.clone())
            .filter(|key| !key.trim().is_empty())
            .ok_or("No API key configured. Pass --auth or set SILOSYNC_API_KEY.")?;

        Ok(Self {
            url: common.url.clone().unwrap_or_else(|| config.api.url.clone()),
            api_key,
            requests_per_second: config.api.requests_per_second,
            timeout: Duration::from_secs(config.api.timeout_secs),
            page_size: common.page_size.unwrap_or(config.sync.page_size),
            batch_limit: common.batch_limit.unwrap_or(config.sync.batch_limit),
            concurrency: common.concurrency.unwrap_or(config.sync.concurrency),
            max_attempts: common.max_attempts.unwrap_or(config.sync.max_attempts),
            no_rate_limit: common.no_rate_limit || config.sync.no_rate_limit,
            dry_run: common.dry_run,
        })
    }

    /// Build a client reporting retries to `reporter`.
    pub(crate) fn client(
        &self,
        reporter: &Arc<ProgressReporter>,
    ) -> Result<GraphQLClient, Box<dyn std::error::Error>> {
        let mut client = GraphQLClient::new(&self.url, &self.api_key, self.timeout)?
            .with_retry_config(RetryConfig::new(self.max_attempts))
            .with_progress(reporter.as_callback());
        if let Some(limiter) = maybe_rate_limiter(self.no_rate_limit, self.requests_per_second) {
            client = client.with_rate_limiter(limiter);
        } else {
            warn_no_rate_limit(reporter.is_interactive());
        }
        Ok(client)
    }
}

/// Create a rate limiter if rate limiting is enabled.
/// Returns None if no_rate_limit is true, Some(limiter) otherwise.
pub(crate) fn maybe_rate_limiter(no_rate_limit: bool, rps: u32) -> Option<ApiRateLimiter> {
    if no_rate_limit {
        None
    } else {
        Some(ApiRateLimiter::new(rps))
    }
}

/// Print a warning when rate limiting is disabled (TTY only).
pub(crate) fn warn_no_rate_limit(is_tty: bool) {
    if is_tty {
        eprintln!("Warning: Rate limiting disabled - you may experience API throttling\n");
    }
}

/// One failed key for the summary table.
#[derive(Debug, Clone, PartialEq, Eq, Tabled)]
pub(crate) struct FailureRow {
    #[tabled(rename = "Resource")]
    pub(crate) resource: String,
    #[tabled(rename = "Key")]
    pub(crate) key: String,
    #[tabled(rename = "Error")]
    pub(crate) error: String,
}

impl FailureRow {
    pub(crate) fn new(
        resource: impl Into<String>,
        key: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            key: key.into(),
            error: error.into(),
        }
    }
}

/// Render the failures table (limited to the first rows).
pub(crate) fn failure_table(rows: &[FailureRow]) -> String {
    let shown = rows.iter().take(MAX_DISPLAYED_FAILURES).cloned();
    let mut table = tabled::Table::new(shown);
    table.with(tabled::settings::Style::rounded());
    let mut out = table.to_string();
    if rows.len() > MAX_DISPLAYED_FAILURES {
        out.push_str(&format!(
            "\n... and {} more failures",
            rows.len() - MAX_DISPLAYED_FAILURES
        ));
    }
    out
}

fn failure_heading(count: usize) -> String {
    style(format!("Failed ({} total):", count))
        .red()
        .bold()
        .to_string()
}

/// Display accumulated failures so users know exactly what did not sync.
pub(crate) fn display_failures(rows: &[FailureRow], is_tty: bool) {
    if rows.is_empty() {
        return;
    }

    if is_tty {
        eprintln!();
        eprintln!("{}", failure_heading(rows.len()));
        eprintln!("{}", failure_table(rows));
    } else {
        for row in rows {
            tracing::error!(
                resource = %row.resource,
                key = %row.key,
                error = %row.error,
                "Failed"
            );
        }
    }
}
