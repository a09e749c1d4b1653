//! `silosync pull`: write remote data silos to a manifest file.

use std::path::Path;
use std::sync::Arc;

use silosync::manifest::{Manifest, write_manifest};
use silosync::resources::pull_data_silos;

use crate::CommonOptions;
use crate::commands::shared::Settings;
use crate::config::Config;
use crate::progress::ProgressReporter;

pub(crate) async fn handle_pull(
    file: &Path,
    title: Option<&str>,
    common: &CommonOptions,
    config: &Config,
) -> Result<bool, Box<dyn std::error::Error>> {
    let settings = Settings::resolve(common, config)?;
    let reporter = Arc::new(ProgressReporter::new());
    let client = settings.client(&reporter)?;
    let callback = reporter.as_callback();

    let data_silos = pull_data_silos(
        &client,
        title,
        settings.page_size,
        settings.concurrency,
        Some(callback.as_ref()),
    )
    .await;
    reporter.finish();
    let data_silos = data_silos?;

    let count = data_silos.len();
    let manifest = Manifest {
        data_silos,
        ..Manifest::default()
    };

    if settings.dry_run {
        tracing::info!(count, "Dry run: not writing {}", file.display());
        return Ok(true);
    }

    write_manifest(file, &manifest)?;
    if reporter.is_interactive() {
        println!("Wrote {} data silos to {}", count, file.display());
    } else {
        tracing::info!(count, path = %file.display(), "Wrote manifest");
    }
    Ok(true)
}
