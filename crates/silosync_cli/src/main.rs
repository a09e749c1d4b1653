//! Silosync CLI - push, pull, and approve privacy-platform configuration.

mod commands;
mod config;
mod progress;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use console::Term;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "silosync")]
#[command(version)]
#[command(about = "Declarative sync for privacy-platform configuration")]
#[command(
    long_about = "Silosync reconciles a local YAML manifest of data silos, processing \
purposes, and enrichers against the remote GraphQL API, writes existing data silos \
back to YAML, and bulk approves privacy requests."
)]
#[command(after_long_help = r#"EXAMPLES
    Push a manifest:
        $ silosync push --file transcend.yml

    Push several manifests with parameter substitution:
        $ silosync push --file base.yml --file team.yml --variables domain:acme.com,env:prod

    See what would change without writing:
        $ silosync push --file transcend.yml --dry-run

    Pull data silos into a manifest:
        $ silosync pull --file transcend.yml --title Salesforce

    Approve erasure requests, silencing anything older than June:
        $ silosync approve --actions ERASURE --silent-mode-before 2024-06-01T00:00:00Z

CONFIGURATION
    Silosync reads configuration from:
      1. ~/.config/silosync/config.toml (or $XDG_CONFIG_HOME/silosync/config.toml)
      2. ./silosync.toml
      3. Environment variables (SILOSYNC_* prefix, e.g., SILOSYNC_API_KEY)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    SILOSYNC_API_URL           API base URL (default: https://api.transcend.io)
    SILOSYNC_API_KEY           API key
    SILOSYNC_SYNC_PAGE_SIZE    Page size for remote collections (default: 50)
    SILOSYNC_SYNC_CONCURRENCY  Maximum concurrent requests (default: 100)
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync manifest resources (data silos, processing purposes, enrichers)
    Push {
        /// Manifest file(s) to push - can specify multiple
        #[arg(short, long = "file", required = true, num_args = 1..)]
        files: Vec<PathBuf>,

        /// Parameter values as name:value pairs, comma separated
        #[arg(short, long)]
        variables: Option<String>,

        /// Maximum update batches in flight
        #[arg(short = 'u', long)]
        update_concurrency: Option<usize>,

        #[command(flatten)]
        common: CommonOptions,
    },
    /// Write existing data silos to a manifest file
    Pull {
        /// Output manifest file
        #[arg(short, long, default_value = "transcend.yml")]
        file: PathBuf,

        /// Only pull data silos whose title contains this text
        #[arg(short, long)]
        title: Option<String>,

        #[command(flatten)]
        common: CommonOptions,
    },
    /// Approve privacy requests waiting for approval
    Approve {
        /// Request actions to approve (e.g. ACCESS,ERASURE); all when omitted
        #[arg(short = 'A', long, value_delimiter = ',')]
        actions: Vec<String>,

        /// Put requests created before this RFC 3339 instant into silent mode first
        #[arg(short = 's', long, value_parser = parse_instant)]
        silent_mode_before: Option<DateTime<Utc>>,

        #[command(flatten)]
        common: CommonOptions,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// Connection and tuning options shared by every remote command.
#[derive(Debug, Clone, Default, clap::Args)]
struct CommonOptions {
    /// API base URL (default from config or https://api.transcend.io)
    #[arg(long)]
    url: Option<String>,

    /// API key (default from config or SILOSYNC_API_KEY)
    #[arg(long)]
    auth: Option<String>,

    /// Page size for remote collections (default from config or 50)
    #[arg(short = 'p', long)]
    page_size: Option<usize>,

    /// Maximum concurrent API requests (default from config or 100)
    #[arg(short = 'c', long)]
    concurrency: Option<usize>,

    /// Maximum entries per create/update call (default from config or 20)
    #[arg(short = 'b', long)]
    batch_limit: Option<usize>,

    /// Attempts per request before giving up (default from config or 4)
    #[arg(short = 'm', long)]
    max_attempts: Option<u32>,

    /// Disable proactive rate limiting (may cause API throttling)
    #[arg(short = 'R', long)]
    no_rate_limit: bool,

    /// Dry run - show what would be done without making changes
    #[arg(short = 'n', long)]
    dry_run: bool,
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {}", e))
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Structured logging only when not attached to a TTY
    if !Term::stdout().is_term() {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new("silosync=info,silosync_cli=info"),
        };

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        commands::meta::handle_completions(*shell)?;
        return Ok(ExitCode::SUCCESS);
    }

    // Load configuration (config files -> env vars -> defaults)
    let config = config::Config::load();

    let success = match cli.command {
        Commands::Push {
            files,
            variables,
            update_concurrency,
            common,
        } => {
            commands::push::handle_push(
                &files,
                variables.as_deref(),
                update_concurrency,
                &common,
                &config,
            )
            .await?
        }
        Commands::Pull {
            file,
            title,
            common,
        } => commands::pull::handle_pull(&file, title.as_deref(), &common, &config).await?,
        Commands::Approve {
            actions,
            silent_mode_before,
            common,
        } => {
            commands::approve::handle_approve(actions, silent_mode_before, &common, &config)
                .await?
        }
        Commands::Completions { .. } => true,
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
