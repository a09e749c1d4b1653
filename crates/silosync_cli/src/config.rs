//! Configuration file support for silosync.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (e.g., `SILOSYNC_API_KEY`, `SILOSYNC_SYNC_PAGE_SIZE`)
//! 3. Local config file (./silosync.toml)
//! 4. XDG config file (~/.config/silosync/config.toml)
//! 5. Built-in defaults
//!
//! Example config file:
//! ```toml
//! [api]
//! url = "https://api.transcend.io"
//! key = "..."  # or use SILOSYNC_API_KEY env var
//! requests_per_second = 25
//! timeout_secs = 30
//!
//! [sync]
//! page_size = 50
//! batch_limit = 20
//! concurrency = 100
//! max_attempts = 4
//! no_rate_limit = false
//! ```

use std::path::PathBuf;

use config::builder::DefaultState;
use config::{Config as ConfigBuilder, ConfigError, File, FileFormat};
use directories::ProjectDirs;
use serde::Deserialize;
use silosync::DEFAULT_API_URL;
use silosync::batch::DEFAULT_WRITE_BATCH_LIMIT;
use silosync::paginate::DEFAULT_PAGE_SIZE;
use silosync::rate_limit::DEFAULT_REQUESTS_PER_SECOND;
use silosync::retry::DEFAULT_MAX_ATTEMPTS;
use silosync::sync::DEFAULT_CONCURRENCY;

/// Environment variables and the config keys they set.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("SILOSYNC_API_URL", "api.url"),
    ("SILOSYNC_API_KEY", "api.key"),
    ("SILOSYNC_API_REQUESTS_PER_SECOND", "api.requests_per_second"),
    ("SILOSYNC_API_TIMEOUT_SECS", "api.timeout_secs"),
    ("SILOSYNC_SYNC_PAGE_SIZE", "sync.page_size"),
    ("SILOSYNC_SYNC_BATCH_LIMIT", "sync.batch_limit"),
    ("SILOSYNC_SYNC_CONCURRENCY", "sync.concurrency"),
    ("SILOSYNC_SYNC_MAX_ATTEMPTS", "sync.max_attempts"),
    ("SILOSYNC_SYNC_NO_RATE_LIMIT", "sync.no_rate_limit"),
];

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote API configuration.
    pub api: ApiConfig,
    /// Default sync options.
    pub sync: SyncConfig,
}

/// Remote API configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API base URL.
    pub url: String,
    /// API key.
    /// Can also be set via SILOSYNC_API_KEY environment variable.
    pub key: Option<String>,
    /// Proactive rate limit.
    pub requests_per_second: u32,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_API_URL.to_string(),
            key: None,
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            timeout_secs: 30,
        }
    }
}

/// Default sync options.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub page_size: usize,
    pub batch_limit: usize,
    /// Maximum concurrent API requests.
    pub concurrency: usize,
    pub max_attempts: u32,
    /// Whether to disable proactive rate limiting.
    pub no_rate_limit: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            batch_limit: DEFAULT_WRITE_BATCH_LIMIT,
            concurrency: DEFAULT_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            no_rate_limit: false,
        }
    }
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Falls back to defaults (with a warning) if any source is malformed.
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(xdg_config) = Self::default_config_path()
            && xdg_config.exists()
        {
            tracing::debug!("Loading config from {:?}", xdg_config);
            builder = builder.add_source(
                File::from(xdg_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // Local config file (higher priority than XDG)
        let local_config = PathBuf::from("silosync.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./silosync.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        let built = apply_env(builder, |name| std::env::var(name).ok())
            .and_then(|builder| builder.build());

        match built {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to deserialize config: {}", e);
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to build config: {}", e);
                Config::default()
            }
        }
    }

    /// Get the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "silosync").map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Layer `SILOSYNC_*` environment variables over `builder`.
///
/// Variables are mapped explicitly since several keys contain underscores.
fn apply_env(
    mut builder: config::ConfigBuilder<DefaultState>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<config::ConfigBuilder<DefaultState>, ConfigError> {
    for (var, key) in ENV_OVERRIDES {
        builder = builder.set_override_option(*key, lookup(*var))?;
    }
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Config {
        ConfigBuilder::builder()
            .add_source(config::File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.url, "https://api.transcend.io");
        assert!(config.api.key.is_none());
        assert_eq!(config.api.requests_per_second, 25);
        assert_eq!(config.sync.page_size, 50);
        assert_eq!(config.sync.batch_limit, 20);
        assert_eq!(config.sync.concurrency, 100);
        assert_eq!(config.sync.max_attempts, 4);
        assert!(!config.sync.no_rate_limit);
    }

    #[test]
    fn test_full_config_parsing() {
        let config = from_toml(
            r#"
            [api]
            url = "https://api.eu.example.com"
            key = "secret"
            requests_per_second = 5
            timeout_secs = 10

            [sync]
            page_size = 25
            batch_limit = 10
            concurrency = 8
            max_attempts = 2
            no_rate_limit = true
        "#,
        );

        assert_eq!(config.api.url, "https://api.eu.example.com");
        assert_eq!(config.api.key.as_deref(), Some("secret"));
        assert_eq!(config.api.requests_per_second, 5);
        assert_eq!(config.api.timeout_secs, 10);
        assert_eq!(config.sync.page_size, 25);
        assert_eq!(config.sync.batch_limit, 10);
        assert_eq!(config.sync.concurrency, 8);
        assert_eq!(config.sync.max_attempts, 2);
        assert!(config.sync.no_rate_limit);
    }

    #[test]
    fn test_config_partial_override_keeps_defaults() {
        let config = from_toml(
            r#"
            [sync]
            page_size = 10
        "#,
        );
        assert_eq!(config.sync.page_size, 10);
        assert_eq!(config.sync.batch_limit, 20);
        assert_eq!(config.api.url, "https://api.transcend.io");
    }

    #[test]
    fn test_env_overrides_file() {
        let builder = ConfigBuilder::builder().add_source(config::File::from_str(
            r#"
            [api]
            key = "from-file"

            [sync]
            page_size = 10
            batch_limit = 7
        "#,
            FileFormat::Toml,
        ));
        let builder = apply_env(builder, |name| match name {
            "SILOSYNC_API_KEY" => Some("from-env".to_string()),
            "SILOSYNC_SYNC_PAGE_SIZE" => Some("75".to_string()),
            "SILOSYNC_SYNC_NO_RATE_LIMIT" => Some("true".to_string()),
            _ => None,
        })
        .unwrap();

        let config: Config = builder.build().unwrap().try_deserialize().unwrap();
        assert_eq!(config.api.key.as_deref(), Some("from-env"));
        assert_eq!(config.sync.page_size, 75);
        assert_eq!(config.sync.batch_limit, 7);
        assert!(config.sync.no_rate_limit);
    }

    #[test]
    fn test_config_invalid_toml() {
        let result = ConfigBuilder::builder()
            .add_source(config::File::from_str("[sync\npage_size = 1", FileFormat::Toml))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_unknown_fields_ignored() {
        let config = from_toml(
            r#"
            [sync]
            concurrency = 3
            unknown_field = "should be ignored"
        "#,
        );
        assert_eq!(config.sync.concurrency, 3);
    }

    #[test]
    fn test_default_config_path() {
        if let Some(path) = Config::default_config_path() {
            assert!(path.to_string_lossy().contains("silosync"));
        }
    }
}
