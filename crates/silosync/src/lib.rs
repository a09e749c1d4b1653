//! Silosync - declarative sync for privacy-platform configuration.
//!
//! This library reconciles a locally declared manifest (data silos with
//! their datapoints, processing purposes, enrichers, the consent manager)
//! against a remote GraphQL API, and bulk approves privacy requests. Every
//! remote call goes through a retrying, rate-limit aware transport;
//! collections are read with an offset paginator; writes are chunked into
//! batches and fanned out under a concurrency ceiling.
//!
//! # Example
//!
//! ```ignore
//! use silosync::{GraphQLClient, DEFAULT_API_URL, DEFAULT_TIMEOUT};
//! use silosync::manifest::{load_manifest, Variables};
//! use silosync::resources::{PushOptions, push_manifest};
//!
//! let client = GraphQLClient::new(DEFAULT_API_URL, &api_key, DEFAULT_TIMEOUT)?;
//! let manifest = load_manifest("transcend.yml".as_ref(), &Variables::new())?;
//! let result = push_manifest(&client, manifest, &PushOptions::default(), None).await;
//! assert!(result.success());
//! ```

pub mod batch;
pub mod error;
pub mod graphql;
pub mod http;
pub mod manifest;
pub mod paginate;
pub mod rate_limit;
pub mod resources;
pub mod retry;
pub mod runner;
pub mod sync;

pub use error::{Result, SyncError, short_error_message};
pub use graphql::{DEFAULT_API_URL, DEFAULT_TIMEOUT, GraphQLClient, GraphQLError};
pub use rate_limit::ApiRateLimiter;
pub use retry::RetryConfig;
