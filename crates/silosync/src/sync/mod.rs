//! Shared sync infrastructure for every resource.
//!
//! # Module Structure
//!
//! - [`types`] - Core types: `SyncTarget`, `SyncOptions`, `SyncReport`, constants
//! - [`index`] - `RemoteIndex`, the natural-key index threaded between phases
//! - [`progress`] - Progress reporting: `SyncProgress`, `ProgressCallback`, `emit()`
//! - [`engine`] - The sync orchestrator: `sync()`
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use silosync::sync::{SyncOptions, sync};
//! use silosync::resources::DataSiloTarget;
//!
//! let target = Arc::new(DataSiloTarget::new(client.clone()));
//! let report = sync(target, manifest.data_silos, &SyncOptions::default(), None).await?;
//! println!("Created {} data silos", report.created);
//! ```

pub mod engine;
mod index;
mod progress;
mod types;

pub use types::{
    DuplicateKeyPolicy, KeyFailure, NaturalKey, RemoteEntity, RemoteRef, SyncOptions, SyncOutcome,
    SyncPlan, SyncReport, SyncTarget,
};

pub use types::{DEFAULT_CONCURRENCY, DEFAULT_UPDATE_CONCURRENCY};

pub use index::RemoteIndex;

pub use progress::{ProgressCallback, SyncProgress, emit};

pub use engine::{plan, sync, validate_desired};
