//! ecl-refset - keeps query reference sets in step with their ECL definitions
//!
//! Each active member of the query specification reference set names a
//! target set and an ECL expression. A run resolves references between
//! definitions, diffs every target against its expression on the terminology
//! server and applies the difference through bulk member jobs.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ecl_refset::config::RefsetConfig;
//! use ecl_refset::reconcile::{Reconciler, RunOptions};
//! use ecl_refset::snowstorm::SnowstormClient;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = RefsetConfig::load(None)?;
//! let store = Arc::new(SnowstormClient::from_config(&config)?);
//! let (_cancel_tx, cancel) = tokio::sync::watch::channel(false);
//! let report = Reconciler::new(store, config)
//!     .run(RunOptions::default(), cancel)
//!     .await;
//! assert!(report.succeeded());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod reconcile;
pub mod snowstorm;
pub mod ticketing;

pub use config::RefsetConfig;
pub use error::{BatchError, ConfigError, ResolutionError, RunError, SetError, StoreError};
pub use reconcile::{Reconciler, RunOptions, RunReport};
