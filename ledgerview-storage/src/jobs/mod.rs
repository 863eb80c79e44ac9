//! Background Jobs
//!
//! - `refresh`: re-validates expired cache keys on a fixed interval
//!
//! # Usage
//!
//! ```ignore
//! use ledgerview_storage::jobs::cache_refresh_task;
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! tokio::spawn(cache_refresh_task(cache.clone(), config.cache.clone(), shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod refresh;

pub use refresh::{cache_refresh_task, RefreshMetrics, RefreshSnapshot};
