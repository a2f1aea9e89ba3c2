//! Inventory Sync
//!
//! Client-side reconciliation of stock movements with the authoritative
//! inventory service, plus the configuration used by `stockctl`.
//!
//! # Example
//!
//! ```rust,ignore
//! use inventory_sync::{Config, MovementService};
//! use stock_projector::StockCache;
//! use std::sync::Arc;
//!
//! let config = Config::from_env()?;
//! let cache = Arc::new(StockCache::new());
//! let service = MovementService::new(Arc::new(config.ledger_client()), cache)
//!     .with_submit_retries(config.sync.submit_retries);
//!
//! service.refresh_product(product_id).await?;
//! let outcome = service.apply(request).await?;
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod service;

pub use config::{ApiConfig, Config, Environment, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use service::{MovementOutcome, MovementService};
