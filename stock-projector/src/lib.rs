//! Stock Projector
//!
//! Client-side projection of product stock. Movements are applied to the
//! cache speculatively for immediate feedback, then reconciled with the
//! authoritative ledger: committed and refreshed on success, rolled back on
//! failure. Authoritative refreshes always override speculative values.

#![warn(clippy::all)]

pub mod cache;
pub mod speculative;

pub use cache::{CacheView, StockCache};
pub use speculative::{OptimisticProjector, Snapshot};
