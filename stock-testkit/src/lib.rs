//! Test helpers for inventory integration tests.
//!
//! Provides an HTTP mock of the inventory service backed by the in-memory
//! `StubLedger`, plus seeding helpers.

mod server;

pub use server::{DuplicateStyle, MockLedgerServer, MockOptions};
pub use stock_ledger::{StubFailure, StubLedger};

/// Ledger seeded with a single product.
///
/// Convenience for tests that only move stock on one item.
pub fn ledger_with_product(id: i64, stock: i64) -> StubLedger {
    StubLedger::new().with_product(id, &format!("Producto {}", id), stock)
}
