//! Ledger port definition.
//!
//! The port is the seam between the reconciliation flow and the
//! authoritative movement service. Adapters:
//! - `LedgerClient` - HTTP/JSON against the inventory backend
//! - `StubLedger` - in-memory authoritative ledger for tests

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use stock_domain::{MovementRecord, OperationId, Product, ProductId, StockMovementRequest};

use crate::error::SubmitError;

/// Wire route a movement is submitted through
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementRoute {
    /// `POST` to the movement collection
    #[default]
    Create,
    /// `PATCH` on the product's stock endpoint
    AdjustInPlace,
}

impl fmt::Display for MovementRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MovementRoute::Create => write!(f, "create"),
            MovementRoute::AdjustInPlace => write!(f, "adjust_in_place"),
        }
    }
}

/// Port for the authoritative movement ledger.
///
/// Implementations hold no state between calls that affects the outcome of
/// a submission; deduplication is the service's job, keyed on the
/// operation id.
#[async_trait]
pub trait LedgerPort: Send + Sync {
    /// Submit a stock movement, exactly-once-effective.
    ///
    /// If the request carries no operation id, one is generated for this
    /// call only. Callers that intend to retry must assign the id up front
    /// (see `StockMovementRequest::ensure_operation_id`).
    ///
    /// # Errors
    ///
    /// - `Validation` before any transmission
    /// - `Transport` on network failure (retry with the same id)
    /// - `RejectedByServer` on business-rule violations
    /// - `Conflict` when the id was already applied
    async fn submit_via(
        &self,
        request: &StockMovementRequest,
        route: MovementRoute,
    ) -> Result<MovementRecord, SubmitError>;

    /// Submit through [`MovementRoute::Create`]
    async fn submit(&self, request: &StockMovementRequest) -> Result<MovementRecord, SubmitError> {
        self.submit_via(request, MovementRoute::Create).await
    }

    /// Look up the movement applied under `operation_id`, if any.
    async fn find_by_operation(
        &self,
        operation_id: &OperationId,
    ) -> Result<Option<MovementRecord>, SubmitError>;

    /// Fetch a product's authoritative state.
    async fn fetch_product(&self, product_id: ProductId) -> Result<Product, SubmitError>;
}
