//! Movement reconciliation service.
//!
//! Ties the optimistic projector to the ledger:
//!
//! ```text
//! ensure token → begin_speculative → submit (retry on transport, same token)
//!     success   → commit → refresh/evict entry → mark views stale
//!     duplicate → resolve original record → commit → refetch product → mark views stale
//!     failure   → rollback
//! ```
//!
//! A duplicate's record is the original one: its `resulting_stock` predates
//! any movement applied since, so the cache is refreshed from a fresh fetch.
//!
//! The cached projection is never left holding a speculative value for a
//! movement the ledger did not apply.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use stock_domain::{MovementRecord, OperationId, Product, ProductId, StockMovementRequest};
use stock_ledger::{LedgerPort, MovementRoute, SubmitError};
use stock_projector::{OptimisticProjector, Snapshot, StockCache};

use crate::error::SyncResult;

/// Pause before resending after a transport failure
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

// =============================================================================
// Outcome
// =============================================================================

/// Successful result of applying a movement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "record", rename_all = "snake_case")]
pub enum MovementOutcome {
    /// Applied by this call
    Applied(MovementRecord),
    /// Applied earlier under the same operation id
    AlreadyApplied(MovementRecord),
}

impl MovementOutcome {
    /// The authoritative record
    pub fn record(&self) -> &MovementRecord {
        match self {
            MovementOutcome::Applied(r) | MovementOutcome::AlreadyApplied(r) => r,
        }
    }

    /// Take the record
    pub fn into_record(self) -> MovementRecord {
        match self {
            MovementOutcome::Applied(r) | MovementOutcome::AlreadyApplied(r) => r,
        }
    }

    /// Whether the ledger had seen this operation id before
    pub fn is_duplicate(&self) -> bool {
        matches!(self, MovementOutcome::AlreadyApplied(_))
    }
}

// =============================================================================
// Movement Service
// =============================================================================

/// Applies stock movements against a ledger with optimistic projection.
pub struct MovementService<L: LedgerPort> {
    ledger: Arc<L>,
    projector: OptimisticProjector,
    submit_retries: u32,
}

impl<L: LedgerPort> MovementService<L> {
    /// Create a service over `ledger`, projecting into `cache`
    pub fn new(ledger: Arc<L>, cache: Arc<StockCache>) -> Self {
        Self {
            ledger,
            projector: OptimisticProjector::new(cache),
            submit_retries: 1,
        }
    }

    /// Transport retries per movement, all with the same operation id
    pub fn with_submit_retries(mut self, retries: u32) -> Self {
        self.submit_retries = retries;
        self
    }

    /// The projection cache
    pub fn cache(&self) -> &Arc<StockCache> {
        self.projector.cache()
    }

    /// The ledger
    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// Apply a movement exactly once.
    ///
    /// Assigns an operation id if the request has none. The cache shows the
    /// predicted stock while the call is in flight.
    ///
    /// # Errors
    ///
    /// - `Validation` before anything is sent or cached
    /// - `Ledger(Transport)` after retries are exhausted (cache rolled back;
    ///   resubmitting the same request is safe)
    /// - `Ledger(RejectedByServer)` on business-rule violations or an
    ///   operation id reused for a different movement (cache rolled back)
    pub async fn apply(&self, request: StockMovementRequest) -> SyncResult<MovementOutcome> {
        self.apply_via(request, MovementRoute::Create).await
    }

    /// [`apply`](Self::apply) through an explicit wire route
    pub async fn apply_via(
        &self,
        mut request: StockMovementRequest,
        route: MovementRoute,
    ) -> SyncResult<MovementOutcome> {
        request.validate()?;
        let operation_id = request.ensure_operation_id().clone();

        let snapshot = self.projector.begin_speculative(
            request.product_id(),
            request.movement_kind(),
            request.quantity(),
        )?;

        match self.submit_with_retry(&request, route).await {
            Ok(record) => {
                self.projector.commit(snapshot);
                self.reconcile(&record);
                info!(
                    %operation_id,
                    %route,
                    record_id = record.id,
                    product_id = %record.product_id,
                    movement_kind = %record.movement_kind,
                    resulting_stock = ?record.resulting_stock,
                    "Movement applied"
                );
                Ok(MovementOutcome::Applied(record))
            },
            Err(SubmitError::Conflict { existing, .. }) => {
                self.resolve_duplicate(&request, &operation_id, snapshot, existing.map(|r| *r))
                    .await
            },
            Err(e) => {
                self.projector.rollback(snapshot);
                warn!(%operation_id, error = %e, "Movement failed, projection rolled back");
                Err(e.into())
            },
        }
    }

    /// Fetch a product from the ledger and cache its stock
    pub async fn refresh_product(&self, product_id: ProductId) -> SyncResult<Product> {
        let product = self.ledger.fetch_product(product_id).await?;
        self.cache().refresh_product(&product);
        Ok(product)
    }

    async fn submit_with_retry(
        &self,
        request: &StockMovementRequest,
        route: MovementRoute,
    ) -> Result<MovementRecord, SubmitError> {
        let mut attempt = 0;
        loop {
            match self.ledger.submit_via(request, route).await {
                Err(e) if e.is_retryable() && attempt < self.submit_retries => {
                    attempt += 1;
                    warn!(
                        operation_id = ?request.operation_id(),
                        attempt,
                        error = %e,
                        "Transport failure, resending with the same operation id"
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                },
                result => return result,
            }
        }
    }

    /// Settle a duplicate report against the original record.
    async fn resolve_duplicate(
        &self,
        request: &StockMovementRequest,
        operation_id: &OperationId,
        snapshot: Snapshot,
        existing: Option<MovementRecord>,
    ) -> SyncResult<MovementOutcome> {
        let product_id = request.product_id();
        let resolved = match existing {
            Some(record) => Ok(Some(record)),
            None => self.ledger.find_by_operation(operation_id).await,
        };

        match resolved {
            Ok(Some(record)) if record.matches(request) => {
                self.projector.commit(snapshot);
                self.resync(product_id).await;
                warn!(%operation_id, record_id = record.id, "Movement already applied");
                Ok(MovementOutcome::AlreadyApplied(record))
            },
            Ok(Some(record)) => {
                self.projector.rollback(snapshot);
                warn!(
                    %operation_id,
                    record_id = record.id,
                    "Operation id belongs to a different movement, projection rolled back"
                );
                Err(SubmitError::payload_mismatch(operation_id).into())
            },
            // Applied, but the record is out of reach: drop the entry and let
            // the next read fetch the real stock
            Ok(None) => {
                self.projector.commit(snapshot);
                self.cache().evict(product_id);
                self.cache().invalidate_all_views();
                warn!(%operation_id, "Duplicate reported but no record found");
                Err(SubmitError::Conflict {
                    operation_id: operation_id.clone(),
                    existing: None,
                }
                .into())
            },
            Err(e) => {
                self.projector.commit(snapshot);
                self.cache().evict(product_id);
                self.cache().invalidate_all_views();
                warn!(%operation_id, error = %e, "Could not resolve duplicate record");
                Err(e.into())
            },
        }
    }

    /// Refetch a product whose cached stock may be behind the ledger
    async fn resync(&self, product_id: ProductId) {
        match self.ledger.fetch_product(product_id).await {
            Ok(product) => self.cache().refresh_product(&product),
            Err(e) => {
                warn!(%product_id, error = %e, "Refetch failed, cache entry evicted");
                self.cache().evict(product_id);
            },
        }
        self.cache().invalidate_all_views();
    }

    /// Authoritative refresh after a confirmed movement
    fn reconcile(&self, record: &MovementRecord) {
        match record.resulting_stock {
            Some(stock) => {
                self.cache()
                    .refresh_from_movement(record.product_id, stock, record.id);
            },
            None => {
                self.cache().evict(record.product_id);
            },
        }
        self.cache().invalidate_all_views();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stock_domain::MovementKind;
    use stock_ledger::{StubFailure, StubLedger};
    use stock_projector::CacheView;

    fn pid(id: i64) -> ProductId {
        ProductId::new(id).unwrap()
    }

    fn service() -> MovementService<StubLedger> {
        let ledger = Arc::new(StubLedger::new().with_product(1, "Tornillo", 10));
        let cache = Arc::new(StockCache::new());
        cache.refresh(pid(1), 10);
        MovementService::new(ledger, cache)
    }

    fn movement(kind: MovementKind, quantity: i64) -> StockMovementRequest {
        StockMovementRequest::new(1, kind, quantity).unwrap()
    }

    #[tokio::test]
    async fn test_apply_refreshes_from_record() {
        let service = service();

        let outcome = service.apply(movement(MovementKind::In, 5)).await.unwrap();

        assert!(!outcome.is_duplicate());
        assert_eq!(outcome.record().resulting_stock, Some(15));
        assert_eq!(service.cache().get(pid(1)), Some(15));
        assert_eq!(service.cache().in_flight(pid(1)), 0);
        assert!(CacheView::ALL.iter().all(|v| service.cache().is_stale(*v)));
    }

    #[tokio::test]
    async fn test_transport_failure_rolls_back() {
        let service = service().with_submit_retries(0);
        service.ledger().fail_next(StubFailure::Transport);

        let err = service.apply(movement(MovementKind::In, 5)).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(service.cache().get(pid(1)), Some(10));
        assert_eq!(service.ledger().stock(pid(1)), Some(10));
        assert!(!service.cache().is_stale(CacheView::Products));
    }

    #[tokio::test]
    async fn test_transport_retry_uses_same_token() {
        let service = service();
        service.ledger().fail_next(StubFailure::Transport);

        let op = OperationId::new("op-retry").unwrap();
        let outcome = service
            .apply(movement(MovementKind::Out, 4).with_operation_id(op.clone()))
            .await
            .unwrap();

        assert_eq!(outcome.record().operation_id, Some(op));
        assert_eq!(service.ledger().submissions(), 2);
        assert_eq!(service.cache().get(pid(1)), Some(6));
    }

    #[tokio::test]
    async fn test_lost_response_resolves_to_already_applied() {
        let service = service();
        service.ledger().fail_next(StubFailure::ResponseLost);

        let outcome = service.apply(movement(MovementKind::In, 5)).await.unwrap();

        assert!(outcome.is_duplicate());
        assert_eq!(service.ledger().records().len(), 1);
        assert_eq!(service.ledger().stock(pid(1)), Some(15));
        assert_eq!(service.cache().get(pid(1)), Some(15));
    }

    #[tokio::test]
    async fn test_resubmission_returns_original_record() {
        let service = service();
        let request = movement(MovementKind::In, 5).with_operation_id(OperationId::new("op-1").unwrap());

        let first = service.apply(request.clone()).await.unwrap();
        let second = service.apply(request).await.unwrap();

        assert!(second.is_duplicate());
        assert_eq!(first.record().id, second.record().id);
        assert_eq!(service.ledger().stock(pid(1)), Some(15));
        assert_eq!(service.cache().get(pid(1)), Some(15));
    }

    #[tokio::test]
    async fn test_rejection_rolls_back() {
        let service = service();

        let err = service.apply(movement(MovementKind::Out, 50)).await.unwrap_err();

        assert!(matches!(
            err.as_submit_error(),
            Some(SubmitError::RejectedByServer { status: Some(400), .. })
        ));
        assert_eq!(service.cache().get(pid(1)), Some(10));
    }

    #[tokio::test]
    async fn test_reused_token_with_other_payload_rolls_back() {
        let service = service();
        let op = OperationId::new("op-1").unwrap();
        service
            .apply(movement(MovementKind::In, 5).with_operation_id(op.clone()))
            .await
            .unwrap();

        let err = service
            .apply(movement(MovementKind::In, 9).with_operation_id(op))
            .await
            .unwrap_err();

        assert!(matches!(
            err.as_submit_error(),
            Some(SubmitError::RejectedByServer { status: Some(409), .. })
        ));
        assert_eq!(service.cache().get(pid(1)), Some(15));
        assert_eq!(service.ledger().stock(pid(1)), Some(15));
    }

    #[tokio::test]
    async fn test_refresh_product_overrides_speculation() {
        let service = service();
        service.ledger().insert_product(Product {
            stock: 42,
            ..service.ledger().product(pid(1)).unwrap()
        });

        let product = service.refresh_product(pid(1)).await.unwrap();
        assert_eq!(product.stock, 42);
        assert_eq!(service.cache().get(pid(1)), Some(42));
    }

    #[tokio::test]
    async fn test_late_replay_keeps_current_stock() {
        let service = service();
        let op = OperationId::new("op-1").unwrap();
        let first = movement(MovementKind::In, 5).with_operation_id(op.clone());

        service.apply(first.clone()).await.unwrap();
        service.apply(movement(MovementKind::Out, 3)).await.unwrap();
        assert_eq!(service.cache().get(pid(1)), Some(12));

        let replay = service.apply(first).await.unwrap();

        assert!(replay.is_duplicate());
        assert_eq!(replay.record().resulting_stock, Some(15));
        assert_eq!(service.ledger().stock(pid(1)), Some(12));
        assert_eq!(service.cache().get(pid(1)), Some(12));
    }

    #[tokio::test]
    async fn test_replay_after_other_writer_matches_ledger() {
        let service = service();
        let op = OperationId::new("op-1").unwrap();
        let request = movement(MovementKind::In, 5).with_operation_id(op.clone());
        service.apply(request.clone()).await.unwrap();

        // Movement from another client, invisible to this cache
        service
            .ledger()
            .apply(&movement(MovementKind::Out, 7), &OperationId::new("op-other").unwrap())
            .unwrap();

        service.apply(request).await.unwrap();
        assert_eq!(service.cache().get(pid(1)), Some(8));
        assert!(CacheView::ALL.iter().all(|v| service.cache().is_stale(*v)));
    }

    #[tokio::test]
    async fn test_adjust_in_place_route() {
        let service = service();

        let outcome = service
            .apply_via(movement(MovementKind::Adj, 3), MovementRoute::AdjustInPlace)
            .await
            .unwrap();

        assert_eq!(outcome.record().resulting_stock, Some(3));
        assert_eq!(service.cache().get(pid(1)), Some(3));
        assert_eq!(service.ledger().submissions_via(MovementRoute::AdjustInPlace), 1);
        assert_eq!(service.ledger().submissions_via(MovementRoute::Create), 0);
    }

    #[tokio::test]
    async fn test_adjust_in_place_failure_rolls_back() {
        let service = service().with_submit_retries(0);
        service.ledger().fail_next(StubFailure::Reject("Bloqueado".to_string()));

        let err = service
            .apply_via(movement(MovementKind::Adj, 3), MovementRoute::AdjustInPlace)
            .await
            .unwrap_err();

        assert!(!err.is_retryable());
        assert_eq!(service.cache().get(pid(1)), Some(10));
        assert_eq!(service.cache().in_flight(pid(1)), 0);
    }

    /// Ledger that reports every submission as a duplicate it cannot look up
    struct AmnesiacLedger;

    #[async_trait]
    impl LedgerPort for AmnesiacLedger {
        async fn submit_via(
            &self,
            request: &StockMovementRequest,
            _route: MovementRoute,
        ) -> Result<MovementRecord, SubmitError> {
            Err(SubmitError::Conflict {
                operation_id: request.operation_id().cloned().unwrap_or_else(OperationId::generate),
                existing: None,
            })
        }

        async fn find_by_operation(
            &self,
            _operation_id: &OperationId,
        ) -> Result<Option<MovementRecord>, SubmitError> {
            Err(SubmitError::transport(None, "lookup unavailable"))
        }

        async fn fetch_product(&self, product_id: ProductId) -> Result<Product, SubmitError> {
            Err(SubmitError::rejected(Some(404), format!("Product not found: {}", product_id)))
        }
    }

    #[tokio::test]
    async fn test_unresolvable_duplicate_evicts_entry() {
        let cache = Arc::new(StockCache::new());
        cache.refresh(pid(1), 10);
        let service = MovementService::new(Arc::new(AmnesiacLedger), cache);

        let err = service.apply(movement(MovementKind::In, 5)).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(service.cache().get(pid(1)), None);
        assert_eq!(service.cache().in_flight(pid(1)), 0);
    }
}
