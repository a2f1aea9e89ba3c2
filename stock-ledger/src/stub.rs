//! Stub ledger for testing.
//!
//! An in-memory authoritative movement service: it owns product stock,
//! deduplicates on operation id, and can be scripted to fail before or
//! after applying a movement.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;

use stock_domain::{
    Category, CategoryId, MovementId, MovementKind, MovementRecord, NewProduct, OperationId, Product, ProductId,
    StockMovementRequest, ValidationError,
};

use crate::error::SubmitError;
use crate::ports::{LedgerPort, MovementRoute};
use crate::wire::request_fingerprint;

// =============================================================================
// Outcomes
// =============================================================================

/// Result of applying a movement to the stub ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// First application of the operation id
    Applied(MovementRecord),
    /// The operation id was applied before; carries that record
    Duplicate(MovementRecord),
}

impl ApplyOutcome {
    /// The record, either way
    pub fn record(&self) -> &MovementRecord {
        match self {
            ApplyOutcome::Applied(record) | ApplyOutcome::Duplicate(record) => record,
        }
    }
}

/// Business-rule rejections raised by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerRejection {
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Stock cannot go below zero (product {product_id}: stock {stock}, requested {requested})")]
    NegativeStock {
        product_id: ProductId,
        stock: i64,
        requested: i64,
    },

    #[error("operation_id {0} was already used for a different movement")]
    PayloadMismatch(OperationId),
}

impl LedgerRejection {
    /// HTTP status the inventory backend answers with
    pub fn status_code(&self) -> u16 {
        match self {
            LedgerRejection::ProductNotFound(_) => 404,
            LedgerRejection::NegativeStock { .. } => 400,
            LedgerRejection::PayloadMismatch(_) => 409,
        }
    }
}

impl From<LedgerRejection> for SubmitError {
    fn from(rejection: LedgerRejection) -> Self {
        match rejection {
            LedgerRejection::PayloadMismatch(operation_id) => SubmitError::payload_mismatch(&operation_id),
            other => SubmitError::rejected(Some(other.status_code()), other.to_string()),
        }
    }
}

/// Scripted fault for the next submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubFailure {
    /// Fail before anything is applied
    Transport,
    /// Apply the movement, then lose the response
    ResponseLost,
    /// Reject with the given reason, nothing applied
    Reject(String),
}

// =============================================================================
// Stub Ledger
// =============================================================================

#[derive(Debug, Default)]
struct LedgerState {
    products: HashMap<ProductId, Product>,
    categories: HashMap<CategoryId, Category>,
    /// operation id -> (payload fingerprint, index into `records`)
    applied: HashMap<OperationId, (String, usize)>,
    records: Vec<MovementRecord>,
    next_product_id: i64,
}

/// In-memory authoritative ledger.
///
/// Each operation id mutates stock at most once. A repeated id with the
/// same payload yields the original record flagged `already_applied`; with a
/// different payload it is rejected.
#[derive(Debug, Default)]
pub struct StubLedger {
    state: Mutex<LedgerState>,
    failures: Mutex<VecDeque<StubFailure>>,
    submissions: AtomicU64,
    in_place_submissions: AtomicU64,
}

impl StubLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a product
    pub fn with_product(self, id: i64, name: &str, stock: i64) -> Self {
        if let Ok(product_id) = ProductId::new(id) {
            self.insert_product(Product {
                id: product_id,
                reference_code: None,
                name: name.to_string(),
                description: None,
                category: None,
                stock,
                min_stock: 5,
                max_stock: None,
                cost_price: None,
                sale_price: None,
                location: None,
                barcode: None,
                is_active: true,
            });
        }
        self
    }

    /// Seed a category
    pub fn with_category(self, id: CategoryId, name: &str, parent: Option<CategoryId>) -> Self {
        self.state().categories.insert(
            id,
            Category {
                id,
                name: name.to_string(),
                description: None,
                parent,
            },
        );
        self
    }

    /// Category by id
    pub fn category(&self, id: CategoryId) -> Option<Category> {
        self.state().categories.get(&id).cloned()
    }

    /// All categories, ordered by id
    pub fn categories(&self) -> Vec<Category> {
        let mut categories: Vec<_> = self.state().categories.values().cloned().collect();
        categories.sort_by_key(|c| c.id);
        categories
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a product
    pub fn insert_product(&self, product: Product) {
        let mut state = self.state();
        state.next_product_id = state.next_product_id.max(product.id.get());
        state.products.insert(product.id, product);
    }

    /// Create a product from a creation payload
    pub fn create_product(&self, new: &NewProduct) -> Result<Product, ValidationError> {
        let mut state = self.state();
        let id = ProductId::new(state.next_product_id + 1)?;
        state.next_product_id = id.get();
        let product = Product {
            id,
            reference_code: new.reference_code.clone(),
            name: new.name.clone(),
            description: new.description.clone(),
            category: new.category,
            stock: new.stock,
            min_stock: new.min_stock,
            max_stock: new.max_stock,
            cost_price: new.cost_price,
            sale_price: new.sale_price,
            location: None,
            barcode: None,
            is_active: new.is_active,
        };
        state.products.insert(id, product.clone());
        Ok(product)
    }

    /// Current product state
    pub fn product(&self, id: ProductId) -> Option<Product> {
        self.state().products.get(&id).cloned()
    }

    /// Current authoritative stock
    pub fn stock(&self, id: ProductId) -> Option<i64> {
        self.state().products.get(&id).map(|p| p.stock)
    }

    /// All products, ordered by id
    pub fn products(&self) -> Vec<Product> {
        let mut products: Vec<_> = self.state().products.values().cloned().collect();
        products.sort_by_key(|p| p.id);
        products
    }

    /// All applied records, oldest first
    pub fn records(&self) -> Vec<MovementRecord> {
        self.state().records.clone()
    }

    /// Record by id
    pub fn record(&self, id: MovementId) -> Option<MovementRecord> {
        self.state().records.iter().find(|r| r.id == id).cloned()
    }

    /// Record applied under `operation_id`
    pub fn record_for(&self, operation_id: &OperationId) -> Option<MovementRecord> {
        let state = self.state();
        state
            .applied
            .get(operation_id)
            .and_then(|(_, index)| state.records.get(*index))
            .cloned()
    }

    /// Number of submissions received, including failed ones
    pub fn submissions(&self) -> u64 {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Submissions received through one route
    pub fn submissions_via(&self, route: MovementRoute) -> u64 {
        let in_place = self.in_place_submissions.load(Ordering::SeqCst);
        match route {
            MovementRoute::AdjustInPlace => in_place,
            MovementRoute::Create => self.submissions() - in_place,
        }
    }

    /// Queue a fault for an upcoming submission
    pub fn fail_next(&self, failure: StubFailure) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(failure);
    }

    /// Take the next scripted fault, if any
    pub fn take_failure(&self) -> Option<StubFailure> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Count one incoming submission
    pub fn note_submission(&self, route: MovementRoute) {
        if route == MovementRoute::AdjustInPlace {
            self.in_place_submissions.fetch_add(1, Ordering::SeqCst);
        }
        self.submissions.fetch_add(1, Ordering::SeqCst);
    }

    /// Append a historical record without touching stock.
    ///
    /// The record gets the next id and is not indexed by operation id, so it
    /// never deduplicates a submission. Models movements entered before
    /// tokens existed.
    pub fn import_record(&self, mut record: MovementRecord) -> MovementRecord {
        let mut state = self.state();
        record.id = state.records.len() as MovementId + 1;
        state.records.push(record.clone());
        record
    }

    /// Apply a movement under `operation_id`.
    ///
    /// # Errors
    /// `LedgerRejection` when the product is unknown, stock would go
    /// negative, or the id was used for a different payload
    pub fn apply(
        &self,
        request: &StockMovementRequest,
        operation_id: &OperationId,
    ) -> Result<ApplyOutcome, LedgerRejection> {
        let fingerprint = request_fingerprint(request);
        let mut state = self.state();

        if let Some((existing_fp, index)) = state.applied.get(operation_id) {
            if *existing_fp != fingerprint {
                return Err(LedgerRejection::PayloadMismatch(operation_id.clone()));
            }
            let mut record = state.records[*index].clone();
            record.already_applied = true;
            debug!(%operation_id, record_id = record.id, "Stub: duplicate operation");
            return Ok(ApplyOutcome::Duplicate(record));
        }

        let product_id = request.product_id();
        let product = state
            .products
            .get_mut(&product_id)
            .ok_or(LedgerRejection::ProductNotFound(product_id))?;

        let kind = request.movement_kind();
        if kind == MovementKind::Out && request.quantity() > product.stock {
            return Err(LedgerRejection::NegativeStock {
                product_id,
                stock: product.stock,
                requested: request.quantity(),
            });
        }
        product.stock = kind.apply_to(product.stock, request.quantity());
        let resulting_stock = product.stock;

        let record = MovementRecord {
            id: state.records.len() as MovementId + 1,
            product_id,
            movement_kind: kind,
            quantity: request.quantity(),
            notes: request.notes().map(str::to_string),
            created_at: request.performed_at().unwrap_or_else(Utc::now),
            resulting_stock: Some(resulting_stock),
            operation_id: Some(operation_id.clone()),
            performed_by: None,
            already_applied: false,
        };

        let index = state.records.len();
        state.records.push(record.clone());
        state.applied.insert(operation_id.clone(), (fingerprint, index));

        debug!(
            %operation_id,
            record_id = record.id,
            %product_id,
            resulting_stock,
            "Stub: movement applied"
        );
        Ok(ApplyOutcome::Applied(record))
    }
}

#[async_trait]
impl LedgerPort for StubLedger {
    async fn submit_via(
        &self,
        request: &StockMovementRequest,
        route: MovementRoute,
    ) -> Result<MovementRecord, SubmitError> {
        request.validate()?;
        let operation_id = match request.operation_id() {
            Some(id) => id.clone(),
            None => OperationId::generate(),
        };
        self.note_submission(route);
        debug!(%operation_id, %route, "Stub: submission received");

        match self.take_failure() {
            Some(StubFailure::Transport) => {
                return Err(SubmitError::transport(Some(&operation_id), "Simulated connection failure"));
            },
            Some(StubFailure::Reject(reason)) => {
                return Err(SubmitError::rejected(Some(400), reason));
            },
            Some(StubFailure::ResponseLost) => {
                self.apply(request, &operation_id)?;
                return Err(SubmitError::transport(Some(&operation_id), "Simulated lost response"));
            },
            None => {},
        }

        match self.apply(request, &operation_id)? {
            ApplyOutcome::Applied(record) => Ok(record),
            ApplyOutcome::Duplicate(record) => {
                Err(SubmitError::duplicate(request, &operation_id, Some(record)))
            },
        }
    }

    async fn find_by_operation(
        &self,
        operation_id: &OperationId,
    ) -> Result<Option<MovementRecord>, SubmitError> {
        Ok(self.record_for(operation_id))
    }

    async fn fetch_product(&self, product_id: ProductId) -> Result<Product, SubmitError> {
        self.product(product_id)
            .ok_or_else(|| LedgerRejection::ProductNotFound(product_id).into())
    }
}

// =============================================================================
// Tests
// =============================================================================
