//! Domain Entities for the inventory
//!
//! Movement requests issued by the client, movement records returned by the
//! authoritative ledger, and the catalog entities they refer to.
//!
//! Field names are English on the wire; aliases accept the Spanish names the
//! inventory backend has historically emitted.

use crate::value_objects::{MovementKind, OperationId, ProductId, ValidationError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Server-assigned identifier of a movement record
pub type MovementId = i64;

/// Server-assigned identifier of a category
pub type CategoryId = i64;

// =============================================================================
// Stock Movement Request
// =============================================================================

/// A client-issued stock change, validated at construction.
///
/// The `operation_id` is the idempotency token. It is assigned once (either
/// by the caller or by [`StockMovementRequest::ensure_operation_id`]) and must
/// be reused verbatim for every retry of the same logical operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockMovementRequest {
    operation_id: Option<OperationId>,
    product_id: ProductId,
    movement_kind: MovementKind,
    quantity: i64,
    notes: Option<String>,
    performed_at: Option<DateTime<Utc>>,
}

impl StockMovementRequest {
    /// Create a request, enforcing the quantity rule of `movement_kind`.
    ///
    /// # Errors
    /// `InvalidProductId` for non-positive ids, `InvalidQuantity` when the
    /// quantity breaks the kind's rule.
    pub fn new(
        product_id: i64,
        movement_kind: MovementKind,
        quantity: i64,
    ) -> Result<Self, ValidationError> {
        let product_id = ProductId::new(product_id)?;
        movement_kind.validate_quantity(quantity)?;

        Ok(Self {
            operation_id: None,
            product_id,
            movement_kind,
            quantity,
            notes: None,
            performed_at: None,
        })
    }

    /// Create a request from untyped input (form fields, CLI arguments).
    ///
    /// # Errors
    /// Additionally returns `InvalidMovementKind` for anything other than
    /// IN, OUT or ADJ.
    pub fn parse(product_id: i64, movement_kind: &str, quantity: i64) -> Result<Self, ValidationError> {
        let kind = movement_kind.parse::<MovementKind>()?;
        Self::new(product_id, kind, quantity)
    }

    /// Re-check the invariants established by the constructors.
    ///
    /// # Errors
    /// Same as [`StockMovementRequest::new`]
    pub fn validate(&self) -> Result<(), ValidationError> {
        ProductId::new(self.product_id.get())?;
        self.movement_kind.validate_quantity(self.quantity)
    }

    /// Attach a caller-chosen idempotency token
    pub fn with_operation_id(mut self, operation_id: OperationId) -> Self {
        self.operation_id = Some(operation_id);
        self
    }

    /// Attach free-text notes (blank notes are dropped)
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        let notes = notes.into();
        let trimmed = notes.trim();
        self.notes = if trimmed.is_empty() { None } else { Some(trimmed.to_string()) };
        self
    }

    /// Override the movement timestamp
    pub fn with_performed_at(mut self, performed_at: DateTime<Utc>) -> Self {
        self.performed_at = Some(performed_at);
        self
    }

    /// Return the idempotency token, generating one on first use.
    ///
    /// Later calls return the same token, so a request value that is kept
    /// around and resubmitted keeps its identity.
    pub fn ensure_operation_id(&mut self) -> &OperationId {
        self.operation_id.get_or_insert_with(OperationId::generate)
    }

    /// Idempotency token, if already assigned
    pub fn operation_id(&self) -> Option<&OperationId> {
        self.operation_id.as_ref()
    }

    /// Target product
    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    /// Movement kind
    pub fn movement_kind(&self) -> MovementKind {
        self.movement_kind
    }

    /// Quantity (relative for IN/OUT, absolute for ADJ)
    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    /// Notes, if any
    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    /// Timestamp override, if any
    pub fn performed_at(&self) -> Option<DateTime<Utc>> {
        self.performed_at
    }
}

// =============================================================================
// Movement Record
// =============================================================================

/// User who performed a movement, as embedded by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "nombre")]
    pub name: Option<String>,
}

/// Server-authoritative result of an applied movement. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub id: MovementId,
    #[serde(alias = "producto")]
    pub product_id: ProductId,
    #[serde(alias = "movimiento_tipo")]
    pub movement_kind: MovementKind,
    #[serde(alias = "cantidad")]
    pub quantity: i64,
    #[serde(default, alias = "notas")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Stock after the movement, when the server reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resulting_stock: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<OperationId>,
    #[serde(default, alias = "usuario", skip_serializing_if = "Option::is_none")]
    pub performed_by: Option<Actor>,
    /// Set by the server when this record was applied by an earlier request
    /// carrying the same operation id.
    #[serde(default, alias = "duplicate", skip_serializing_if = "std::ops::Not::not")]
    pub already_applied: bool,
}

impl MovementRecord {
    /// Check that this record describes the same effect as `request`.
    ///
    /// Used when the server reports a duplicate: a token reused with a
    /// different payload must not be mistaken for the original operation.
    pub fn matches(&self, request: &StockMovementRequest) -> bool {
        self.product_id == request.product_id()
            && self.movement_kind == request.movement_kind()
            && self.quantity == request.quantity()
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// A product with its current authoritative stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    #[serde(default, alias = "referencia_codigo")]
    pub reference_code: Option<String>,
    #[serde(alias = "nombre")]
    pub name: String,
    #[serde(default, alias = "descripcion")]
    pub description: Option<String>,
    #[serde(default, alias = "categoria")]
    pub category: Option<CategoryId>,
    pub stock: i64,
    #[serde(default)]
    pub min_stock: i64,
    #[serde(default)]
    pub max_stock: Option<i64>,
    #[serde(default, alias = "coste_precio")]
    pub cost_price: Option<Decimal>,
    #[serde(default, alias = "venta_precio")]
    pub sale_price: Option<Decimal>,
    #[serde(default, alias = "localizacion")]
    pub location: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl Product {
    /// Stock at or below the configured minimum
    pub fn is_low_stock(&self) -> bool {
        self.stock <= self.min_stock
    }
}

fn default_active() -> bool {
    true
}

/// Payload for creating a product. Initial stock is set here and only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    #[serde(alias = "nombre")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<CategoryId>,
    #[serde(default)]
    pub stock: i64,
    #[serde(default = "default_min_stock")]
    pub min_stock: i64,
    #[serde(default)]
    pub max_stock: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sale_price: Option<Decimal>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_min_stock() -> i64 {
    5
}

impl NewProduct {
    /// Minimal product with the default minimum stock of 5
    pub fn new(name: impl Into<String>, stock: i64) -> Self {
        Self {
            name: name.into(),
            reference_code: None,
            description: None,
            category: None,
            stock,
            min_stock: default_min_stock(),
            max_stock: None,
            cost_price: None,
            sale_price: None,
            is_active: true,
        }
    }
}

/// Partial update of a product.
///
/// Deliberately has no `stock` field: stock only changes through movements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProductPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<CategoryId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_stock: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_stock: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sale_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

/// A category node. Subcategories point at their parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    #[serde(alias = "nombre")]
    pub name: String,
    #[serde(default, alias = "descripcion")]
    pub description: Option<String>,
    #[serde(default, alias = "padre")]
    pub parent: Option<CategoryId>,
}

impl Category {
    /// Top-level category
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Payload for creating or updating a category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<CategoryId>,
}

/// Category with its products and direct subcategories
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryWithProducts {
    #[serde(flatten)]
    pub category: Category,
    #[serde(default, alias = "productos")]
    pub products: Vec<Product>,
    #[serde(default, alias = "subcategorias")]
    pub subcategories: Vec<Category>,
    /// Pages of products, when the backend paginates them
    #[serde(default)]
    pub total_pages: Option<u32>,
}

/// Simplified category entry for selects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryChoice {
    pub id: CategoryId,
    #[serde(alias = "nombre")]
    pub name: String,
}

// =============================================================================
// Pagination
// =============================================================================

/// Paginated list envelope: `{ count, next, previous, results }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    /// Single page holding every item
    pub fn single(results: Vec<T>) -> Self {
        Self {
            count: results.len() as u64,
            next: None,
            previous: None,
            results,
        }
    }

    /// More results are available
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_request_validation() {
        assert!(StockMovementRequest::new(1, MovementKind::In, 5).is_ok());
        assert!(matches!(
            StockMovementRequest::new(0, MovementKind::In, 5),
            Err(ValidationError::InvalidProductId(0))
        ));
        assert!(matches!(
            StockMovementRequest::new(1, MovementKind::Out, 0),
            Err(ValidationError::InvalidQuantity { .. })
        ));
        assert!(StockMovementRequest::new(1, MovementKind::Adj, 0).is_ok());
        assert!(StockMovementRequest::new(1, MovementKind::Adj, -1).is_err());
    }

    #[test]
    fn test_request_parse_rejects_unknown_kind() {
        let err = StockMovementRequest::parse(1, "MOVE", 3).unwrap_err();
        assert_eq!(err, ValidationError::InvalidMovementKind("MOVE".to_string()));
    }

    #[test]
    fn test_ensure_operation_id_is_stable() {
        let mut request = StockMovementRequest::new(3, MovementKind::In, 2).unwrap();
        assert!(request.operation_id().is_none());

        let first = request.ensure_operation_id().clone();
        let second = request.ensure_operation_id().clone();
        assert_eq!(first, second);
        assert_eq!(request.operation_id(), Some(&first));
    }

    #[test]
    fn test_caller_operation_id_kept() {
        let op = OperationId::new("op-123").unwrap();
        let mut request = StockMovementRequest::new(3, MovementKind::In, 2)
            .unwrap()
            .with_operation_id(op.clone());
        assert_eq!(request.ensure_operation_id(), &op);
    }

    #[test]
    fn test_blank_notes_dropped() {
        let request = StockMovementRequest::new(3, MovementKind::In, 2).unwrap().with_notes("   ");
        assert_eq!(request.notes(), None);

        let request = StockMovementRequest::new(3, MovementKind::In, 2)
            .unwrap()
            .with_notes(" restock ");
        assert_eq!(request.notes(), Some("restock"));
    }

    #[test]
    fn test_movement_record_accepts_backend_aliases() {
        let record: MovementRecord = serde_json::from_value(json!({
            "id": 9,
            "producto": 3,
            "movimiento_tipo": "OUT",
            "cantidad": 4,
            "notas": "",
            "created_at": "2024-01-15T10:00:00Z",
            "usuario": {"id": 1, "email": "ana@example.com", "nombre": "Ana"}
        }))
        .unwrap();

        assert_eq!(record.product_id.get(), 3);
        assert_eq!(record.movement_kind, MovementKind::Out);
        assert_eq!(record.quantity, 4);
        assert!(!record.already_applied);
        assert_eq!(record.performed_by.unwrap().name.as_deref(), Some("Ana"));
    }

    #[test]
    fn test_movement_record_duplicate_indicator() {
        let record: MovementRecord = serde_json::from_value(json!({
            "id": 9,
            "product_id": 3,
            "movement_kind": "IN",
            "quantity": 4,
            "created_at": "2024-01-15T10:00:00Z",
            "duplicate": true
        }))
        .unwrap();
        assert!(record.already_applied);
    }

    #[test]
    fn test_record_matches_request() {
        let request = StockMovementRequest::new(3, MovementKind::In, 4).unwrap();
        let mut record = MovementRecord {
            id: 1,
            product_id: ProductId::new(3).unwrap(),
            movement_kind: MovementKind::In,
            quantity: 4,
            notes: None,
            created_at: Utc::now(),
            resulting_stock: Some(14),
            operation_id: None,
            performed_by: None,
            already_applied: false,
        };
        assert!(record.matches(&request));

        record.quantity = 5;
        assert!(!record.matches(&request));
    }

    #[test]
    fn test_product_low_stock() {
        let product: Product = serde_json::from_value(json!({
            "id": 1,
            "nombre": "Tornillo M4",
            "stock": 3,
            "min_stock": 5,
            "coste_precio": "0.15"
        }))
        .unwrap();

        assert!(product.is_low_stock());
        assert!(product.is_active);
        assert_eq!(product.cost_price, Some(dec!(0.15)));
    }

    #[test]
    fn test_product_patch_has_no_stock() {
        let patch = ProductPatch {
            name: Some("Tornillo M5".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value, json!({"name": "Tornillo M5"}));
    }

    #[test]
    fn test_page_deserialize() {
        let page: Page<Category> = serde_json::from_value(json!({
            "count": 2,
            "next": null,
            "previous": null,
            "results": [
                {"id": 1, "name": "Ferretería"},
                {"id": 2, "nombre": "Tornillos", "padre": 1}
            ]
        }))
        .unwrap();

        assert_eq!(page.count, 2);
        assert!(!page.has_next());
        assert!(page.results[0].is_root());
        assert_eq!(page.results[1].parent, Some(1));
    }

    #[test]
    fn test_category_with_products_deserialize() {
        let detail: CategoryWithProducts = serde_json::from_value(json!({
            "id": 2,
            "nombre": "Tornillos",
            "padre": 1,
            "productos": [{"id": 7, "nombre": "Tornillo M4", "stock": 40, "min_stock": 10}],
            "subcategorias": [{"id": 5, "nombre": "Allen", "padre": 2}],
            "total_pages": 3
        }))
        .unwrap();

        assert_eq!(detail.category.name, "Tornillos");
        assert_eq!(detail.category.parent, Some(1));
        assert_eq!(detail.products[0].stock, 40);
        assert_eq!(detail.subcategories[0].parent, Some(2));
        assert_eq!(detail.total_pages, Some(3));
    }
}
