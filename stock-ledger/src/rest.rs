//! Inventory REST client
//!
//! HTTP/JSON adapter for the authoritative inventory backend:
//! - Creating stock movements with idempotency tokens
//! - Product and category CRUD
//! - Paginated list queries
//!
//! # Authentication
//!
//! When a bearer token is configured, every request carries
//! `Authorization: Bearer <token>`. Credentials never touch the
//! `Idempotency-Key` header or the body's `operation_id`.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use stock_domain::{
    Category, CategoryChoice, CategoryId, CategoryInput, CategoryWithProducts, MovementId,
    MovementRecord, NewProduct, OperationId, Page, Product, ProductId, ProductPatch,
    StockMovementRequest,
};

use crate::error::{LedgerResult, SubmitError};
use crate::ports::{LedgerPort, MovementRoute};
use crate::query::{CategoryFilter, ListQuery, MovementFilter, ProductFilter};
use crate::wire::{MovementPayload, IDEMPOTENCY_HEADER};

// =============================================================================
// Constants
// =============================================================================

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

const MOVEMENTS_PATH: &str = "/inventario/movimientos/";
const PRODUCTS_PATH: &str = "/inventario/productos/";
const CATEGORIES_PATH: &str = "/inventario/categorias/";

// =============================================================================
// Ledger Client
// =============================================================================

/// REST client for the inventory backend.
///
/// Stateless between calls: it only carries connection settings.
#[derive(Debug, Clone)]
pub struct LedgerClient {
    /// HTTP client
    client: Client,
    /// Base URL, without trailing slash (e.g. `https://host/api`)
    base_url: String,
    /// Bearer credential attached to every call
    bearer_token: Option<String>,
    /// Upper bound per call
    timeout: Duration,
}

impl LedgerClient {
    /// Create a client for `base_url` with no credentials.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            base_url,
            bearer_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Attach a bearer credential
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Drop the bearer credential (logout)
    pub fn without_credentials(mut self) -> Self {
        self.bearer_token = None;
        self
    }

    /// Override the per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Configured base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request, returning status and raw body.
    ///
    /// Connection failures and elapsed timeouts become `Transport`.
    async fn send(
        &self,
        builder: RequestBuilder,
        operation_id: Option<&OperationId>,
    ) -> LedgerResult<(StatusCode, String)> {
        let response = timeout(self.timeout, builder.send())
            .await
            .map_err(|_| {
                SubmitError::transport(
                    operation_id,
                    format!("request timed out after {:?}", self.timeout),
                )
            })?
            .map_err(|e| SubmitError::transport(operation_id, e.to_string()))?;

        let status = response.status();
        let body = timeout(self.timeout, response.text())
            .await
            .map_err(|_| SubmitError::transport(operation_id, "timed out reading response body"))?
            .map_err(|e| SubmitError::transport(operation_id, e.to_string()))?;

        Ok((status, body))
    }

    /// Send a request and decode a JSON success body.
    async fn fetch<T: DeserializeOwned>(&self, builder: RequestBuilder) -> LedgerResult<T> {
        let (status, body) = self.send(builder, None).await?;
        if !status.is_success() {
            return Err(classify_failure(status, &body, None));
        }
        serde_json::from_str(&body)
            .map_err(|e| SubmitError::transport(None, format!("unreadable response: {}", e)))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &ListQuery) -> LedgerResult<T> {
        let mut builder = self.request(Method::GET, path);
        if !query.is_empty() {
            builder = builder.query(query.pairs());
        }
        self.fetch(builder).await
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> LedgerResult<T> {
        self.fetch(self.request(method, path).json(body)).await
    }

    async fn delete(&self, path: &str) -> LedgerResult<()> {
        let (status, body) = self.send(self.request(Method::DELETE, path), None).await?;
        if !status.is_success() {
            return Err(classify_failure(status, &body, None));
        }
        Ok(())
    }

    // =========================================================================
    // Movements
    // =========================================================================

    /// Create a movement.
    ///
    /// # Endpoint
    ///
    /// `POST /inventario/movimientos/` with `Idempotency-Key`
    pub async fn create_movement(&self, request: &StockMovementRequest) -> LedgerResult<MovementRecord> {
        self.send_movement(Method::POST, MOVEMENTS_PATH.to_string(), request).await
    }

    /// Adjust a product's stock in place by creating a movement on it.
    ///
    /// # Endpoint
    ///
    /// `PATCH /inventario/productos/{id}/stock/` with `Idempotency-Key`
    pub async fn patch_product_stock(
        &self,
        request: &StockMovementRequest,
    ) -> LedgerResult<MovementRecord> {
        let path = format!("{}{}/stock/", PRODUCTS_PATH, request.product_id());
        self.send_movement(Method::PATCH, path, request).await
    }

    async fn send_movement(
        &self,
        method: Method,
        path: String,
        request: &StockMovementRequest,
    ) -> LedgerResult<MovementRecord> {
        // Pre-flight: malformed input never reaches the network
        request.validate()?;

        let operation_id = match request.operation_id() {
            Some(id) => id.clone(),
            None => OperationId::generate(),
        };
        let payload = MovementPayload::new(request, &operation_id);

        debug!(
            %operation_id,
            product_id = %request.product_id(),
            movement_kind = %request.movement_kind(),
            quantity = request.quantity(),
            %method,
            "Submitting stock movement"
        );

        let builder = self
            .request(method, &path)
            .header(IDEMPOTENCY_HEADER, operation_id.as_str())
            .json(&payload);

        let (status, body) = self.send(builder, Some(&operation_id)).await?;
        let record = classify_movement_response(status, &body, request, &operation_id)?;

        info!(
            %operation_id,
            record_id = record.id,
            product_id = %record.product_id,
            resulting_stock = ?record.resulting_stock,
            "Stock movement applied"
        );

        Ok(record)
    }

    /// List movements.
    pub async fn list_movements(&self, filter: &MovementFilter) -> LedgerResult<Page<MovementRecord>> {
        self.get_json(MOVEMENTS_PATH, &filter.to_query()).await
    }

    /// Movement detail.
    pub async fn get_movement(&self, id: MovementId) -> LedgerResult<MovementRecord> {
        self.get_json(&format!("{}{}/", MOVEMENTS_PATH, id), &ListQuery::new()).await
    }

    /// Find the movement applied under `operation_id`.
    pub async fn find_movement_by_operation(
        &self,
        operation_id: &OperationId,
    ) -> LedgerResult<Option<MovementRecord>> {
        let page = self.list_movements(&MovementFilter::for_operation(operation_id)).await?;
        Ok(page
            .results
            .into_iter()
            .find(|r| r.operation_id.as_ref().is_some_and(|op| op == operation_id)))
    }

    // =========================================================================
    // Products
    // =========================================================================

    /// List products.
    pub async fn list_products(&self, filter: &ProductFilter) -> LedgerResult<Page<Product>> {
        self.get_json(PRODUCTS_PATH, &filter.to_query()).await
    }

    /// Products at or below their minimum stock.
    pub async fn list_low_stock(&self, filter: &ProductFilter) -> LedgerResult<Page<Product>> {
        self.get_json(&format!("{}low-stock/", PRODUCTS_PATH), &filter.to_query())
            .await
    }

    /// Quick search by name.
    pub async fn search_products(&self, q: &str) -> LedgerResult<Page<Product>> {
        let mut query = ListQuery::new();
        query.push("q", q);
        self.get_json(&format!("{}search/", PRODUCTS_PATH), &query).await
    }

    /// Product detail.
    pub async fn get_product(&self, id: ProductId) -> LedgerResult<Product> {
        self.get_json(&format!("{}{}/", PRODUCTS_PATH, id), &ListQuery::new()).await
    }

    /// Create a product.
    pub async fn create_product(&self, product: &NewProduct) -> LedgerResult<Product> {
        self.send_json(Method::POST, PRODUCTS_PATH, product).await
    }

    /// Update product attributes (never stock).
    pub async fn update_product(&self, id: ProductId, patch: &ProductPatch) -> LedgerResult<Product> {
        self.send_json(Method::PATCH, &format!("{}{}/", PRODUCTS_PATH, id), patch)
            .await
    }

    /// Delete a product.
    pub async fn delete_product(&self, id: ProductId) -> LedgerResult<()> {
        self.delete(&format!("{}{}/", PRODUCTS_PATH, id)).await
    }

    // =========================================================================
    // Categories
    // =========================================================================

    /// List categories.
    pub async fn list_categories(&self, filter: &CategoryFilter) -> LedgerResult<Page<Category>> {
        self.get_json(CATEGORIES_PATH, &filter.to_query()).await
    }

    /// Category detail.
    pub async fn get_category(&self, id: CategoryId) -> LedgerResult<Category> {
        self.get_json(&format!("{}{}/", CATEGORIES_PATH, id), &ListQuery::new())
            .await
    }

    /// Simplified list for selects.
    pub async fn category_choices(&self) -> LedgerResult<Vec<CategoryChoice>> {
        self.get_json(&format!("{}choices/", CATEGORIES_PATH), &ListQuery::new())
            .await
    }

    /// Search categories by name.
    pub async fn search_categories(&self, q: &str) -> LedgerResult<Page<Category>> {
        let mut query = ListQuery::new();
        query.push("q", q);
        self.get_json(&format!("{}search/", CATEGORIES_PATH), &query).await
    }

    /// Category with one page of its products and its subcategories.
    pub async fn get_category_with_products(
        &self,
        id: CategoryId,
        page: Option<u32>,
    ) -> LedgerResult<CategoryWithProducts> {
        let mut query = ListQuery::new();
        query.push_opt("page", page);
        self.get_json(&format!("{}{}/productos/", CATEGORIES_PATH, id), &query)
            .await
    }

    /// Create a category (set `parent` for a subcategory).
    pub async fn create_category(&self, input: &CategoryInput) -> LedgerResult<Category> {
        self.send_json(Method::POST, CATEGORIES_PATH, input).await
    }

    /// Update a category.
    pub async fn update_category(
        &self,
        id: CategoryId,
        input: &CategoryInput,
    ) -> LedgerResult<Category> {
        self.send_json(Method::PATCH, &format!("{}{}/", CATEGORIES_PATH, id), input)
            .await
    }

    /// Delete a category.
    pub async fn delete_category(&self, id: CategoryId) -> LedgerResult<()> {
        self.delete(&format!("{}{}/", CATEGORIES_PATH, id)).await
    }
}

#[async_trait]
impl LedgerPort for LedgerClient {
    async fn submit_via(
        &self,
        request: &StockMovementRequest,
        route: MovementRoute,
    ) -> Result<MovementRecord, SubmitError> {
        match route {
            MovementRoute::Create => self.create_movement(request).await,
            MovementRoute::AdjustInPlace => self.patch_product_stock(request).await,
        }
    }

    async fn find_by_operation(
        &self,
        operation_id: &OperationId,
    ) -> Result<Option<MovementRecord>, SubmitError> {
        self.find_movement_by_operation(operation_id).await
    }

    async fn fetch_product(&self, product_id: ProductId) -> Result<Product, SubmitError> {
        self.get_product(product_id).await
    }
}

// =============================================================================
// Response classification
// =============================================================================

/// Map a movement response to a record or a typed failure.
///
/// - 2xx: the record, or `Conflict` when it is flagged as already applied
/// - 409: `Conflict`, with the record when the body is one
/// - 5xx or unreadable 2xx body: `Transport`
/// - other: `RejectedByServer`
pub(crate) fn classify_movement_response(
    status: StatusCode,
    body: &str,
    request: &StockMovementRequest,
    operation_id: &OperationId,
) -> LedgerResult<MovementRecord> {
    if status.is_success() {
        let record: MovementRecord = serde_json::from_str(body).map_err(|e| {
            SubmitError::transport(Some(operation_id), format!("unreadable movement record: {}", e))
        })?;

        if record.already_applied {
            warn!(%operation_id, record_id = record.id, "Movement already applied");
            return Err(SubmitError::duplicate(request, operation_id, Some(record)));
        }
        return Ok(record);
    }

    if status == StatusCode::CONFLICT {
        warn!(%operation_id, "Server reported duplicate operation");
        let existing = serde_json::from_str::<MovementRecord>(body).ok();
        return Err(SubmitError::duplicate(request, operation_id, existing));
    }

    Err(classify_failure(status, body, Some(operation_id)))
}

fn classify_failure(status: StatusCode, body: &str, operation_id: Option<&OperationId>) -> SubmitError {
    if status.is_server_error() {
        return SubmitError::transport(operation_id, format!("HTTP {}: {}", status, extract_error_message(body)));
    }
    SubmitError::rejected(Some(status.as_u16()), extract_error_message(body))
}

/// Pull a human-readable message out of an error body.
///
/// Understands `{"detail": ".."}` and field-error maps
/// (`{"quantity": ["must be positive"]}`), taking the first message.
pub fn extract_error_message(body: &str) -> String {
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => return body.trim().chars().take(200).collect(),
    };

    fn first_message(value: &serde_json::Value) -> Option<String> {
        match value {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Array(items) => items.iter().find_map(first_message),
            serde_json::Value::Object(map) => {
                if let Some(detail) = map.get("detail").and_then(first_message) {
                    return Some(detail);
                }
                map.iter().find_map(|(key, v)| {
                    first_message(v).map(|msg| {
                        if key == "non_field_errors" {
                            msg
                        } else {
                            format!("{}: {}", key, msg)
                        }
                    })
                })
            },
            _ => None,
        }
    }

    first_message(&value).unwrap_or_else(|| value.to_string())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stock_domain::MovementKind;

    fn request() -> StockMovementRequest {
        StockMovementRequest::new(3, MovementKind::In, 5).unwrap()
    }

    fn op() -> OperationId {
        OperationId::new("op-1").unwrap()
    }

    fn record_body(quantity: i64, duplicate: bool) -> String {
        json!({
            "id": 11,
            "product_id": 3,
            "movement_kind": "IN",
            "quantity": quantity,
            "notes": null,
            "created_at": "2024-01-15T10:00:00Z",
            "resulting_stock": 15,
            "operation_id": "op-1",
            "already_applied": duplicate
        })
        .to_string()
    }

    #[test]
    fn test_client_trims_base_url() {
        let client = LedgerClient::new("http://localhost:8000/api/");
        assert_eq!(client.base_url(), "http://localhost:8000/api");
        assert_eq!(client.url(MOVEMENTS_PATH), "http://localhost:8000/api/inventario/movimientos/");
    }

    #[test]
    fn test_created_record_is_success() {
        let record =
            classify_movement_response(StatusCode::CREATED, &record_body(5, false), &request(), &op())
                .unwrap();
        assert_eq!(record.id, 11);
        assert_eq!(record.resulting_stock, Some(15));
    }

    #[test]
    fn test_flagged_record_is_conflict() {
        let err = classify_movement_response(StatusCode::OK, &record_body(5, true), &request(), &op())
            .unwrap_err();
        match err {
            SubmitError::Conflict { existing, .. } => assert_eq!(existing.unwrap().id, 11),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_409_without_record_is_bare_conflict() {
        let body = json!({"detail": "duplicate operation"}).to_string();
        let err = classify_movement_response(StatusCode::CONFLICT, &body, &request(), &op()).unwrap_err();
        assert!(matches!(err, SubmitError::Conflict { existing: None, .. }));
    }

    #[test]
    fn test_409_with_mismatched_record_is_rejected() {
        let err =
            classify_movement_response(StatusCode::CONFLICT, &record_body(8, true), &request(), &op())
                .unwrap_err();
        assert!(matches!(err, SubmitError::RejectedByServer { status: Some(409), .. }));
    }

    #[test]
    fn test_server_error_is_transport_with_token() {
        let err = classify_movement_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "upstream down",
            &request(),
            &op(),
        )
        .unwrap_err();
        match err {
            SubmitError::Transport { operation_id, .. } => assert_eq!(operation_id, Some(op())),
            other => panic!("expected transport, got {other:?}"),
        }
    }

    #[test]
    fn test_unreadable_success_is_transport() {
        let err = classify_movement_response(StatusCode::CREATED, "<html>", &request(), &op())
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_validation_failure_is_rejected() {
        let body = json!({"quantity": ["Stock cannot go below zero."]}).to_string();
        let err = classify_movement_response(StatusCode::BAD_REQUEST, &body, &request(), &op())
            .unwrap_err();
        match err {
            SubmitError::RejectedByServer { status, reason } => {
                assert_eq!(status, Some(400));
                assert_eq!(reason, "quantity: Stock cannot go below zero.");
            },
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_extract_error_message_variants() {
        assert_eq!(extract_error_message(r#"{"detail": "Not found."}"#), "Not found.");
        assert_eq!(
            extract_error_message(r#"{"non_field_errors": ["Invalid movement."]}"#),
            "Invalid movement."
        );
        assert_eq!(extract_error_message("plain text"), "plain text");
    }
}
