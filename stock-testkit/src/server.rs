//! Mock inventory HTTP service.
//!
//! Serves the movement and product endpoints over a [`StubLedger`], with
//! knobs for the failure modes the client has to survive:
//! - duplicate reporting as 409 or as 200 plus `already_applied`
//! - scripted 503s before or after a movement is applied
//! - delayed responses (to trip client timeouts)
//! - bearer token enforcement
//! - a movement list that ignores the `operation_id` filter

use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use stock_domain::{
    CategoryWithProducts, MovementKind, MovementRecord, NewProduct, Page, Product, ProductId,
};
use stock_ledger::{
    ApplyOutcome, LedgerRejection, MovementPayload, MovementRoute, StubFailure, StubLedger,
    IDEMPOTENCY_HEADER,
};

// =============================================================================
// Options
// =============================================================================

/// How the service reports an already-applied operation id
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicateStyle {
    /// 409 Conflict with the original record as body
    #[default]
    Conflict,
    /// 200 OK with the original record flagged `already_applied`
    Indicator,
}

/// Mock server settings
#[derive(Debug, Clone, Default)]
pub struct MockOptions {
    pub duplicate_style: DuplicateStyle,
    /// When set, requests without `Authorization: Bearer <token>` get 401
    pub required_token: Option<String>,
    /// Movement list returns every record regardless of `operation_id`
    pub ignore_operation_filter: bool,
}

/// Category detail page size
const CATEGORY_PRODUCTS_PAGE_SIZE: usize = 20;

// =============================================================================
// State
// =============================================================================

struct MockState {
    ledger: StubLedger,
    options: MockOptions,
    delays: Mutex<VecDeque<Duration>>,
    requests: AtomicU64,
    last_authorization: Mutex<Option<String>>,
    last_idempotency_key: Mutex<Option<String>>,
}

impl MockState {
    /// Count the request and capture its headers
    fn observe(&self, headers: &HeaderMap) {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        *self
            .last_authorization
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = header(AUTHORIZATION.as_str());
        if let Some(key) = header(IDEMPOTENCY_HEADER) {
            *self
                .last_idempotency_key
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(key);
        }
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        let Some(token) = &self.options.required_token else {
            return Ok(());
        };
        let expected = format!("Bearer {}", token);
        let presented = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        if presented == Some(expected.as_str()) {
            Ok(())
        } else {
            Err(detail(
                StatusCode::UNAUTHORIZED,
                "Authentication credentials were not provided.",
            ))
        }
    }

    fn take_delay(&self) -> Option<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

fn detail(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { detail: message.into() })).into_response()
}

// =============================================================================
// Server
// =============================================================================

/// Running mock service bound to an ephemeral local port.
///
/// The server task is aborted on drop.
pub struct MockLedgerServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockLedgerServer {
    /// Start with default options
    pub async fn start(ledger: StubLedger) -> std::io::Result<Self> {
        Self::start_with(ledger, MockOptions::default()).await
    }

    /// Start on `127.0.0.1:0`
    pub async fn start_with(ledger: StubLedger, options: MockOptions) -> std::io::Result<Self> {
        let state = Arc::new(MockState {
            ledger,
            options,
            delays: Mutex::new(VecDeque::new()),
            requests: AtomicU64::new(0),
            last_authorization: Mutex::new(None),
            last_idempotency_key: Mutex::new(None),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let router = create_router(state.clone());

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "Mock ledger server error");
            }
        });

        debug!(%addr, "Mock ledger server started");
        Ok(Self { addr, state, handle })
    }

    /// Base URL for `LedgerClient::new`
    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    /// Bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The ledger behind the server
    pub fn ledger(&self) -> &StubLedger {
        &self.state.ledger
    }

    /// Script a fault for an upcoming movement submission
    pub fn fail_next(&self, failure: StubFailure) {
        self.state.ledger.fail_next(failure);
    }

    /// Hold an upcoming movement response for `delay` after applying it
    pub fn delay_next(&self, delay: Duration) {
        self.state
            .delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(delay);
    }

    /// Requests received on any endpoint
    pub fn requests(&self) -> u64 {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// `Authorization` header of the last request
    pub fn last_authorization(&self) -> Option<String> {
        self.state
            .last_authorization
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Last `Idempotency-Key` header seen
    pub fn last_idempotency_key(&self) -> Option<String> {
        self.state
            .last_idempotency_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for MockLedgerServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// =============================================================================
// Router
// =============================================================================

fn create_router(state: Arc<MockState>) -> Router {
    let api = Router::new()
        .route(
            "/inventario/movimientos/",
            post(create_movement_handler).get(list_movements_handler),
        )
        .route("/inventario/movimientos/:id/", get(get_movement_handler))
        .route(
            "/inventario/productos/",
            get(list_products_handler).post(create_product_handler),
        )
        .route("/inventario/productos/low-stock/", get(low_stock_handler))
        .route("/inventario/productos/:id/", get(get_product_handler))
        .route("/inventario/productos/:id/stock/", patch(patch_stock_handler))
        .route("/inventario/categorias/search/", get(search_categories_handler))
        .route(
            "/inventario/categorias/:id/productos/",
            get(category_products_handler),
        );

    Router::new().nest("/api", api).with_state(state)
}

// =============================================================================
// Movement handlers
// =============================================================================

async fn create_movement_handler(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(payload): Json<MovementPayload>,
) -> Response {
    handle_movement(&state, &headers, payload, None).await
}

async fn patch_stock_handler(
    State(state): State<Arc<MockState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(payload): Json<MovementPayload>,
) -> Response {
    handle_movement(&state, &headers, payload, Some(id)).await
}

async fn handle_movement(
    state: &MockState,
    headers: &HeaderMap,
    payload: MovementPayload,
    path_product: Option<i64>,
) -> Response {
    state.observe(headers);
    if let Err(response) = state.authorize(headers) {
        return response;
    }

    if let Some(key) = headers.get(IDEMPOTENCY_HEADER).and_then(|v| v.to_str().ok()) {
        if key != payload.operation_id.as_str() {
            return detail(
                StatusCode::BAD_REQUEST,
                "Idempotency-Key does not match operation_id",
            );
        }
    }
    if path_product.is_some_and(|id| id != payload.product_id) {
        return detail(StatusCode::BAD_REQUEST, "product_id does not match the URL");
    }

    let operation_id = payload.operation_id.clone();
    let request = match payload.into_request() {
        Ok(request) => request,
        Err(e) => return detail(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let route = match path_product {
        Some(_) => MovementRoute::AdjustInPlace,
        None => MovementRoute::Create,
    };
    let ledger = &state.ledger;
    ledger.note_submission(route);

    match ledger.take_failure() {
        Some(StubFailure::Transport) => {
            return detail(StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable");
        },
        Some(StubFailure::Reject(reason)) => return detail(StatusCode::BAD_REQUEST, reason),
        Some(StubFailure::ResponseLost) => {
            let _ = ledger.apply(&request, &operation_id);
            return detail(StatusCode::SERVICE_UNAVAILABLE, "Upstream connection reset");
        },
        None => {},
    }

    let outcome = ledger.apply(&request, &operation_id);

    if let Some(delay) = state.take_delay() {
        tokio::time::sleep(delay).await;
    }

    match outcome {
        Ok(ApplyOutcome::Applied(record)) => (StatusCode::CREATED, Json(record)).into_response(),
        Ok(ApplyOutcome::Duplicate(record)) => duplicate_response(state, record),
        // The original record goes back; the client sees it does not match
        Err(LedgerRejection::PayloadMismatch(_)) => match ledger.record_for(&operation_id) {
            Some(mut record) => {
                record.already_applied = true;
                duplicate_response(state, record)
            },
            None => detail(StatusCode::CONFLICT, "operation_id already used"),
        },
        Err(rejection) => detail(
            StatusCode::from_u16(rejection.status_code()).unwrap_or(StatusCode::BAD_REQUEST),
            rejection.to_string(),
        ),
    }
}

fn duplicate_response(state: &MockState, record: MovementRecord) -> Response {
    match state.options.duplicate_style {
        DuplicateStyle::Conflict => (StatusCode::CONFLICT, Json(record)).into_response(),
        DuplicateStyle::Indicator => (StatusCode::OK, Json(record)).into_response(),
    }
}

async fn list_movements_handler(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.observe(&headers);
    if let Err(response) = state.authorize(&headers) {
        return response;
    }

    let operation_id = params
        .get("operation_id")
        .filter(|_| !state.options.ignore_operation_filter);
    let product = params.get("producto").and_then(|p| p.parse::<i64>().ok());
    let kind = params.get("tipo").and_then(|k| k.parse::<MovementKind>().ok());

    let results: Vec<MovementRecord> = state
        .ledger
        .records()
        .into_iter()
        .filter(|r| {
            operation_id.map_or(true, |op| {
                r.operation_id.as_ref().is_some_and(|id| id.as_str() == op.as_str())
            })
        })
        .filter(|r| product.map_or(true, |p| r.product_id.get() == p))
        .filter(|r| kind.map_or(true, |k| r.movement_kind == k))
        .collect();

    Json(paginate(results, &params)).into_response()
}

async fn get_movement_handler(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    state.observe(&headers);
    if let Err(response) = state.authorize(&headers) {
        return response;
    }

    match state.ledger.record(id) {
        Some(record) => Json(record).into_response(),
        None => detail(StatusCode::NOT_FOUND, "Not found."),
    }
}

// =============================================================================
// Product handlers
// =============================================================================

async fn list_products_handler(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.observe(&headers);
    if let Err(response) = state.authorize(&headers) {
        return response;
    }

    let results: Vec<_> = state
        .ledger
        .products()
        .into_iter()
        .filter(|p| product_matches(p, &params))
        .collect();

    Json(paginate(results, &params)).into_response()
}

fn product_matches(product: &Product, params: &HashMap<String, String>) -> bool {
    let int = |key: &str| params.get(key).and_then(|v| v.parse::<i64>().ok());
    let flag = |key: &str| params.get(key).and_then(|v| v.parse::<bool>().ok());

    int("categoria").map_or(true, |c| product.category == Some(c))
        && flag("is_active").map_or(true, |active| product.is_active == active)
        && flag("bajo_stock").map_or(true, |low| product.is_low_stock() == low)
        && int("min_stock").map_or(true, |min| product.stock >= min)
        && int("max_stock").map_or(true, |max| product.stock <= max)
        && params.get("q").map_or(true, |q| {
            product.name.to_lowercase().contains(&q.to_lowercase())
        })
}

/// Slice `items` by `page` / `page_size`; everything when no size is given
fn paginate<T>(items: Vec<T>, params: &HashMap<String, String>) -> Page<T> {
    let size = params
        .get("page_size")
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|size| *size > 0);
    let Some(size) = size else {
        return Page::single(items);
    };
    let page = params
        .get("page")
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|page| *page > 0)
        .unwrap_or(1);

    let count = items.len();
    let link = |page: usize| format!("?page={}&page_size={}", page, size);
    let results: Vec<T> = items.into_iter().skip((page - 1) * size).take(size).collect();

    Page {
        count: count as u64,
        next: (page * size < count).then(|| link(page + 1)),
        previous: (page > 1).then(|| link(page - 1)),
        results,
    }
}

async fn low_stock_handler(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
) -> Response {
    state.observe(&headers);
    if let Err(response) = state.authorize(&headers) {
        return response;
    }

    let results: Vec<_> = state
        .ledger
        .products()
        .into_iter()
        .filter(|p| p.is_low_stock())
        .collect();
    Json(Page::single(results)).into_response()
}

async fn get_product_handler(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    state.observe(&headers);
    if let Err(response) = state.authorize(&headers) {
        return response;
    }

    let product = ProductId::new(id).ok().and_then(|id| state.ledger.product(id));
    match product {
        Some(product) => Json(product).into_response(),
        None => detail(StatusCode::NOT_FOUND, "Not found."),
    }
}

async fn create_product_handler(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(new): Json<NewProduct>,
) -> Response {
    state.observe(&headers);
    if let Err(response) = state.authorize(&headers) {
        return response;
    }

    if new.stock < 0 {
        return detail(StatusCode::BAD_REQUEST, "stock: must not be negative");
    }
    match state.ledger.create_product(&new) {
        Ok(product) => (StatusCode::CREATED, Json(product)).into_response(),
        Err(e) => detail(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

// =============================================================================
// Category handlers
// =============================================================================

async fn search_categories_handler(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.observe(&headers);
    if let Err(response) = state.authorize(&headers) {
        return response;
    }

    let q = params.get("q").map(|q| q.to_lowercase()).unwrap_or_default();
    let results: Vec<_> = state
        .ledger
        .categories()
        .into_iter()
        .filter(|c| c.name.to_lowercase().contains(&q))
        .collect();
    Json(Page::single(results)).into_response()
}

async fn category_products_handler(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.observe(&headers);
    if let Err(response) = state.authorize(&headers) {
        return response;
    }

    let Some(category) = state.ledger.category(id) else {
        return detail(StatusCode::NOT_FOUND, "Not found.");
    };
    let products: Vec<_> = state
        .ledger
        .products()
        .into_iter()
        .filter(|p| p.category == Some(id))
        .collect();
    let subcategories: Vec<_> = state
        .ledger
        .categories()
        .into_iter()
        .filter(|c| c.parent == Some(id))
        .collect();

    let page = params
        .get("page")
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|page| *page > 0)
        .unwrap_or(1);
    let total_pages = products.len().div_ceil(CATEGORY_PRODUCTS_PAGE_SIZE).max(1);

    Json(CategoryWithProducts {
        category,
        products: products
            .into_iter()
            .skip((page - 1) * CATEGORY_PRODUCTS_PAGE_SIZE)
            .take(CATEGORY_PRODUCTS_PAGE_SIZE)
            .collect(),
        subcategories,
        total_pages: u32::try_from(total_pages).ok(),
    })
    .into_response()
}

// =============================================================================
// Tests
// =============================================================================
