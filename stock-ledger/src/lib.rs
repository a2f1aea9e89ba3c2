//! Inventory Movement Ledger
//!
//! Exactly-once-effective stock movement submission against the
//! authoritative inventory service.
//!
//! # Architecture
//!
//! ```text
//! StockMovementRequest → LedgerPort::submit → Idempotency-Key + body → MovementRecord
//! ```
//!
//! # Components
//!
//! - **Ports**: `LedgerPort`, the seam the reconciliation flow talks to
//! - **Rest**: `LedgerClient`, the HTTP/JSON adapter plus catalog endpoints
//! - **Wire**: request body and payload fingerprints
//! - **Stub**: in-memory authoritative ledger for tests
//!
//! # Example
//!
//! ```rust,ignore
//! use stock_domain::{MovementKind, StockMovementRequest};
//! use stock_ledger::{LedgerClient, LedgerPort};
//!
//! let client = LedgerClient::new("http://127.0.0.1:8000/api").with_bearer_token(token);
//! let mut request = StockMovementRequest::new(3, MovementKind::In, 5)?;
//! request.ensure_operation_id();
//!
//! // Safe to resend on a transport error: the token is reused.
//! let record = client.submit(&request).await?;
//! ```

#![warn(clippy::all)]

pub mod error;
pub mod ports;
pub mod query;
pub mod rest;
pub mod stub;
pub mod wire;

// Re-exports for convenience
pub use error::{LedgerResult, SubmitError};
pub use ports::{LedgerPort, MovementRoute};
pub use query::{CategoryFilter, ListQuery, MovementFilter, Paging, ProductFilter};
pub use rest::{extract_error_message, LedgerClient, DEFAULT_TIMEOUT_SECS};
pub use stub::{ApplyOutcome, LedgerRejection, StubFailure, StubLedger};
pub use wire::{payload_fingerprint, request_fingerprint, MovementPayload, IDEMPOTENCY_HEADER};
