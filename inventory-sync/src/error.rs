//! Reconciliation error types.

use stock_domain::ValidationError;
use stock_ledger::SubmitError;
use thiserror::Error;

/// Errors surfaced by the movement service.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed movement, caught before anything was sent
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Ledger failure; the cached projection has already been reconciled
    #[error(transparent)]
    Ledger(#[from] SubmitError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// The ledger error, if this is one
    pub fn as_submit_error(&self) -> Option<&SubmitError> {
        match self {
            SyncError::Ledger(e) => Some(e),
            SyncError::Validation(_) | SyncError::Config(_) => None,
        }
    }

    /// Whether resubmitting the same request later may succeed
    pub fn is_retryable(&self) -> bool {
        self.as_submit_error().is_some_and(SubmitError::is_retryable)
    }
}

/// Result type for reconciliation operations.
pub type SyncResult<T> = Result<T, SyncError>;
