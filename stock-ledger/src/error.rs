//! Ledger client error types.

use stock_domain::{MovementRecord, OperationId, StockMovementRequest, ValidationError};
use thiserror::Error;
use tracing::warn;

/// Errors surfaced by the movement ledger.
///
/// `Validation` never reaches the network. `Transport` is safe to retry with
/// the same operation id. `RejectedByServer` needs caller intervention.
/// `Conflict` means the operation was already applied and resolves to the
/// existing record.
#[derive(Debug, Clone, Error)]
pub enum SubmitError {
    /// Local, pre-flight validation failure
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Network failure, timeout, 5xx or unreadable response
    #[error("Transport error: {reason}")]
    Transport {
        /// Token to reuse when retrying, for movement submissions
        operation_id: Option<OperationId>,
        /// What went wrong
        reason: String,
    },

    /// Business-rule violation or unknown entity
    #[error("Rejected by server: {reason}")]
    RejectedByServer {
        /// HTTP status, when the rejection came over the wire
        status: Option<u16>,
        /// Server-provided message
        reason: String,
    },

    /// The operation id was already applied
    #[error("Operation already applied: {operation_id}")]
    Conflict {
        /// Token that collided
        operation_id: OperationId,
        /// The previously applied record, when the server returned it
        existing: Option<Box<MovementRecord>>,
    },
}

impl SubmitError {
    /// Create a transport error
    pub fn transport(operation_id: Option<&OperationId>, reason: impl Into<String>) -> Self {
        Self::Transport {
            operation_id: operation_id.cloned(),
            reason: reason.into(),
        }
    }

    /// Create a server rejection
    pub fn rejected(status: Option<u16>, reason: impl Into<String>) -> Self {
        Self::RejectedByServer {
            status,
            reason: reason.into(),
        }
    }

    /// Whether resubmitting with the same operation id is safe and useful
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmitError::Transport { .. })
    }

    /// Whether this is a duplicate that resolves to an earlier success
    pub fn is_conflict(&self) -> bool {
        matches!(self, SubmitError::Conflict { .. })
    }

    /// Build the error for a duplicate report, checking the existing record.
    ///
    /// A record that describes a different movement than `request` means the
    /// token was reused with another payload; that is surfaced as a server
    /// rejection instead of a success-equivalent conflict.
    pub fn duplicate(
        request: &StockMovementRequest,
        operation_id: &OperationId,
        existing: Option<MovementRecord>,
    ) -> Self {
        match existing {
            Some(record) if !record.matches(request) => {
                warn!(
                    %operation_id,
                    record_id = record.id,
                    "Operation id reused with a different payload"
                );
                Self::payload_mismatch(operation_id)
            },
            existing => Self::Conflict {
                operation_id: operation_id.clone(),
                existing: existing.map(Box::new),
            },
        }
    }

    /// Rejection for a token that was applied with another payload
    pub fn payload_mismatch(operation_id: &OperationId) -> Self {
        Self::rejected(
            Some(409),
            format!("operation_id {} was already used for a different movement", operation_id),
        )
    }
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, SubmitError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stock_domain::{MovementKind, ProductId};

    fn record(quantity: i64) -> MovementRecord {
        MovementRecord {
            id: 7,
            product_id: ProductId::new(1).unwrap(),
            movement_kind: MovementKind::In,
            quantity,
            notes: None,
            created_at: Utc::now(),
            resulting_stock: None,
            operation_id: None,
            performed_by: None,
            already_applied: true,
        }
    }

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(SubmitError::transport(None, "timeout").is_retryable());
        assert!(!SubmitError::rejected(Some(422), "negative stock").is_retryable());
        assert!(!SubmitError::from(ValidationError::InvalidProductId(0)).is_retryable());
    }

    #[test]
    fn test_duplicate_with_matching_record_is_conflict() {
        let request = StockMovementRequest::new(1, MovementKind::In, 5).unwrap();
        let op = OperationId::new("op-1").unwrap();

        let err = SubmitError::duplicate(&request, &op, Some(record(5)));
        match err {
            SubmitError::Conflict { operation_id, existing } => {
                assert_eq!(operation_id, op);
                assert_eq!(existing.unwrap().id, 7);
            },
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_with_different_payload_is_rejected() {
        let request = StockMovementRequest::new(1, MovementKind::In, 5).unwrap();
        let op = OperationId::new("op-1").unwrap();

        let err = SubmitError::duplicate(&request, &op, Some(record(9)));
        assert!(matches!(err, SubmitError::RejectedByServer { status: Some(409), .. }));
    }

    #[test]
    fn test_duplicate_without_record_is_conflict() {
        let request = StockMovementRequest::new(1, MovementKind::In, 5).unwrap();
        let op = OperationId::new("op-1").unwrap();

        let err = SubmitError::duplicate(&request, &op, None);
        assert!(matches!(err, SubmitError::Conflict { existing: None, .. }));
    }
}
