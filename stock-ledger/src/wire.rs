//! Movement wire payload and payload fingerprinting.
//!
//! The same operation id travels in the JSON body and in the
//! `Idempotency-Key` header so the service can deduplicate at either layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stock_domain::{
    MovementKind, OperationId, ProductId, StockMovementRequest, ValidationError,
};

/// Header carrying the idempotency token
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// JSON body of a create/adjust movement call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementPayload {
    pub operation_id: OperationId,
    pub product_id: i64,
    pub movement_kind: MovementKind,
    pub quantity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performed_at: Option<DateTime<Utc>>,
}

impl MovementPayload {
    /// Build the body for `request` under `operation_id`
    pub fn new(request: &StockMovementRequest, operation_id: &OperationId) -> Self {
        Self {
            operation_id: operation_id.clone(),
            product_id: request.product_id().get(),
            movement_kind: request.movement_kind(),
            quantity: request.quantity(),
            notes: request.notes().map(str::to_string),
            performed_at: request.performed_at(),
        }
    }

    /// Rebuild a validated request from a received body
    ///
    /// # Errors
    /// Any validation failure of the carried fields
    pub fn into_request(self) -> Result<StockMovementRequest, ValidationError> {
        let mut request = StockMovementRequest::new(self.product_id, self.movement_kind, self.quantity)?
            .with_operation_id(self.operation_id);
        if let Some(notes) = self.notes {
            request = request.with_notes(notes);
        }
        if let Some(performed_at) = self.performed_at {
            request = request.with_performed_at(performed_at);
        }
        Ok(request)
    }
}

/// Compute a fingerprint of the semantic content of a movement.
///
/// Formula: SHA256(product_id + movement_kind + quantity)
///
/// Notes and timestamps are left out: two transmissions that differ only in
/// those describe the same stock effect. Returned as hex prefixed with "fp_".
pub fn payload_fingerprint(product_id: ProductId, kind: MovementKind, quantity: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(product_id.get().to_be_bytes());
    hasher.update(kind.as_str().as_bytes());
    hasher.update(quantity.to_be_bytes());
    format!("fp_{}", hex::encode(hasher.finalize()))
}

/// Fingerprint of a request
pub fn request_fingerprint(request: &StockMovementRequest) -> String {
    payload_fingerprint(request.product_id(), request.movement_kind(), request.quantity())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_body_shape() {
        let request = StockMovementRequest::new(3, MovementKind::In, 5).unwrap().with_notes("restock");
        let op = OperationId::new("op-1").unwrap();

        let value = serde_json::to_value(MovementPayload::new(&request, &op)).unwrap();
        assert_eq!(
            value,
            json!({
                "operation_id": "op-1",
                "product_id": 3,
                "movement_kind": "IN",
                "quantity": 5,
                "notes": "restock"
            })
        );
    }

    #[test]
    fn test_into_request_revalidates() {
        let payload: MovementPayload = serde_json::from_value(json!({
            "operation_id": "op-1",
            "product_id": 3,
            "movement_kind": "OUT",
            "quantity": 0
        }))
        .unwrap();

        assert!(matches!(
            payload.into_request(),
            Err(ValidationError::InvalidQuantity { .. })
        ));
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let id = ProductId::new(3).unwrap();
        let a = payload_fingerprint(id, MovementKind::In, 5);
        let b = payload_fingerprint(id, MovementKind::In, 5);

        assert_eq!(a, b);
        assert!(a.starts_with("fp_"));
    }

    #[test]
    fn test_fingerprint_ignores_notes() {
        let a = StockMovementRequest::new(3, MovementKind::Out, 2).unwrap().with_notes("first");
        let b = StockMovementRequest::new(3, MovementKind::Out, 2).unwrap().with_notes("second");
        assert_eq!(request_fingerprint(&a), request_fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_differs_by_kind_and_quantity() {
        let id = ProductId::new(3).unwrap();
        let base = payload_fingerprint(id, MovementKind::In, 5);

        assert_ne!(base, payload_fingerprint(id, MovementKind::Adj, 5));
        assert_ne!(base, payload_fingerprint(id, MovementKind::In, 6));
    }
}
