//! Value Objects for the inventory domain
//!
//! Immutable, validated domain primitives.
//! All value objects enforce invariants at construction time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Local validation failures, raised before anything reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Product ids are positive integers
    #[error("Invalid product id: {0}")]
    InvalidProductId(i64),

    /// Movement kind is not one of IN, OUT, ADJ
    #[error("Invalid movement kind: {0:?}")]
    InvalidMovementKind(String),

    /// Quantity violates the rule of its movement kind
    #[error("Invalid quantity {quantity} for {kind} movement: {reason}")]
    InvalidQuantity {
        /// Kind the quantity was checked against
        kind: MovementKind,
        /// Offending quantity
        quantity: i64,
        /// Rule that was broken
        reason: &'static str,
    },

    /// Operation ids must be non-empty
    #[error("Invalid operation id: {0:?}")]
    InvalidOperationId(String),
}

// =============================================================================
// ProductId
// =============================================================================

/// Identity of a product on the authoritative service.
///
/// # Invariants
/// - Must be > 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct ProductId(i64);

impl ProductId {
    /// Create a new ProductId with validation
    ///
    /// # Errors
    /// Returns `ValidationError::InvalidProductId` if value <= 0
    pub fn new(value: i64) -> Result<Self, ValidationError> {
        if value <= 0 {
            return Err(ValidationError::InvalidProductId(value));
        }
        Ok(Self(value))
    }

    /// Get the underlying integer
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for ProductId {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProductId> for i64 {
    fn from(id: ProductId) -> Self {
        id.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// MovementKind
// =============================================================================

/// Kind of stock movement.
///
/// IN and OUT are relative to the current stock, ADJ sets an absolute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementKind {
    /// Stock entering (addition)
    #[serde(rename = "IN")]
    In,
    /// Stock leaving (subtraction)
    #[serde(rename = "OUT")]
    Out,
    /// Absolute adjustment (set)
    #[serde(rename = "ADJ")]
    Adj,
}

impl MovementKind {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::In => "IN",
            MovementKind::Out => "OUT",
            MovementKind::Adj => "ADJ",
        }
    }

    /// Check a quantity against this kind's rule.
    ///
    /// IN/OUT need a strictly positive quantity. ADJ carries the resulting
    /// stock, so zero is allowed but negatives are not.
    ///
    /// # Errors
    /// Returns `ValidationError::InvalidQuantity` when the rule is broken
    pub fn validate_quantity(&self, quantity: i64) -> Result<(), ValidationError> {
        match self {
            MovementKind::In | MovementKind::Out if quantity <= 0 => {
                Err(ValidationError::InvalidQuantity {
                    kind: *self,
                    quantity,
                    reason: "must be greater than zero",
                })
            },
            MovementKind::Adj if quantity < 0 => Err(ValidationError::InvalidQuantity {
                kind: *self,
                quantity,
                reason: "must not be negative",
            }),
            _ => Ok(()),
        }
    }

    /// Stock that results from applying this movement to `prior`.
    ///
    /// The result may be negative; the authoritative service decides whether
    /// that is acceptable.
    pub fn apply_to(&self, prior: i64, quantity: i64) -> i64 {
        match self {
            MovementKind::In => prior.saturating_add(quantity),
            MovementKind::Out => prior.saturating_sub(quantity),
            MovementKind::Adj => quantity,
        }
    }
}

impl FromStr for MovementKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IN" => Ok(MovementKind::In),
            "OUT" => Ok(MovementKind::Out),
            "ADJ" => Ok(MovementKind::Adj),
            _ => Err(ValidationError::InvalidMovementKind(s.to_string())),
        }
    }
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// OperationId
// =============================================================================

/// Client-generated idempotency token.
///
/// Stable across retries of the same logical operation: generate it once
/// and reuse the value on every transmission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OperationId(String);

impl OperationId {
    /// Generate a fresh random token (UUID v4)
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap a caller-supplied token
    ///
    /// # Errors
    /// Returns `ValidationError::InvalidOperationId` if the token is blank
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ValidationError::InvalidOperationId(value));
        }
        Ok(Self(value))
    }

    /// Token as string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OperationId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OperationId> for String {
    fn from(id: OperationId) -> Self {
        id.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================
