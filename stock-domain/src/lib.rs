//! Inventory Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains the stock movement vocabulary shared by the ledger client and
//! the optimistic projector, plus the catalog entities they refer to.

#![warn(clippy::all)]

// Public modules
pub mod entities;
pub mod value_objects;

// Re-export commonly used types
pub use entities::{
    Actor, Category, CategoryChoice, CategoryId, CategoryInput, CategoryWithProducts, MovementId, MovementRecord,
    NewProduct, Page, Product, ProductPatch, StockMovementRequest,
};
pub use value_objects::{MovementKind, OperationId, ProductId, ValidationError};
