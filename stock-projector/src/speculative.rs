//! Optimistic stock projector
//!
//! Speculatively applies a movement to the cached stock before the server
//! confirms it, then commits or rolls back once the response arrives.
//!
//! # Chaining
//!
//! Each snapshot captures the value it found, including earlier speculative
//! writes still pending. Rolling back in reverse order of initiation therefore
//! restores the original value, and rolling back a later operation never
//! clobbers an earlier one.

use std::sync::Arc;
use tracing::{debug, warn};

use stock_domain::{MovementKind, ProductId, ValidationError};

use crate::cache::StockCache;

/// Pre-mutation state of one speculative operation.
///
/// Consumed by exactly one of `commit` or `rollback`.
#[must_use = "a snapshot must be committed or rolled back"]
#[derive(Debug, PartialEq, Eq)]
pub struct Snapshot {
    product_id: ProductId,
    movement_kind: MovementKind,
    quantity: i64,
    /// `None` when the product was not cached and nothing was written
    prior: Option<i64>,
    next: Option<i64>,
    epoch: u64,
}

impl Snapshot {
    /// Product the operation targets
    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    /// Movement kind being predicted
    pub fn movement_kind(&self) -> MovementKind {
        self.movement_kind
    }

    /// Quantity being predicted
    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    /// Cached stock before the speculative write
    pub fn prior_stock(&self) -> Option<i64> {
        self.prior
    }

    /// Value written speculatively
    pub fn speculative_stock(&self) -> Option<i64> {
        self.next
    }

    /// Whether a speculative write happened
    pub fn is_speculative(&self) -> bool {
        self.prior.is_some()
    }
}

/// Speculative apply / commit / rollback over a shared [`StockCache`].
#[derive(Debug, Clone)]
pub struct OptimisticProjector {
    cache: Arc<StockCache>,
}

impl OptimisticProjector {
    /// Create a projector over `cache`
    pub fn new(cache: Arc<StockCache>) -> Self {
        Self { cache }
    }

    /// The cache this projector writes to
    pub fn cache(&self) -> &Arc<StockCache> {
        &self.cache
    }

    /// Write the predicted stock for a movement into the cache.
    ///
    /// Nothing is written when the product is not cached.
    ///
    /// # Errors
    /// `ValidationError::InvalidQuantity` when `quantity` breaks the rule of
    /// `kind`; the cache is untouched
    pub fn begin_speculative(
        &self,
        product_id: ProductId,
        kind: MovementKind,
        quantity: i64,
    ) -> Result<Snapshot, ValidationError> {
        kind.validate_quantity(quantity)?;

        let speculation = self.cache.speculate(product_id, kind, quantity);
        match speculation {
            Some(s) => debug!(
                %product_id,
                movement_kind = %kind,
                quantity,
                prior = s.prior,
                next = s.next,
                "Speculative stock written"
            ),
            None => debug!(%product_id, movement_kind = %kind, "Product not cached, nothing to predict"),
        }

        Ok(Snapshot {
            product_id,
            movement_kind: kind,
            quantity,
            prior: speculation.map(|s| s.prior),
            next: speculation.map(|s| s.next),
            epoch: speculation.map_or(0, |s| s.epoch),
        })
    }

    /// Accept the operation.
    ///
    /// The entry is left as is; the caller refreshes or evicts it from the
    /// authoritative response.
    pub fn commit(&self, snapshot: Snapshot) {
        self.cache.settle(snapshot.product_id);
        debug!(product_id = %snapshot.product_id, "Speculative stock committed");
    }

    /// Restore the value the snapshot found.
    ///
    /// Skipped when the entry was refreshed or evicted since the snapshot:
    /// authoritative state always wins. Returns whether the cache changed.
    pub fn rollback(&self, snapshot: Snapshot) -> bool {
        self.cache.settle(snapshot.product_id);

        let Some(prior) = snapshot.prior else {
            return false;
        };

        let restored = self.cache.restore(snapshot.product_id, prior, snapshot.epoch);
        if restored {
            warn!(
                product_id = %snapshot.product_id,
                movement_kind = %snapshot.movement_kind,
                prior,
                discarded = ?snapshot.next,
                "Speculative stock rolled back"
            );
        } else {
            debug!(
                product_id = %snapshot.product_id,
                "Rollback skipped, entry changed authoritatively"
            );
        }
        restored
    }
}
