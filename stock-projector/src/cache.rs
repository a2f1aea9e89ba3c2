//! Session-scoped stock projection cache
//!
//! Holds the client's view of each product's stock plus the staleness of
//! the aggregate views that depend on it. Thread-safe using RwLock.
//!
//! Every authoritative refresh stamps the entry with a fresh epoch, and
//! eviction removes it outright. Speculative writes keep the epoch they found, which is how
//! a rollback detects that the server has spoken since its snapshot.
//!
//! Stock reported by a movement record is only accepted if the record is
//! newer than the last one seen for that product. Responses to concurrent
//! movements can arrive out of order.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use stock_domain::{MovementId, MovementKind, Product, ProductId};

/// Aggregate views derived from product stock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheView {
    /// Product list
    Products,
    /// Low-stock view
    LowStock,
    /// Movement list
    Movements,
}

impl CacheView {
    /// Views affected by any applied movement
    pub const ALL: [CacheView; 3] = [CacheView::Products, CacheView::LowStock, CacheView::Movements];
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    stock: i64,
    epoch: u64,
}

/// Result of a speculative write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Speculation {
    pub prior: i64,
    pub next: i64,
    pub epoch: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<ProductId, Entry>,
    in_flight: HashMap<ProductId, usize>,
    /// Newest movement record applied per product; survives eviction
    watermarks: HashMap<ProductId, MovementId>,
    stale: HashSet<CacheView>,
}

/// Stock projection cache.
#[derive(Debug, Default)]
pub struct StockCache {
    state: RwLock<CacheState>,
    epoch: AtomicU64,
}

impl StockCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Cached stock, if the product has been fetched
    pub fn get(&self, product_id: ProductId) -> Option<i64> {
        self.read().entries.get(&product_id).map(|e| e.stock)
    }

    /// Authoritative write: always overrides speculative state
    pub fn refresh(&self, product_id: ProductId, stock: i64) {
        let epoch = self.next_epoch();
        self.write().entries.insert(product_id, Entry { stock, epoch });
        debug!(%product_id, stock, epoch, "Cache refreshed");
    }

    /// Authoritative write from a fetched product
    pub fn refresh_product(&self, product: &Product) {
        self.refresh(product.id, product.stock);
    }

    /// Authoritative write from the stock a movement record reports.
    ///
    /// Ignored when a newer record for the product was already applied.
    /// Returns whether the entry was written.
    pub fn refresh_from_movement(
        &self,
        product_id: ProductId,
        stock: i64,
        movement_id: MovementId,
    ) -> bool {
        let epoch = self.next_epoch();
        let mut state = self.write();
        if state
            .watermarks
            .get(&product_id)
            .is_some_and(|seen| *seen >= movement_id)
        {
            debug!(%product_id, movement_id, "Older movement record ignored");
            return false;
        }
        state.watermarks.insert(product_id, movement_id);
        state.entries.insert(product_id, Entry { stock, epoch });
        debug!(%product_id, stock, epoch, movement_id, "Cache refreshed from movement");
        true
    }

    /// Drop the entry; the next read must go to the server
    pub fn evict(&self, product_id: ProductId) -> Option<i64> {
        let evicted = self.write().entries.remove(&product_id).map(|e| e.stock);
        debug!(%product_id, ?evicted, "Cache entry evicted");
        evicted
    }

    /// Mark an aggregate view as needing a refetch
    pub fn invalidate_view(&self, view: CacheView) {
        self.write().stale.insert(view);
    }

    /// Mark every aggregate view as needing a refetch
    pub fn invalidate_all_views(&self) {
        self.write().stale.extend(CacheView::ALL);
    }

    /// Mark an aggregate view as refetched
    pub fn mark_fresh(&self, view: CacheView) {
        self.write().stale.remove(&view);
    }

    /// Whether a view needs a refetch
    pub fn is_stale(&self, view: CacheView) -> bool {
        self.read().stale.contains(&view)
    }

    /// Speculative operations not yet committed or rolled back
    pub fn in_flight(&self, product_id: ProductId) -> usize {
        self.read().in_flight.get(&product_id).copied().unwrap_or(0)
    }

    /// Number of cached products
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// No cached products
    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Drop every entry (e.g. on logout). In-flight counters are kept.
    pub fn clear(&self) {
        let mut state = self.write();
        state.entries.clear();
        state.watermarks.clear();
        state.stale.clear();
    }

    // =========================================================================
    // Projector hooks
    // =========================================================================

    /// Apply `kind`/`quantity` to the current entry in one step.
    ///
    /// Returns `None` and leaves the entries alone when the product is not
    /// cached. The in-flight counter is raised either way.
    pub(crate) fn speculate(
        &self,
        product_id: ProductId,
        kind: MovementKind,
        quantity: i64,
    ) -> Option<Speculation> {
        let mut state = self.write();
        *state.in_flight.entry(product_id).or_insert(0) += 1;

        let entry = state.entries.get_mut(&product_id)?;
        let prior = entry.stock;
        entry.stock = kind.apply_to(prior, quantity);
        Some(Speculation {
            prior,
            next: entry.stock,
            epoch: entry.epoch,
        })
    }

    /// Restore `prior` if the entry has seen no authoritative write since `epoch`
    pub(crate) fn restore(&self, product_id: ProductId, prior: i64, epoch: u64) -> bool {
        let mut state = self.write();
        match state.entries.get_mut(&product_id) {
            Some(entry) if entry.epoch == epoch => {
                entry.stock = prior;
                true
            },
            _ => false,
        }
    }

    /// Lower the in-flight counter after commit or rollback
    pub(crate) fn settle(&self, product_id: ProductId) {
        let mut state = self.write();
        if let Some(count) = state.in_flight.get_mut(&product_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.in_flight.remove(&product_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(id: i64) -> ProductId {
        ProductId::new(id).unwrap()
    }

    #[test]
    fn test_older_movement_record_ignored() {
        let cache = StockCache::new();
        cache.refresh(pid(1), 10);

        assert!(cache.refresh_from_movement(pid(1), 12, 2));
        assert!(!cache.refresh_from_movement(pid(1), 15, 1));
        assert_eq!(cache.get(pid(1)), Some(12));

        // Eviction keeps the watermark
        cache.evict(pid(1));
        assert!(!cache.refresh_from_movement(pid(1), 15, 1));
        assert_eq!(cache.get(pid(1)), None);

        assert!(cache.refresh_from_movement(pid(1), 9, 3));
        assert_eq!(cache.get(pid(1)), Some(9));
    }

    #[test]
    fn test_refresh_and_get() {
        let cache = StockCache::new();
        assert_eq!(cache.get(pid(1)), None);

        cache.refresh(pid(1), 10);
        assert_eq!(cache.get(pid(1)), Some(10));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_speculate_without_entry_is_noop() {
        let cache = StockCache::new();
        assert_eq!(cache.speculate(pid(1), MovementKind::In, 5), None);
        assert_eq!(cache.get(pid(1)), None);
        assert_eq!(cache.in_flight(pid(1)), 1);
    }

    #[test]
    fn test_restore_skipped_after_refresh() {
        let cache = StockCache::new();
        cache.refresh(pid(1), 10);
        let pending = cache.speculate(pid(1), MovementKind::In, 5).unwrap();

        cache.refresh(pid(1), 15);
        assert!(!cache.restore(pid(1), pending.prior, pending.epoch));
        assert_eq!(cache.get(pid(1)), Some(15));
    }

    #[test]
    fn test_restore_skipped_after_evict_and_refetch() {
        let cache = StockCache::new();
        cache.refresh(pid(1), 10);
        let pending = cache.speculate(pid(1), MovementKind::Out, 3).unwrap();

        cache.evict(pid(1));
        assert!(!cache.restore(pid(1), pending.prior, pending.epoch));
        assert_eq!(cache.get(pid(1)), None);

        cache.refresh(pid(1), 7);
        assert!(!cache.restore(pid(1), pending.prior, pending.epoch));
        assert_eq!(cache.get(pid(1)), Some(7));
    }

    #[test]
    fn test_settle_counts_down() {
        let cache = StockCache::new();
        cache.refresh(pid(1), 10);
        let _ = cache.speculate(pid(1), MovementKind::In, 1);
        let _ = cache.speculate(pid(1), MovementKind::In, 1);
        assert_eq!(cache.in_flight(pid(1)), 2);

        cache.settle(pid(1));
        cache.settle(pid(1));
        cache.settle(pid(1));
        assert_eq!(cache.in_flight(pid(1)), 0);
    }

    #[test]
    fn test_view_staleness() {
        let cache = StockCache::new();
        assert!(!cache.is_stale(CacheView::LowStock));

        cache.invalidate_all_views();
        assert!(CacheView::ALL.iter().all(|v| cache.is_stale(*v)));

        cache.mark_fresh(CacheView::LowStock);
        assert!(!cache.is_stale(CacheView::LowStock));
        assert!(cache.is_stale(CacheView::Movements));
    }

    #[test]
    fn test_clear_drops_entries() {
        let cache = StockCache::new();
        cache.refresh(pid(1), 10);
        cache.refresh(pid(2), 20);
        cache.invalidate_view(CacheView::Products);

        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.is_stale(CacheView::Products));
    }
}
