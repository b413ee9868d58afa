//! # Stock Ledger
//!
//! Authoritative in-process stock counts with a durable mirror in the store.
//!
//! ## Reservation
//! ```text
//! reserve(sale_number, lines)          ── one ledger lock for the whole step ──
//!     │
//!     ├── 1. aggregate quantities per product
//!     ├── 2. load any product the ledger does not track yet
//!     ├── 3. check EVERY product: available ≥ requested
//!     │        └── any short ──► InsufficientStock, nothing changed
//!     ├── 4. mirror each decrement via adjust_product_quantity
//!     │        └── any failure ──► undo mirrored rows, PersistenceFailed
//!     ├── 5. decrement in memory
//!     └── 6. Reservation (+ low stock alerts after the lock is dropped)
//! ```
//!
//! Releases follow the same rule: memory changes only once every store
//! write went through. A release the store refuses is kept and written
//! before the next reservation or restock.
//!
//! Two reservations never interleave, so the last unit of a product can be
//! taken by at most one sale.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vendra_core::{Product, Sale, SaleLine};

use crate::error::{EngineError, EngineResult, StoreResult};
use crate::events::{LowStockAlert, PosEventEmitter};
use crate::store::{PosStore, StockReason};

// =============================================================================
// Reservation
// =============================================================================

/// Quantity held for one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedLine {
    pub product_id: i64,
    pub quantity: i64,
}

/// Stock taken out of the ledger for one sale.
///
/// Either kept (the sale committed) or handed back through
/// [`StockLedger::release`] or [`StockLedger::release_with`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a reservation must be committed or released"]
pub struct Reservation {
    id: Uuid,
    sale_number: String,
    lines: Vec<ReservedLine>,
}

impl Reservation {
    /// Reservation covering every line of an already committed sale, used
    /// to give its stock back when the sale is voided.
    pub fn for_sale(sale: &Sale) -> Self {
        Reservation {
            id: Uuid::new_v4(),
            sale_number: sale.sale_number.clone(),
            lines: aggregate(&sale.lines),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sale_number(&self) -> &str {
        &self.sale_number
    }

    pub fn lines(&self) -> &[ReservedLine] {
        &self.lines
    }

    pub fn quantity_of(&self, product_id: i64) -> i64 {
        self.lines
            .iter()
            .filter(|l| l.product_id == product_id)
            .map(|l| l.quantity)
            .sum()
    }

    /// The sale was persisted; the stock stays taken.
    pub fn commit(self) {
        debug!(reservation = %self.id, sale_number = %self.sale_number, "Reservation committed");
    }
}

/// Sums quantities per product, keeping first-seen order.
fn aggregate(lines: &[SaleLine]) -> Vec<ReservedLine> {
    let mut out: Vec<ReservedLine> = Vec::with_capacity(lines.len());
    for line in lines {
        match out.iter_mut().find(|r| r.product_id == line.product_id) {
            Some(existing) => existing.quantity += line.quantity,
            None => out.push(ReservedLine {
                product_id: line.product_id,
                quantity: line.quantity,
            }),
        }
    }
    out
}

// =============================================================================
// Ledger
// =============================================================================

#[derive(Debug, Clone)]
struct LedgerEntry {
    code: String,
    name: String,
    quantity: i64,
    alert_threshold: i64,
}

impl LedgerEntry {
    fn from_product(product: &Product) -> Self {
        LedgerEntry {
            code: product.code.clone(),
            name: product.name.clone(),
            quantity: product.quantity,
            alert_threshold: product.alert_threshold,
        }
    }

    fn is_low(&self) -> bool {
        self.quantity <= self.alert_threshold
    }

    fn alert(&self, product_id: i64) -> LowStockAlert {
        LowStockAlert {
            product_id,
            code: self.code.clone(),
            name: self.name.clone(),
            quantity: self.quantity,
            alert_threshold: self.alert_threshold,
        }
    }
}

/// Serializes every stock change of the terminal.
pub struct StockLedger {
    entries: Mutex<HashMap<i64, LedgerEntry>>,
    /// Releases the store refused. Locked only while `entries` is held.
    unreleased: Mutex<Vec<Reservation>>,
    store: Arc<dyn PosStore>,
    emitter: Arc<dyn PosEventEmitter>,
}

impl StockLedger {
    pub fn new(store: Arc<dyn PosStore>, emitter: Arc<dyn PosEventEmitter>) -> Self {
        StockLedger {
            entries: Mutex::new(HashMap::new()),
            unreleased: Mutex::new(Vec::new()),
            store,
            emitter,
        }
    }

    /// Replaces the ledger contents with `products`. Returns how many are
    /// tracked.
    pub async fn hydrate(&self, products: &[Product]) -> usize {
        let mut entries = self.entries.lock().await;
        entries.clear();
        for product in products {
            entries.insert(product.id, LedgerEntry::from_product(product));
        }
        info!(products = entries.len(), "Stock ledger hydrated");
        entries.len()
    }

    /// Starts tracking `product`, or refreshes its labels if already
    /// tracked. The ledger's own count wins over the product snapshot.
    /// Returns the tracked quantity.
    pub async fn track(&self, product: &Product) -> i64 {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(&product.id) {
            Some(entry) => {
                entry.code = product.code.clone();
                entry.name = product.name.clone();
                entry.alert_threshold = product.alert_threshold;
                entry.quantity
            }
            None => {
                entries.insert(product.id, LedgerEntry::from_product(product));
                product.quantity
            }
        }
    }

    pub async fn quantity(&self, product_id: i64) -> Option<i64> {
        self.entries.lock().await.get(&product_id).map(|e| e.quantity)
    }

    /// Tracked products at or below their alert threshold.
    pub async fn low_stock(&self) -> Vec<LowStockAlert> {
        let entries = self.entries.lock().await;
        let mut alerts: Vec<LowStockAlert> = entries
            .iter()
            .filter(|(_, e)| e.is_low())
            .map(|(id, e)| e.alert(*id))
            .collect();
        alerts.sort_by_key(|a| a.product_id);
        alerts
    }

    /// Takes the stock for `lines`, all or nothing.
    ///
    /// ## Returns
    /// * `Ok(Reservation)` - Memory and store both decremented
    /// * `Err(EngineError::InsufficientStock)` - First product short;
    ///   nothing changed
    /// * `Err(EngineError::ProductNotFound)` - A line names an unknown product
    /// * `Err(EngineError::PersistenceFailed)` - Mirror failed; mirrored
    ///   rows were undone and memory was never touched
    pub async fn reserve(&self, sale_number: &str, lines: &[SaleLine]) -> EngineResult<Reservation> {
        let wanted = aggregate(lines);
        debug!(sale_number = %sale_number, products = wanted.len(), "Reserving stock");

        let mut entries = self.entries.lock().await;
        self.settle(&mut entries).await;

        for line in &wanted {
            if !entries.contains_key(&line.product_id) {
                let product = self
                    .store
                    .load_product_by_id(line.product_id)
                    .await?
                    .ok_or_else(|| EngineError::ProductNotFound(line.product_id.to_string()))?;
                entries.insert(product.id, LedgerEntry::from_product(&product));
            }
        }

        for line in &wanted {
            let available = entries.get(&line.product_id).map_or(0, |e| e.quantity);
            if available < line.quantity {
                warn!(
                    sale_number = %sale_number,
                    product_id = %line.product_id,
                    requested = line.quantity,
                    available,
                    "Insufficient stock"
                );
                return Err(EngineError::InsufficientStock {
                    product_id: line.product_id,
                    requested: line.quantity,
                    available,
                });
            }
        }

        if let Err(e) = self.mirror(sale_number, &wanted, -1).await {
            return Err(EngineError::PersistenceFailed(e));
        }
        apply(&mut entries, &wanted, -1);

        let alerts: Vec<LowStockAlert> = wanted
            .iter()
            .filter_map(|line| {
                entries
                    .get(&line.product_id)
                    .filter(|e| e.is_low())
                    .map(|e| e.alert(line.product_id))
            })
            .collect();
        drop(entries);

        for alert in &alerts {
            warn!(
                product_id = %alert.product_id,
                code = %alert.code,
                quantity = alert.quantity,
                threshold = alert.alert_threshold,
                "Low stock"
            );
            self.emitter.low_stock(alert);
        }

        let reservation = Reservation {
            id: Uuid::new_v4(),
            sale_number: sale_number.to_string(),
            lines: wanted,
        };
        debug!(reservation = %reservation.id, sale_number = %sale_number, "Stock reserved");
        Ok(reservation)
    }

    /// Gives the reserved quantities back, in the store first and then in
    /// memory.
    ///
    /// ## Returns
    /// * `Ok(())` - Every line written and restored
    /// * `Err(EngineError::PersistenceFailed)` - The store refused a line;
    ///   lines already written were undone and memory is unchanged. The
    ///   reservation is kept and retried by [`StockLedger::retry_releases`]
    ///   and before the next reservation or restock.
    pub async fn release(&self, reservation: Reservation) -> EngineResult<()> {
        let mut entries = self.entries.lock().await;

        if let Err(e) = self.mirror(&reservation.sale_number, &reservation.lines, 1).await {
            warn!(
                reservation = %reservation.id,
                sale_number = %reservation.sale_number,
                "Stock release kept for retry"
            );
            self.unreleased.lock().await.push(reservation);
            return Err(EngineError::PersistenceFailed(e));
        }
        apply(&mut entries, &reservation.lines, 1);

        info!(
            reservation = %reservation.id,
            sale_number = %reservation.sale_number,
            "Stock released"
        );
        Ok(())
    }

    /// Gives the stock of a committed sale back and runs `finish` while the
    /// ledger is still locked. If `finish` fails the store writes are undone
    /// and memory is left as it was, so the sale can be voided again later.
    pub async fn release_with<T, F>(&self, reservation: Reservation, finish: F) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        let mut entries = self.entries.lock().await;

        self.mirror(&reservation.sale_number, &reservation.lines, 1)
            .await
            .map_err(EngineError::PersistenceFailed)?;

        match finish.await {
            Ok(value) => {
                apply(&mut entries, &reservation.lines, 1);
                info!(
                    reservation = %reservation.id,
                    sale_number = %reservation.sale_number,
                    "Stock released"
                );
                Ok(value)
            }
            Err(e) => {
                warn!(
                    sale_number = %reservation.sale_number,
                    error = %e,
                    "Release aborted, taking the stock back"
                );
                self.unmirror(&reservation.sale_number, &reservation.lines, 1).await;
                Err(e)
            }
        }
    }

    /// Retries releases the store refused earlier. Returns how many are
    /// still waiting.
    pub async fn retry_releases(&self) -> usize {
        let mut entries = self.entries.lock().await;
        self.settle(&mut entries).await
    }

    /// Number of releases waiting for the store.
    pub async fn unreleased(&self) -> usize {
        self.unreleased.lock().await.len()
    }

    /// Changes one product's stock outside of a sale (goods received,
    /// corrections). Returns the new quantity.
    pub async fn restock(&self, product_id: i64, delta: i64, reason: StockReason) -> EngineResult<i64> {
        let mut entries = self.entries.lock().await;
        self.settle(&mut entries).await;

        if !entries.contains_key(&product_id) {
            let product = self
                .store
                .load_product_by_id(product_id)
                .await?
                .ok_or_else(|| EngineError::ProductNotFound(product_id.to_string()))?;
            entries.insert(product.id, LedgerEntry::from_product(&product));
        }

        let Some(entry) = entries.get_mut(&product_id) else {
            return Err(EngineError::ProductNotFound(product_id.to_string()));
        };

        let updated = entry.quantity + delta;
        if updated < 0 {
            return Err(EngineError::InsufficientStock {
                product_id,
                requested: -delta,
                available: entry.quantity,
            });
        }

        self.store
            .adjust_product_quantity(product_id, delta, &reason)
            .await?;
        entry.quantity = updated;

        info!(product_id = %product_id, delta, quantity = updated, reason = %reason.note(), "Stock adjusted");
        Ok(updated)
    }

    /// Writes every kept release whose store write now succeeds. Must be
    /// called with the entries lock held.
    async fn settle(&self, entries: &mut HashMap<i64, LedgerEntry>) -> usize {
        let mut unreleased = self.unreleased.lock().await;
        if unreleased.is_empty() {
            return 0;
        }

        let waiting = std::mem::take(&mut *unreleased);
        for reservation in waiting {
            match self.mirror(&reservation.sale_number, &reservation.lines, 1).await {
                Ok(()) => {
                    apply(entries, &reservation.lines, 1);
                    info!(
                        reservation = %reservation.id,
                        sale_number = %reservation.sale_number,
                        "Kept stock release written"
                    );
                }
                Err(_) => unreleased.push(reservation),
            }
        }
        unreleased.len()
    }

    /// Writes `sign × quantity` for every line to the store, all or nothing.
    /// Lines already written are undone when a later one fails.
    async fn mirror(&self, sale_number: &str, lines: &[ReservedLine], sign: i64) -> StoreResult<()> {
        for (written, line) in lines.iter().enumerate() {
            if let Err(e) = self
                .store
                .adjust_product_quantity(line.product_id, sign * line.quantity, &reason(sale_number, sign))
                .await
            {
                error!(
                    sale_number = %sale_number,
                    product_id = %line.product_id,
                    error = %e,
                    "Stock mirror failed, undoing written lines"
                );
                self.unmirror(sale_number, &lines[..written], sign).await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Best-effort reversal of store writes made with `sign`.
    async fn unmirror(&self, sale_number: &str, written: &[ReservedLine], sign: i64) {
        for line in written {
            if let Err(e) = self
                .store
                .adjust_product_quantity(line.product_id, -sign * line.quantity, &reason(sale_number, -sign))
                .await
            {
                error!(
                    sale_number = %sale_number,
                    product_id = %line.product_id,
                    error = %e,
                    "Failed to undo mirrored stock change"
                );
            }
        }
    }
}

fn reason(sale_number: &str, sign: i64) -> StockReason {
    if sign < 0 {
        StockReason::Sale(sale_number.to_string())
    } else {
        StockReason::SaleReleased(sale_number.to_string())
    }
}

/// Adds `sign × quantity` to every tracked line.
fn apply(entries: &mut HashMap<i64, LedgerEntry>, lines: &[ReservedLine], sign: i64) {
    for line in lines {
        match entries.get_mut(&line.product_id) {
            Some(entry) => entry.quantity += sign * line.quantity,
            None => debug!(product_id = %line.product_id, "Product not tracked, store only"),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::events::RecordingEmitter;
    use crate::store::fixtures::product;
    use crate::store::{MemoryStore, StoreOp};
    use vendra_core::MovementType;

    struct Fixture {
        store: Arc<MemoryStore>,
        emitter: Arc<RecordingEmitter>,
        ledger: Arc<StockLedger>,
    }

    /// Rice: 5 units, oil: 10 units, both with an alert threshold of 2.
    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let rice = product(1, "P-RICE", 100_000, 5);
        let oil = product(2, "P-OIL", 2_500, 10);
        store.insert_product(rice.clone()).await;
        store.insert_product(oil.clone()).await;

        let emitter = Arc::new(RecordingEmitter::new());
        let ledger = Arc::new(StockLedger::new(store.clone(), emitter.clone()));
        ledger.hydrate(&[rice, oil]).await;

        Fixture {
            store,
            emitter,
            ledger,
        }
    }

    fn lines(items: &[(i64, i64)]) -> Vec<SaleLine> {
        items
            .iter()
            .map(|(id, qty)| SaleLine::from_product(&product(*id, &format!("P-{id}"), 100, 99), *qty))
            .collect()
    }

    #[tokio::test]
    async fn test_reserve_decrements_memory_and_store() {
        let f = fixture().await;

        let reservation = f.ledger.reserve("VNT-1-1", &lines(&[(1, 2), (2, 3)])).await.unwrap();
        assert_eq!(reservation.quantity_of(1), 2);
        assert_eq!(reservation.sale_number(), "VNT-1-1");

        assert_eq!(f.ledger.quantity(1).await, Some(3));
        assert_eq!(f.ledger.quantity(2).await, Some(7));
        assert_eq!(f.store.product(1).await.unwrap().quantity, 3);
        assert_eq!(f.store.product(2).await.unwrap().quantity, 7);

        let movements = f.store.movements(1).await;
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].movement_type, MovementType::Out);
        reservation.commit();
    }

    #[tokio::test]
    async fn test_reserve_is_all_or_nothing() {
        let f = fixture().await;

        let err = f.ledger.reserve("VNT-1-1", &lines(&[(2, 3), (1, 6)])).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientStock {
                product_id: 1,
                requested: 6,
                available: 5
            }
        ));

        assert_eq!(f.ledger.quantity(1).await, Some(5));
        assert_eq!(f.ledger.quantity(2).await, Some(10));
        assert_eq!(f.store.product(2).await.unwrap().quantity, 10);
        assert!(f.store.movements(2).await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_lines_are_summed() {
        let f = fixture().await;

        let err = f.ledger.reserve("VNT-1-1", &lines(&[(1, 3), (1, 3)])).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientStock { requested: 6, .. }));
    }

    #[tokio::test]
    async fn test_mirror_failure_rolls_back() {
        let f = fixture().await;
        // First mirrored line succeeds, second fails
        f.store.fail_once_after(StoreOp::AdjustQuantity, 1).await;

        let err = f.ledger.reserve("VNT-1-1", &lines(&[(1, 2), (2, 3)])).await.unwrap_err();
        assert!(matches!(err, EngineError::PersistenceFailed(_)));
        assert!(err.is_retryable());

        assert_eq!(f.ledger.quantity(1).await, Some(5));
        assert_eq!(f.ledger.quantity(2).await, Some(10));
        assert_eq!(f.store.product(1).await.unwrap().quantity, 5);
        assert_eq!(f.store.product(2).await.unwrap().quantity, 10);
    }

    #[tokio::test]
    async fn test_release_restores() {
        let f = fixture().await;

        let reservation = f.ledger.reserve("VNT-1-1", &lines(&[(1, 5)])).await.unwrap();
        assert_eq!(f.ledger.quantity(1).await, Some(0));

        f.ledger.release(reservation).await.unwrap();
        assert_eq!(f.ledger.quantity(1).await, Some(5));
        assert_eq!(f.store.product(1).await.unwrap().quantity, 5);

        let movements = f.store.movements(1).await;
        assert_eq!(movements.len(), 2);
        assert_eq!(movements[1].movement_type, MovementType::In);
        assert_eq!(movements[1].reason.as_deref(), Some("release VNT-1-1"));
    }

    #[tokio::test]
    async fn test_refused_release_keeps_counts_in_step() {
        let f = fixture().await;
        let reservation = f.ledger.reserve("VNT-1-1", &lines(&[(1, 2), (2, 3)])).await.unwrap();

        // Rice goes back, oil is refused
        f.store.fail_once_after(StoreOp::AdjustQuantity, 1).await;
        let err = f.ledger.release(reservation).await.unwrap_err();
        assert!(matches!(err, EngineError::PersistenceFailed(_)));

        assert_eq!(f.ledger.quantity(1).await, Some(3));
        assert_eq!(f.ledger.quantity(2).await, Some(7));
        assert_eq!(f.store.product(1).await.unwrap().quantity, 3);
        assert_eq!(f.store.product(2).await.unwrap().quantity, 7);
        assert_eq!(f.ledger.unreleased().await, 1);

        f.store.fail(StoreOp::AdjustQuantity).await;
        assert_eq!(f.ledger.retry_releases().await, 1);
        f.store.heal(StoreOp::AdjustQuantity).await;

        assert_eq!(f.ledger.retry_releases().await, 0);
        assert_eq!(f.ledger.quantity(1).await, Some(5));
        assert_eq!(f.ledger.quantity(2).await, Some(10));
        assert_eq!(f.store.product(1).await.unwrap().quantity, 5);
        assert_eq!(f.store.product(2).await.unwrap().quantity, 10);
    }

    #[tokio::test]
    async fn test_kept_release_is_written_before_next_reservation() {
        let f = fixture().await;
        let reservation = f.ledger.reserve("VNT-1-1", &lines(&[(1, 5)])).await.unwrap();

        f.store.fail(StoreOp::AdjustQuantity).await;
        assert!(f.ledger.release(reservation).await.is_err());
        f.store.heal(StoreOp::AdjustQuantity).await;

        let next = f.ledger.reserve("VNT-1-2", &lines(&[(1, 4)])).await.unwrap();
        next.commit();
        assert_eq!(f.ledger.unreleased().await, 0);
        assert_eq!(f.ledger.quantity(1).await, Some(1));
        assert_eq!(f.store.product(1).await.unwrap().quantity, 1);
    }

    #[tokio::test]
    async fn test_release_with_undoes_when_finish_fails() {
        let f = fixture().await;
        f.ledger.reserve("VNT-1-1", &lines(&[(2, 4)])).await.unwrap().commit();

        let reservation = Reservation {
            id: Uuid::new_v4(),
            sale_number: "VNT-1-1".into(),
            lines: vec![ReservedLine { product_id: 2, quantity: 4 }],
        };
        let err = f
            .ledger
            .release_with(reservation, async {
                Err::<(), _>(EngineError::PersistenceFailed(StoreError::Unavailable("down".into())))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PersistenceFailed(_)));
        assert_eq!(f.ledger.quantity(2).await, Some(6));
        assert_eq!(f.store.product(2).await.unwrap().quantity, 6);

        let reservation = Reservation {
            id: Uuid::new_v4(),
            sale_number: "VNT-1-1".into(),
            lines: vec![ReservedLine { product_id: 2, quantity: 4 }],
        };
        let value = f.ledger.release_with(reservation, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(f.ledger.quantity(2).await, Some(10));
        assert_eq!(f.store.product(2).await.unwrap().quantity, 10);
    }

    #[tokio::test]
    async fn test_low_stock_alert() {
        let f = fixture().await;

        let reservation = f.ledger.reserve("VNT-1-1", &lines(&[(1, 3), (2, 1)])).await.unwrap();
        reservation.commit();

        let alerts = f.emitter.low_stock_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].product_id, 1);
        assert_eq!(alerts[0].quantity, 2);
        assert_eq!(f.ledger.low_stock().await, alerts);
    }

    #[tokio::test]
    async fn test_untracked_product_is_loaded() {
        let f = fixture().await;
        f.store.insert_product(product(3, "P-SALT", 300, 4)).await;

        let reservation = f.ledger.reserve("VNT-1-1", &lines(&[(3, 1)])).await.unwrap();
        reservation.commit();
        assert_eq!(f.ledger.quantity(3).await, Some(3));

        let err = f.ledger.reserve("VNT-1-2", &lines(&[(99, 1)])).await.unwrap_err();
        assert!(matches!(err, EngineError::ProductNotFound(_)));
    }

    #[tokio::test]
    async fn test_track_keeps_ledger_count() {
        let f = fixture().await;
        f.ledger.reserve("VNT-1-1", &lines(&[(1, 2)])).await.unwrap().commit();

        // A stale snapshot must not overwrite the ledger
        let stale = product(1, "P-RICE", 100_000, 5);
        assert_eq!(f.ledger.track(&stale).await, 3);
        assert_eq!(f.ledger.quantity(1).await, Some(3));
    }

    #[tokio::test]
    async fn test_restock() {
        let f = fixture().await;

        assert_eq!(f.ledger.restock(1, 10, StockReason::Restock).await.unwrap(), 15);
        assert_eq!(f.store.product(1).await.unwrap().quantity, 15);

        let err = f
            .ledger
            .restock(1, -20, StockReason::Adjustment("breakage".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientStock { available: 15, .. }));

        f.store.fail(StoreOp::AdjustQuantity).await;
        assert!(f.ledger.restock(1, 1, StockReason::Restock).await.is_err());
        assert_eq!(f.ledger.quantity(1).await, Some(15));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_for_last_unit() {
        let f = fixture().await;
        f.ledger.restock(2, -9, StockReason::Adjustment("count".into())).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let ledger = f.ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.reserve(&format!("VNT-1-{i}"), &lines(&[(2, 1)])).await
            }));
        }

        let mut won = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(reservation) => {
                    won += 1;
                    reservation.commit();
                }
                Err(e) => assert!(matches!(e, EngineError::InsufficientStock { .. })),
            }
        }

        assert_eq!(won, 1);
        assert_eq!(f.ledger.quantity(2).await, Some(0));
        assert_eq!(f.store.product(2).await.unwrap().quantity, 0);
    }
}
