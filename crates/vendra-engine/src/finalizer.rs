//! # Sale Finalizer
//!
//! Turns the PENDING cart into a COMMITTED, persisted sale.
//!
//! ## Commit Flow
//! ```text
//! finalize(cart)                     cart lock held from start to end
//!     │
//!     ├── 1. session.touch()         ──► NotAuthenticated
//!     ├── 2. cart has lines?         ──► EmptyCart
//!     ├── 3. ledger.reserve(lines)   ──► InsufficientStock (cart untouched)
//!     ├── 4. COMMITTED, owner = principal
//!     ├── 5. store.save_sale(sale)   ──► release reservation, PersistenceFailed
//!     └── 6. clear cart, emit, Receipt
//! ```
//!
//! A failure at any step leaves the cart exactly as it was, so the cashier
//! can fix the problem and press "pay" again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};
use ts_rs::TS;

use vendra_core::{CoreError, Principal, Sale};

use crate::cart::CartHandle;
use crate::error::{EngineError, EngineResult, StoreError};
use crate::events::PosEventEmitter;
use crate::ledger::{Reservation, StockLedger};
use crate::session::SessionManager;
use crate::store::PosStore;

// =============================================================================
// Receipt
// =============================================================================

/// A committed sale as handed back to the till.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Receipt {
    pub sale: Sale,
    /// Display name of the cashier who committed the sale.
    pub cashier: String,
    pub total_items: i64,
    pub final_amount_cents: i64,
    #[ts(as = "String")]
    pub committed_at: DateTime<Utc>,
}

impl Receipt {
    fn new(sale: Sale, principal: &Principal) -> Self {
        Receipt {
            total_items: sale.total_items(),
            final_amount_cents: sale.final_amount().cents(),
            cashier: principal.display_name.clone(),
            committed_at: Utc::now(),
            sale,
        }
    }

    pub fn sale_number(&self) -> &str {
        &self.sale.sale_number
    }
}

// =============================================================================
// Finalizer
// =============================================================================

/// Commits carts and voids committed sales.
pub struct SaleFinalizer {
    session: Arc<SessionManager>,
    ledger: Arc<StockLedger>,
    store: Arc<dyn PosStore>,
    emitter: Arc<dyn PosEventEmitter>,
}

impl SaleFinalizer {
    pub fn new(
        session: Arc<SessionManager>,
        ledger: Arc<StockLedger>,
        store: Arc<dyn PosStore>,
        emitter: Arc<dyn PosEventEmitter>,
    ) -> Self {
        SaleFinalizer {
            session,
            ledger,
            store,
            emitter,
        }
    }

    /// Commits the cart's sale.
    ///
    /// ## Returns
    /// * `Ok(Receipt)` - Sale persisted, stock taken, cart restarted
    /// * `Err(EngineError::NotAuthenticated)` - No Active session
    /// * `Err(EngineError::EmptyCart)` - Nothing to sell
    /// * `Err(EngineError::InsufficientStock)` - A line exceeds stock
    /// * `Err(EngineError::PersistenceFailed)` - Store refused; stock given back
    pub async fn finalize(&self, cart_handle: &CartHandle) -> EngineResult<Receipt> {
        let mut cart = cart_handle.lock().await;
        let principal = self.session.touch().await?;

        if cart.is_empty() {
            return Err(EngineError::EmptyCart);
        }

        let mut sale = cart.to_sale();
        debug!(
            sale_number = %sale.sale_number,
            lines = sale.lines.len(),
            user_id = %principal.id,
            "Finalizing sale"
        );

        let reservation = self.ledger.reserve(&sale.sale_number, &sale.lines).await?;

        if let Err(e) = sale.mark_committed(principal.id) {
            self.give_back(reservation).await;
            return Err(e.into());
        }

        match self.store.save_sale(&sale).await {
            Ok(id) => sale.id = Some(id),
            Err(e) => {
                error!(
                    sale_number = %sale.sale_number,
                    error = %e,
                    "Failed to persist sale, releasing stock"
                );
                self.give_back(reservation).await;
                return Err(EngineError::PersistenceFailed(e));
            }
        }
        reservation.commit();

        cart_handle.restart_after_commit(&mut cart);
        drop(cart);

        info!(
            sale_number = %sale.sale_number,
            user_id = %principal.id,
            final_amount = %sale.final_amount(),
            items = sale.total_items(),
            "Sale committed"
        );

        let receipt = Receipt::new(sale, &principal);
        self.emitter.sale_committed(&receipt);
        Ok(receipt)
    }

    /// Voids a COMMITTED sale and puts its stock back. ADMIN only.
    ///
    /// ## Returns
    /// * `Err(EngineError::PermissionDenied)` - Session is not ADMIN
    /// * `Err(EngineError::SaleNotFound)` - Unknown sale number
    /// * `Err(EngineError::Cart(InvalidSaleStatus))` - Sale is not COMMITTED
    pub async fn void_sale(&self, sale_number: &str) -> EngineResult<Sale> {
        let principal = self.session.require_admin().await?;
        debug!(sale_number = %sale_number, user_id = %principal.id, "Voiding sale");

        let stored = self
            .store
            .load_sale(sale_number)
            .await?
            .ok_or_else(|| EngineError::SaleNotFound(sale_number.to_string()))?;
        if !stored.is_committed() {
            return Err(EngineError::Cart(CoreError::InvalidSaleStatus {
                sale_number: stored.sale_number.clone(),
                current_status: stored.status.to_string(),
            }));
        }

        // Stock goes back and the status flips under one ledger lock; a
        // failure in either leaves the sale COMMITTED with its stock taken.
        let voiding = async {
            match self.store.void_sale(sale_number).await {
                Ok(sale) => Ok(sale),
                Err(StoreError::NotFound { .. }) => {
                    Err(EngineError::SaleNotFound(sale_number.to_string()))
                }
                Err(e) => Err(EngineError::PersistenceFailed(e)),
            }
        };
        let voided = self
            .ledger
            .release_with(Reservation::for_sale(&stored), voiding)
            .await?;

        info!(sale_number = %sale_number, user_id = %principal.id, "Sale voided");
        Ok(voided)
    }

    async fn give_back(&self, reservation: Reservation) {
        if let Err(e) = self.ledger.release(reservation).await {
            error!(error = %e, "Stock release after failed commit kept for retry");
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::tests::{fixture, Fixture};
    use crate::store::fixtures::principal;
    use crate::store::StoreOp;
    use std::time::Duration;
    use vendra_core::{DiscountRate, Role, SaleStatus};

    fn finalizer(f: &Fixture) -> Arc<SaleFinalizer> {
        Arc::new(SaleFinalizer::new(
            f.session.clone(),
            f.ledger.clone(),
            f.store.clone(),
            f.emitter.clone(),
        ))
    }

    #[tokio::test]
    async fn test_finalize_commits_and_clears() {
        let f = fixture().await;
        let finalizer = finalizer(&f);

        f.cart.add_product(1, 3).await.unwrap();
        f.cart.set_discount(1, DiscountRate::from_bps(1_000)).await.unwrap();
        let number = f.cart.snapshot().await.sale_number;

        let receipt = finalizer.finalize(&f.cart).await.unwrap();
        assert_eq!(receipt.sale_number(), number);
        assert_eq!(receipt.sale.status, SaleStatus::Committed);
        assert_eq!(receipt.sale.user_id, Some(1));
        assert_eq!(receipt.sale.total_amount_cents, 270_000);
        assert_eq!(receipt.final_amount_cents, 270_000);
        assert_eq!(receipt.total_items, 3);
        assert!(receipt.sale.id.is_some());

        let stored = f.store.sale(&number).await.unwrap();
        assert_eq!(stored.status, SaleStatus::Committed);
        assert_eq!(f.store.product(1).await.unwrap().quantity, 2);
        assert_eq!(f.ledger.quantity(1).await, Some(2));

        let next = f.cart.snapshot().await;
        assert!(next.lines.is_empty());
        assert_ne!(next.sale_number, number);
        assert_eq!(f.emitter.receipts(), vec![receipt]);
    }

    #[tokio::test]
    async fn test_empty_cart() {
        let f = fixture().await;
        assert!(matches!(
            finalizer(&f).finalize(&f.cart).await,
            Err(EngineError::EmptyCart)
        ));
    }

    #[tokio::test]
    async fn test_insufficient_stock_leaves_everything() {
        let f = fixture().await;
        let finalizer = finalizer(&f);

        f.cart.add_product(2, 4).await.unwrap();
        f.cart.add_product(1, 6).await.unwrap();
        let before = f.cart.snapshot().await;

        let err = finalizer.finalize(&f.cart).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientStock { product_id: 1, .. }));

        assert_eq!(f.cart.snapshot().await, before);
        assert_eq!(f.store.product(1).await.unwrap().quantity, 5);
        assert_eq!(f.store.product(2).await.unwrap().quantity, 10);
        assert_eq!(f.ledger.quantity(2).await, Some(10));
        assert_eq!(f.store.sale_count().await, 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_releases_stock() {
        let f = fixture().await;
        let finalizer = finalizer(&f);
        f.cart.add_product(2, 4).await.unwrap();
        let before = f.cart.snapshot().await;

        f.store.fail(StoreOp::SaveSale).await;
        let err = finalizer.finalize(&f.cart).await.unwrap_err();
        assert!(matches!(err, EngineError::PersistenceFailed(_)));
        assert!(err.is_retryable());

        assert_eq!(f.ledger.quantity(2).await, Some(10));
        assert_eq!(f.store.product(2).await.unwrap().quantity, 10);
        assert_eq!(f.cart.snapshot().await, before);

        // Retry once the store is back
        f.store.heal(StoreOp::SaveSale).await;
        let receipt = finalizer.finalize(&f.cart).await.unwrap();
        assert_eq!(receipt.sale_number(), before.sale_number);
        assert_eq!(f.ledger.quantity(2).await, Some(6));
    }

    #[tokio::test]
    async fn test_requires_session() {
        let f = fixture().await;
        f.cart.add_product(2, 1).await.unwrap();
        f.session.logout().await;

        assert!(matches!(
            finalizer(&f).finalize(&f.cart).await,
            Err(EngineError::NotAuthenticated)
        ));
        assert_eq!(f.ledger.quantity(2).await, Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_cannot_finalize() {
        let f = fixture().await;
        f.cart.add_product(2, 1).await.unwrap();

        tokio::time::advance(Duration::from_secs(30 * 60)).await;

        assert!(matches!(
            finalizer(&f).finalize(&f.cart).await,
            Err(EngineError::NotAuthenticated)
        ));
        assert_eq!(f.store.sale_count().await, 0);
        assert_eq!(f.ledger.quantity(2).await, Some(10));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_two_terminals_race_for_last_unit() {
        let f = fixture().await;
        let finalizer = finalizer(&f);
        f.ledger
            .restock(1, -4, crate::store::StockReason::Adjustment("count".into()))
            .await
            .unwrap();

        let other = f.second_cart();
        f.cart.add_product(1, 1).await.unwrap();
        other.add_product(1, 1).await.unwrap();

        let a = {
            let finalizer = finalizer.clone();
            let cart = f.cart.clone();
            tokio::spawn(async move { finalizer.finalize(&cart).await })
        };
        let b = {
            let finalizer = finalizer.clone();
            let cart = other.clone();
            tokio::spawn(async move { finalizer.finalize(&cart).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let committed = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(committed, 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(EngineError::InsufficientStock { product_id: 1, .. }))));

        assert_eq!(f.ledger.quantity(1).await, Some(0));
        assert_eq!(f.store.product(1).await.unwrap().quantity, 0);
        assert_eq!(f.store.sale_count().await, 1);
    }

    #[tokio::test]
    async fn test_void_sale() {
        let f = fixture().await;
        let finalizer = finalizer(&f);
        f.cart.add_product(2, 3).await.unwrap();
        let receipt = finalizer.finalize(&f.cart).await.unwrap();
        assert_eq!(f.ledger.quantity(2).await, Some(7));

        let voided = finalizer.void_sale(receipt.sale_number()).await.unwrap();
        assert_eq!(voided.status, SaleStatus::Void);
        assert_eq!(f.ledger.quantity(2).await, Some(10));
        assert_eq!(f.store.product(2).await.unwrap().quantity, 10);

        assert!(matches!(
            finalizer.void_sale(receipt.sale_number()).await,
            Err(EngineError::Cart(CoreError::InvalidSaleStatus { .. }))
        ));
        assert!(matches!(
            finalizer.void_sale("VNT-0-0").await,
            Err(EngineError::SaleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_void_with_store_failures_can_be_retried() {
        let f = fixture().await;
        let finalizer = finalizer(&f);
        f.cart.add_product(2, 3).await.unwrap();
        let receipt = finalizer.finalize(&f.cart).await.unwrap();
        let number = receipt.sale_number().to_string();

        f.store.fail(StoreOp::AdjustQuantity).await;
        let err = finalizer.void_sale(&number).await.unwrap_err();
        assert!(matches!(err, EngineError::PersistenceFailed(_)));
        assert_eq!(f.ledger.quantity(2).await, Some(7));
        assert_eq!(f.store.product(2).await.unwrap().quantity, 7);
        assert_eq!(f.store.sale(&number).await.unwrap().status, SaleStatus::Committed);
        f.store.heal(StoreOp::AdjustQuantity).await;

        // Stock written back, then the status change is refused
        f.store.fail(StoreOp::VoidSale).await;
        assert!(finalizer.void_sale(&number).await.is_err());
        assert_eq!(f.ledger.quantity(2).await, Some(7));
        assert_eq!(f.store.product(2).await.unwrap().quantity, 7);
        assert_eq!(f.store.sale(&number).await.unwrap().status, SaleStatus::Committed);
        f.store.heal(StoreOp::VoidSale).await;

        let voided = finalizer.void_sale(&number).await.unwrap();
        assert_eq!(voided.status, SaleStatus::Void);
        assert_eq!(f.ledger.quantity(2).await, Some(10));
        assert_eq!(f.store.product(2).await.unwrap().quantity, 10);
    }

    #[tokio::test]
    async fn test_void_requires_admin() {
        let f = fixture().await;
        let finalizer = finalizer(&f);
        f.cart.add_product(2, 1).await.unwrap();
        let receipt = finalizer.finalize(&f.cart).await.unwrap();

        f.session.start_session(principal(2, Role::Manager)).await;
        assert!(matches!(
            finalizer.void_sale(receipt.sale_number()).await,
            Err(EngineError::PermissionDenied { required: Role::Admin })
        ));
        assert_eq!(f.ledger.quantity(2).await, Some(9));
    }
}
