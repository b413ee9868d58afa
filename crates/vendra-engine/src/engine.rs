//! # POS Engine
//!
//! The context object of one terminal. Owns every shared component and the
//! watchdog task, and is the only thing a presentation layer needs to hold.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           PosEngine                              │
//! │                                                                  │
//! │   login ──► CredentialVerifier ──► SessionManager ◄── Watchdog   │
//! │                                          │                       │
//! │   cart() ──► CartHandle ─────────────────┤                       │
//! │                 │                        │                       │
//! │   finalize ──► SaleFinalizer ──► StockLedger ──► PosStore        │
//! │                                                                  │
//! │   PosEventEmitter ◄── cart_changed, session_expired,             │
//! │                       sale_committed, low_stock                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use vendra_core::{validation, CoreError, Principal, Sale};
use vendra_db::Database;

use crate::auth::CredentialVerifier;
use crate::cart::{CartDeps, CartHandle, SaleNumberGenerator};
use crate::config::EngineConfig;
use crate::error::{EngineResult, StoreError};
use crate::events::{LowStockAlert, PosEventEmitter};
use crate::finalizer::{Receipt, SaleFinalizer};
use crate::ledger::StockLedger;
use crate::session::{SessionInfo, SessionManager, SessionStatus};
use crate::store::{PosStore, StockReason};
use crate::watchdog::{SessionWatchdog, WatchdogHandle};

/// One running point of sale.
pub struct PosEngine {
    config: EngineConfig,
    verifier: CredentialVerifier,
    session: Arc<SessionManager>,
    ledger: Arc<StockLedger>,
    cart: CartHandle,
    finalizer: SaleFinalizer,
    watchdog: Mutex<Option<WatchdogHandle>>,
}

impl PosEngine {
    /// Wires the components over `store` and starts the watchdog.
    ///
    /// The stock ledger is hydrated from every active product before the
    /// engine accepts work.
    pub async fn start(
        config: EngineConfig,
        store: Arc<dyn PosStore>,
        emitter: Arc<dyn PosEventEmitter>,
    ) -> EngineResult<Self> {
        config.validate()?;

        let session = Arc::new(SessionManager::new(config.session.inactivity_timeout()));
        let ledger = Arc::new(StockLedger::new(store.clone(), emitter.clone()));
        let tracked = ledger.hydrate(&store.load_active_products().await?).await;

        let cart = CartHandle::new(
            CartDeps {
                session: session.clone(),
                store: store.clone(),
                ledger: ledger.clone(),
                numbers: Arc::new(SaleNumberGenerator::new(
                    config.sales.sale_number_prefix.clone(),
                )),
                emitter: emitter.clone(),
            },
            config.sales.max_cart_lines,
            config.sales.default_payment_method,
        );

        let verifier = CredentialVerifier::new(store.clone())?;
        let finalizer =
            SaleFinalizer::new(session.clone(), ledger.clone(), store, emitter.clone());

        let watchdog = SessionWatchdog::spawn(
            session.clone(),
            cart.clone(),
            emitter,
            config.session.watchdog_period(),
        );

        info!(
            products = tracked,
            timeout_secs = config.session.inactivity_timeout_secs,
            "POS engine started"
        );

        Ok(PosEngine {
            config,
            verifier,
            session,
            ledger,
            cart,
            finalizer,
            watchdog: Mutex::new(Some(watchdog)),
        })
    }

    /// Opens the configured SQLite database and starts over it.
    pub async fn with_database(
        config: EngineConfig,
        emitter: Arc<dyn PosEventEmitter>,
    ) -> EngineResult<Self> {
        let db = Database::new(config.database.db_config())
            .await
            .map_err(StoreError::from)?;
        Self::start(config, Arc::new(db), emitter).await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Authenticates and starts a new session.
    ///
    /// A PENDING sale left by the previous session is discarded first.
    /// A failed login leaves the current session untouched.
    pub async fn login(&self, username: &str, secret: &str) -> EngineResult<SessionInfo> {
        let principal = self.verifier.verify(username, secret).await?;

        self.cart.discard_pending("new login").await;
        let info = self.session.start_session(principal).await;

        if let Some(watchdog) = self.watchdog.lock().await.as_ref() {
            watchdog.rearm();
        }
        Ok(info)
    }

    /// Ends the session and drops its PENDING sale.
    pub async fn logout(&self) -> Option<Principal> {
        self.cart.discard_pending("logout").await;
        self.session.logout().await
    }

    pub async fn session_info(&self) -> Option<SessionInfo> {
        self.session.info().await
    }

    pub async fn session_status(&self) -> SessionStatus {
        self.session.status().await
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    // =========================================================================
    // Sales
    // =========================================================================

    /// The terminal's cart.
    pub fn cart(&self) -> &CartHandle {
        &self.cart
    }

    pub async fn finalize(&self) -> EngineResult<Receipt> {
        self.finalizer.finalize(&self.cart).await
    }

    pub async fn void_sale(&self, sale_number: &str) -> EngineResult<Sale> {
        self.finalizer.void_sale(sale_number).await
    }

    // =========================================================================
    // Stock
    // =========================================================================

    /// Books goods received. Returns the new quantity on hand.
    pub async fn receive_stock(&self, product_id: i64, quantity: i64) -> EngineResult<i64> {
        let principal = self.session.touch().await?;
        validation::validate_quantity(quantity).map_err(CoreError::from)?;

        debug!(product_id = %product_id, quantity, user_id = %principal.id, "Receiving stock");
        self.ledger
            .restock(product_id, quantity, StockReason::Restock)
            .await
    }

    /// Corrects a product's quantity by `delta` after a count. ADMIN only.
    pub async fn adjust_stock(&self, product_id: i64, delta: i64, note: &str) -> EngineResult<i64> {
        let principal = self.session.require_admin().await?;
        warn!(product_id = %product_id, delta, user_id = %principal.id, "Manual stock adjustment");

        self.ledger
            .restock(product_id, delta, StockReason::Adjustment(note.to_string()))
            .await
    }

    pub async fn stock_of(&self, product_id: i64) -> Option<i64> {
        self.ledger.quantity(product_id).await
    }

    /// Tracked products at or below their alert threshold.
    pub async fn low_stock(&self) -> Vec<LowStockAlert> {
        self.ledger.low_stock().await
    }

    /// Writes stock releases the store refused earlier. Returns how many
    /// are still waiting.
    pub async fn retry_stock_releases(&self) -> usize {
        self.ledger.retry_releases().await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stops the watchdog. The engine keeps serving requests, but idle
    /// sessions are then only expired by their next operation.
    pub async fn shutdown(&self) -> EngineResult<()> {
        let Some(watchdog) = self.watchdog.lock().await.take() else {
            return Ok(());
        };
        watchdog.shutdown().await?;
        info!("POS engine stopped");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthFailure, EngineError, INVALID_CREDENTIALS};
    use crate::events::RecordingEmitter;
    use crate::store::fixtures::product;
    use crate::store::{MemoryStore, StoreOp};
    use vendra_core::{DiscountRate, Role, SaleStatus};
    use vendra_db::{DbConfig, NewProduct, NewUser};

    async fn memory_engine() -> (PosEngine, Arc<MemoryStore>, Arc<RecordingEmitter>) {
        let store = Arc::new(MemoryStore::new());
        store.insert_product(product(1, "P-RICE", 100_000, 5)).await;
        store.insert_product(product(2, "P-OIL", 2_500, 10)).await;
        store
            .add_user("ana", "counter-secret", "Ana Silva", Role::Admin)
            .await
            .unwrap();
        store
            .add_user("rui", "shift-secret", "Rui Costa", Role::Manager)
            .await
            .unwrap();

        let emitter = Arc::new(RecordingEmitter::new());
        let engine = PosEngine::start(EngineConfig::default(), store.clone(), emitter.clone())
            .await
            .unwrap();
        (engine, store, emitter)
    }

    #[tokio::test]
    async fn test_start_hydrates_ledger() {
        let (engine, _store, _emitter) = memory_engine().await;

        assert_eq!(engine.stock_of(1).await, Some(5));
        assert_eq!(engine.stock_of(2).await, Some(10));
        assert_eq!(engine.session_status().await, SessionStatus::Anonymous);

        // Fixture products alert at 2 units
        assert!(engine.low_stock().await.is_empty());
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_logins_look_the_same() {
        let (engine, _store, _emitter) = memory_engine().await;

        let wrong = engine.login("ana", "nope").await.unwrap_err();
        let unknown = engine.login("nobody", "nope").await.unwrap_err();

        assert!(matches!(wrong, EngineError::Auth(AuthFailure::BadSecret)));
        assert!(matches!(unknown, EngineError::Auth(AuthFailure::NotFound)));
        assert_eq!(wrong.user_message(), INVALID_CREDENTIALS);
        assert_eq!(wrong.to_string(), unknown.to_string());
        assert_eq!(engine.session_status().await, SessionStatus::Anonymous);
    }

    #[tokio::test]
    async fn test_sell_and_void() {
        let (engine, store, emitter) = memory_engine().await;

        let info = engine.login("  ana ", "counter-secret").await.unwrap();
        assert_eq!(info.principal.role, Role::Admin);

        engine.cart().add_product_by_code("P-RICE", 3).await.unwrap();
        engine
            .cart()
            .set_discount(1, DiscountRate::from_percentage(10.0))
            .await
            .unwrap();

        let receipt = engine.finalize().await.unwrap();
        assert_eq!(receipt.cashier, "Ana Silva");
        assert_eq!(receipt.sale.final_amount().to_string(), "2,700.00");
        assert_eq!(store.product(1).await.unwrap().quantity, 2);

        // 2 units left hits the alert threshold
        let alerts = emitter.low_stock_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].code, "P-RICE");
        assert_eq!(engine.low_stock().await.len(), 1);

        let voided = engine.void_sale(receipt.sale_number()).await.unwrap();
        assert_eq!(voided.status, SaleStatus::Void);
        assert_eq!(engine.stock_of(1).await, Some(5));

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stock_taken_by_failed_commit_comes_back() {
        let (engine, store, _emitter) = memory_engine().await;
        engine.login("ana", "counter-secret").await.unwrap();
        engine.cart().add_product_by_code("P-OIL", 4).await.unwrap();

        // Reservation is mirrored, then the sale write and the release both fail
        store.fail(StoreOp::SaveSale).await;
        store.fail_once_after(StoreOp::AdjustQuantity, 1).await;
        assert!(matches!(
            engine.finalize().await,
            Err(EngineError::PersistenceFailed(_))
        ));
        assert_eq!(engine.stock_of(2).await, Some(6));
        assert_eq!(store.product(2).await.unwrap().quantity, 6);
        assert_eq!(engine.cart().totals().await.total_quantity, 4);

        store.heal(StoreOp::SaveSale).await;
        assert_eq!(engine.retry_stock_releases().await, 0);
        assert_eq!(engine.stock_of(2).await, Some(10));
        assert_eq!(store.product(2).await.unwrap().quantity, 10);

        engine.finalize().await.unwrap();
        assert_eq!(store.product(2).await.unwrap().quantity, 6);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_login_discards_previous_cart() {
        let (engine, _store, _emitter) = memory_engine().await;

        engine.login("ana", "counter-secret").await.unwrap();
        engine.cart().add_product(2, 2).await.unwrap();

        let info = engine.login("rui", "shift-secret").await.unwrap();
        assert_eq!(info.principal.username, "rui");
        assert!(engine.cart().is_empty().await);
        assert!(matches!(
            engine.void_sale("VNT-1-1").await,
            Err(EngineError::PermissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_logout() {
        let (engine, store, _emitter) = memory_engine().await;

        engine.login("rui", "shift-secret").await.unwrap();
        engine.cart().add_product(2, 2).await.unwrap();

        assert_eq!(engine.logout().await.unwrap().username, "rui");
        assert!(engine.cart().is_empty().await);
        assert!(matches!(
            engine.cart().add_product(2, 1).await,
            Err(EngineError::NotAuthenticated)
        ));
        assert!(engine.finalize().await.unwrap_err().requires_login());
        assert_eq!(store.sale_count().await, 0);
        assert_eq!(engine.stock_of(2).await, Some(10));
    }

    #[tokio::test]
    async fn test_stock_receipts_and_adjustments() {
        let (engine, _store, _emitter) = memory_engine().await;
        assert!(matches!(
            engine.receive_stock(2, 5).await,
            Err(EngineError::NotAuthenticated)
        ));

        engine.login("rui", "shift-secret").await.unwrap();
        assert_eq!(engine.receive_stock(2, 5).await.unwrap(), 15);
        assert!(matches!(
            engine.receive_stock(2, 0).await,
            Err(EngineError::Cart(CoreError::Validation(_)))
        ));
        assert!(matches!(
            engine.adjust_stock(2, -1, "broken").await,
            Err(EngineError::PermissionDenied { .. })
        ));

        engine.login("ana", "counter-secret").await.unwrap();
        assert_eq!(engine.adjust_stock(2, -3, "broken").await.unwrap(), 12);
        assert!(matches!(
            engine.adjust_stock(2, -20, "count").await,
            Err(EngineError::InsufficientStock { available: 12, .. })
        ));
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.session.watchdog_period_secs = 0;

        let result = PosEngine::start(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingEmitter::new()),
        )
        .await;
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_end_to_end_on_sqlite() {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let flour = db
            .products()
            .insert(&NewProduct::new("P-FLOUR", "Flour 1kg", 1_250, 20))
            .await
            .unwrap();
        db.users()
            .insert_user(&NewUser::new("ana", "counter-secret", "Ana Silva", Role::Admin))
            .await
            .unwrap();

        let emitter = Arc::new(RecordingEmitter::new());
        let engine = PosEngine::start(EngineConfig::default(), db.clone(), emitter.clone())
            .await
            .unwrap();

        engine.login("ana", "counter-secret").await.unwrap();
        engine.cart().add_product_by_code("P-FLOUR", 12).await.unwrap();
        let receipt = engine.finalize().await.unwrap();
        assert_eq!(receipt.final_amount_cents, 15_000);

        let stored = db
            .sales()
            .get_by_number(receipt.sale_number())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, SaleStatus::Committed);
        assert_eq!(stored.lines.len(), 1);
        assert_eq!(db.products().get_by_id(flour.id).await.unwrap().unwrap().quantity, 8);

        // Default threshold is 10
        assert_eq!(emitter.low_stock_alerts().len(), 1);

        engine.void_sale(receipt.sale_number()).await.unwrap();
        assert_eq!(db.products().get_by_id(flour.id).await.unwrap().unwrap().quantity, 20);

        engine.shutdown().await.unwrap();
        engine.shutdown().await.unwrap();
    }
}
