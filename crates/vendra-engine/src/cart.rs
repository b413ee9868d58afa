//! # Cart Handle
//!
//! Session-checked, shareable access to the terminal's [`Cart`].
//!
//! Every mutation follows the same shape:
//!
//! ```text
//! lock cart ──► session.touch() ──► mutate Cart ──► emit cart_changed
//!     │              │
//!     │              └── NotAuthenticated: nothing changes
//!     └── held until the emit, so a finalize in progress is never
//!         interleaved with an edit
//! ```

use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use vendra_core::{
    Cart, CartTotals, CoreError, CoreResult, DiscountRate, Money, PaymentMethod, Principal, Sale,
};

use crate::error::{EngineError, EngineResult};
use crate::events::PosEventEmitter;
use crate::ledger::StockLedger;
use crate::session::SessionManager;
use crate::store::PosStore;

// =============================================================================
// Sale Numbers
// =============================================================================

/// Issues `<prefix>-<unix millis>-<sequence>` sale numbers.
///
/// The sequence is per generator and strictly increasing, so two numbers
/// issued in the same millisecond still differ.
#[derive(Debug)]
pub struct SaleNumberGenerator {
    prefix: String,
    sequence: AtomicU64,
}

impl SaleNumberGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        SaleNumberGenerator {
            prefix: prefix.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn next_number(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}-{}", self.prefix, Utc::now().timestamp_millis(), seq)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

// =============================================================================
// Cart Handle
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum ProductKey<'a> {
    Code(&'a str),
    Id(i64),
}

impl fmt::Display for ProductKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductKey::Code(code) => f.write_str(code),
            ProductKey::Id(id) => write!(f, "#{id}"),
        }
    }
}

struct CartShared {
    cart: Mutex<Cart>,
    session: Arc<SessionManager>,
    store: Arc<dyn PosStore>,
    ledger: Arc<StockLedger>,
    numbers: Arc<SaleNumberGenerator>,
    emitter: Arc<dyn PosEventEmitter>,
    max_lines: usize,
    default_payment_method: PaymentMethod,
}

/// Cloneable handle to one cart. Clones share the same cart.
#[derive(Clone)]
pub struct CartHandle {
    inner: Arc<CartShared>,
}

/// Wiring for [`CartHandle::new`].
pub struct CartDeps {
    pub session: Arc<SessionManager>,
    pub store: Arc<dyn PosStore>,
    pub ledger: Arc<StockLedger>,
    pub numbers: Arc<SaleNumberGenerator>,
    pub emitter: Arc<dyn PosEventEmitter>,
}

impl CartHandle {
    pub fn new(deps: CartDeps, max_lines: usize, default_payment_method: PaymentMethod) -> Self {
        let mut cart = Cart::new(deps.numbers.next_number());
        // A fresh sale is always PENDING
        let _ = cart.set_payment_method(default_payment_method);

        CartHandle {
            inner: Arc::new(CartShared {
                cart: Mutex::new(cart),
                session: deps.session,
                store: deps.store,
                ledger: deps.ledger,
                numbers: deps.numbers,
                emitter: deps.emitter,
                max_lines,
                default_payment_method,
            }),
        }
    }

    // =========================================================================
    // Lines
    // =========================================================================

    /// Adds `quantity` units of the product with business code `code`.
    ///
    /// ## Returns
    /// * `Err(EngineError::ProductNotFound)` - Unknown code
    /// * `Err(EngineError::OutOfStock)` - Ledger holds no units
    /// * `Err(EngineError::Cart(_))` - Quantity or line limits
    pub async fn add_product_by_code(&self, code: &str, quantity: i64) -> EngineResult<CartTotals> {
        self.add(ProductKey::Code(code.trim()), quantity).await
    }

    /// Adds `quantity` units of the product with id `product_id`.
    pub async fn add_product(&self, product_id: i64, quantity: i64) -> EngineResult<CartTotals> {
        self.add(ProductKey::Id(product_id), quantity).await
    }

    /// Sets a line's quantity; zero removes the line.
    pub async fn set_quantity(&self, product_id: i64, quantity: i64) -> EngineResult<CartTotals> {
        self.mutate(|cart| cart.set_line_quantity(product_id, quantity))
            .await
    }

    pub async fn set_discount(&self, product_id: i64, discount: DiscountRate) -> EngineResult<CartTotals> {
        self.mutate(|cart| cart.set_line_discount(product_id, discount))
            .await
    }

    pub async fn remove(&self, product_id: i64) -> EngineResult<CartTotals> {
        self.mutate(|cart| cart.remove_line(product_id)).await
    }

    // =========================================================================
    // Sale Fields
    // =========================================================================

    pub async fn set_payment_method(&self, method: PaymentMethod) -> EngineResult<CartTotals> {
        self.mutate(|cart| cart.set_payment_method(method)).await
    }

    pub async fn set_customer(
        &self,
        name: Option<String>,
        phone: Option<String>,
    ) -> EngineResult<CartTotals> {
        self.mutate(|cart| cart.set_customer(name, phone)).await
    }

    /// Sale-level discount on top of line discounts.
    pub async fn set_sale_discount(&self, amount: Money) -> EngineResult<CartTotals> {
        self.mutate(|cart| cart.set_discount_amount(amount)).await
    }

    pub async fn set_tax(&self, amount: Money) -> EngineResult<CartTotals> {
        self.mutate(|cart| cart.set_tax_amount(amount)).await
    }

    pub async fn set_notes(&self, notes: Option<String>) -> EngineResult<CartTotals> {
        self.mutate(|cart| cart.set_notes(notes)).await
    }

    /// Cancels the current sale and starts a fresh one. Returns the
    /// abandoned sale, marked VOID; it is never persisted.
    pub async fn new_sale(&self) -> EngineResult<Sale> {
        let mut cart = self.inner.cart.lock().await;
        self.inner.session.touch().await?;

        let abandoned = self.replace_sale(&mut cart)?;
        info!(sale_number = %abandoned.sale_number, lines = abandoned.lines.len(), "Sale cancelled");
        self.inner.emitter.cart_changed(&cart.totals());
        Ok(abandoned)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn totals(&self) -> CartTotals {
        self.inner.cart.lock().await.totals()
    }

    /// Copy of the current sale.
    pub async fn snapshot(&self) -> Sale {
        self.inner.cart.lock().await.to_sale()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.cart.lock().await.is_empty()
    }

    // =========================================================================
    // Engine Internals
    // =========================================================================

    /// Exclusive access to the cart for the whole of a finalize.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Cart> {
        self.inner.cart.lock().await
    }

    /// Starts a fresh sale after a commit and announces it.
    pub(crate) fn restart_after_commit(&self, cart: &mut Cart) {
        cart.clear(self.inner.numbers.next_number());
        self.inner.emitter.cart_changed(&cart.totals());
    }

    /// Drops a PENDING sale without a session check. Used when the
    /// session ends. Waits for any finalize holding the cart.
    pub(crate) async fn discard_pending(&self, why: &str) -> Option<Sale> {
        let mut cart = self.inner.cart.lock().await;
        self.discard_locked(&mut cart, why)
    }

    /// Drops the PENDING sale of a session that just expired, unless a new
    /// session became Active before the cart lock was taken. That session
    /// owns the cart now.
    pub(crate) async fn discard_after_expiry(&self, expired: &Principal) -> Option<Sale> {
        let mut cart = self.inner.cart.lock().await;
        if let Some(current) = self.inner.session.current().await {
            debug!(
                expired_user = %expired.id,
                user_id = %current.id,
                "New session already active, keeping cart"
            );
            return None;
        }
        self.discard_locked(&mut cart, "session expired")
    }

    fn discard_locked(&self, cart: &mut Cart, why: &str) -> Option<Sale> {
        if cart.is_empty() {
            return None;
        }

        let abandoned = match self.replace_sale(cart) {
            Ok(sale) => sale,
            Err(e) => {
                warn!(error = %e, reason = why, "Cart could not be discarded");
                return None;
            }
        };
        info!(
            sale_number = %abandoned.sale_number,
            lines = abandoned.lines.len(),
            reason = why,
            "Pending sale discarded"
        );
        self.inner.emitter.cart_changed(&cart.totals());
        Some(abandoned)
    }

    fn replace_sale(&self, cart: &mut Cart) -> CoreResult<Sale> {
        let abandoned = cart.discard(self.inner.numbers.next_number())?;
        cart.set_payment_method(self.inner.default_payment_method)?;
        Ok(abandoned)
    }

    async fn add(&self, key: ProductKey<'_>, quantity: i64) -> EngineResult<CartTotals> {
        let mut cart = self.inner.cart.lock().await;
        self.inner.session.touch().await?;
        debug!(product = %key, quantity, "Adding product to cart");

        let loaded = match key {
            ProductKey::Code(code) => self.inner.store.load_product_by_code(code).await?,
            ProductKey::Id(id) => self.inner.store.load_product_by_id(id).await?,
        };
        let mut product = loaded.ok_or_else(|| EngineError::ProductNotFound(key.to_string()))?;

        // The ledger's count is authoritative for availability
        product.quantity = self.inner.ledger.track(&product).await;

        let is_new_line = cart.line(product.id).is_none();
        if is_new_line && cart.line_count() >= self.inner.max_lines {
            return Err(CoreError::CartTooLarge {
                max: self.inner.max_lines,
            }
            .into());
        }

        cart.add_line(&product, quantity)?;

        let totals = cart.totals();
        self.inner.emitter.cart_changed(&totals);
        Ok(totals)
    }

    async fn mutate<F>(&self, change: F) -> EngineResult<CartTotals>
    where
        F: FnOnce(&mut Cart) -> Result<(), CoreError>,
    {
        let mut cart = self.inner.cart.lock().await;
        self.inner.session.touch().await?;

        change(&mut cart)?;

        let totals = cart.totals();
        self.inner.emitter.cart_changed(&totals);
        Ok(totals)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
