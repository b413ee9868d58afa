//! # Persistence Port
//!
//! Everything the engine needs from durable storage, behind one object-safe
//! async trait so the runtime services never see SQL.
//!
//! ```text
//! ┌──────────────────┐        ┌───────────────────────────┐
//! │  vendra-engine   │        │        PosStore           │
//! │                  │        │                           │
//! │  auth ───────────┼──────► │  load_credential          │
//! │                  │        │  record_last_login        │
//! │  cart ───────────┼──────► │  load_product_by_code/id  │
//! │  ledger ─────────┼──────► │  adjust_product_quantity  │
//! │  finalizer ──────┼──────► │  save_sale / void_sale    │
//! └──────────────────┘        └─────────────┬─────────────┘
//!                                           │
//!                       ┌───────────────────┴──────────────────┐
//!                       ▼                                      ▼
//!              vendra_db::Database                      MemoryStore
//!              (SQLite, production)             (in-process, failure injection)
//! ```
//!
//! No adapter retries internally; a failed call is reported once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use vendra_core::{MovementType, Principal, Product, Role, Sale, SaleStatus, StockMovement};
use vendra_db::{CredentialRecord, Database};

use crate::error::{EngineResult, StoreError, StoreResult};

// =============================================================================
// Port Types
// =============================================================================

/// Stored login data of one active account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub user_id: i64,
    pub username: String,
    /// argon2 PHC string.
    pub password_hash: String,
    pub display_name: String,
    pub role: Role,
}

impl Credential {
    pub fn to_principal(&self) -> Principal {
        Principal {
            id: self.user_id,
            username: self.username.clone(),
            role: self.role,
            display_name: self.display_name.clone(),
        }
    }
}

impl From<CredentialRecord> for Credential {
    fn from(record: CredentialRecord) -> Self {
        Credential {
            user_id: record.id,
            username: record.username,
            password_hash: record.password_hash,
            display_name: record.full_name,
            role: record.role,
        }
    }
}

/// Why a product quantity changed. Becomes the audit row of the change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockReason {
    /// Units taken by a sale being committed.
    Sale(String),
    /// Units given back by a voided or failed sale.
    SaleReleased(String),
    /// Goods received.
    Restock,
    /// Manual correction with a note.
    Adjustment(String),
}

impl StockReason {
    pub fn movement_type(&self) -> MovementType {
        match self {
            StockReason::Sale(_) => MovementType::Out,
            StockReason::SaleReleased(_) | StockReason::Restock => MovementType::In,
            StockReason::Adjustment(_) => MovementType::Adjustment,
        }
    }

    pub fn note(&self) -> String {
        match self {
            StockReason::Sale(number) => format!("sale {number}"),
            StockReason::SaleReleased(number) => format!("release {number}"),
            StockReason::Restock => "restock".to_string(),
            StockReason::Adjustment(note) => note.clone(),
        }
    }
}

// =============================================================================
// Port
// =============================================================================

/// Durable storage consumed by the engine.
#[async_trait]
pub trait PosStore: Send + Sync {
    async fn load_product_by_code(&self, code: &str) -> StoreResult<Option<Product>>;

    async fn load_product_by_id(&self, id: i64) -> StoreResult<Option<Product>>;

    /// Every sellable product, used to hydrate the stock ledger.
    async fn load_active_products(&self) -> StoreResult<Vec<Product>>;

    /// Credential of an active account. Inactive and unknown accounts both
    /// yield `None`.
    async fn load_credential(&self, username: &str) -> StoreResult<Option<Credential>>;

    /// Best effort; callers log failures and move on.
    async fn record_last_login(&self, user_id: i64) -> StoreResult<()>;

    /// Writes header and lines together or not at all. Returns the new id.
    async fn save_sale(&self, sale: &Sale) -> StoreResult<i64>;

    async fn load_sale(&self, sale_number: &str) -> StoreResult<Option<Sale>>;

    /// COMMITTED → VOID, returning the updated sale.
    async fn void_sale(&self, sale_number: &str) -> StoreResult<Sale>;

    /// Durable mirror of a ledger change. Returns the stored quantity after
    /// the change; refuses to go below zero.
    async fn adjust_product_quantity(
        &self,
        product_id: i64,
        delta: i64,
        reason: &StockReason,
    ) -> StoreResult<i64>;
}

// =============================================================================
// SQLite Adapter
// =============================================================================

#[async_trait]
impl PosStore for Database {
    async fn load_product_by_code(&self, code: &str) -> StoreResult<Option<Product>> {
        Ok(self.products().get_by_code(code).await?)
    }

    async fn load_product_by_id(&self, id: i64) -> StoreResult<Option<Product>> {
        Ok(self.products().get_by_id(id).await?)
    }

    async fn load_active_products(&self) -> StoreResult<Vec<Product>> {
        Ok(self.products().list_active().await?)
    }

    async fn load_credential(&self, username: &str) -> StoreResult<Option<Credential>> {
        let record = self.users().get_credential(username).await?;
        Ok(record.map(Credential::from))
    }

    async fn record_last_login(&self, user_id: i64) -> StoreResult<()> {
        Ok(self.users().record_last_login(user_id).await?)
    }

    async fn save_sale(&self, sale: &Sale) -> StoreResult<i64> {
        Ok(self.sales().insert_sale(sale).await?)
    }

    async fn load_sale(&self, sale_number: &str) -> StoreResult<Option<Sale>> {
        Ok(self.sales().get_by_number(sale_number).await?)
    }

    async fn void_sale(&self, sale_number: &str) -> StoreResult<Sale> {
        Ok(self.sales().void_sale(sale_number).await?)
    }

    async fn adjust_product_quantity(
        &self,
        product_id: i64,
        delta: i64,
        reason: &StockReason,
    ) -> StoreResult<i64> {
        let note = reason.note();
        Ok(self
            .products()
            .adjust_quantity(product_id, delta, reason.movement_type(), Some(&note))
            .await?)
    }
}

// =============================================================================
// In-Memory Adapter
// =============================================================================

/// Store operation that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    LoadProduct,
    LoadCredential,
    RecordLastLogin,
    SaveSale,
    VoidSale,
    AdjustQuantity,
}

#[derive(Debug, Clone, Copy)]
enum FailureMode {
    Always,
    /// Let this many calls through, fail the next one, then recover.
    OnceAfter(usize),
}

#[derive(Debug, Default)]
struct MemoryState {
    products: BTreeMap<i64, Product>,
    users: HashMap<String, (Credential, bool)>,
    last_logins: HashMap<i64, DateTime<Utc>>,
    sales: BTreeMap<String, Sale>,
    movements: Vec<StockMovement>,
    next_user_id: i64,
    next_sale_id: i64,
    failures: HashMap<StoreOp, FailureMode>,
    gates: HashMap<StoreOp, Arc<Notify>>,
}

impl MemoryState {
    fn check(&mut self, op: StoreOp) -> StoreResult<()> {
        let exhausted = match self.failures.get_mut(&op) {
            None => return Ok(()),
            Some(FailureMode::Always) => false,
            Some(FailureMode::OnceAfter(remaining)) => {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Ok(());
                }
                true
            }
        };
        if exhausted {
            self.failures.remove(&op);
        }
        Err(StoreError::Unavailable(format!("injected {op:?} failure")))
    }
}

/// Process-local store. Same contract as the SQLite adapter, plus failure
/// injection per operation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_product(&self, product: Product) {
        let mut state = self.state.lock().await;
        state.products.insert(product.id, product);
    }

    /// Creates an active account with a freshly hashed secret.
    pub async fn add_user(
        &self,
        username: &str,
        secret: &str,
        display_name: &str,
        role: Role,
    ) -> EngineResult<i64> {
        let password_hash = crate::auth::hash_secret(secret)?;

        let mut state = self.state.lock().await;
        state.next_user_id += 1;
        let user_id = state.next_user_id;
        let credential = Credential {
            user_id,
            username: username.to_string(),
            password_hash,
            display_name: display_name.to_string(),
            role,
        };
        state.users.insert(username.to_string(), (credential, true));
        Ok(user_id)
    }

    pub async fn set_user_active(&self, username: &str, active: bool) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.users.get_mut(username) {
            entry.1 = active;
        }
    }

    /// Current stored copy of a product.
    pub async fn product(&self, id: i64) -> Option<Product> {
        self.state.lock().await.products.get(&id).cloned()
    }

    pub async fn sale(&self, sale_number: &str) -> Option<Sale> {
        self.state.lock().await.sales.get(sale_number).cloned()
    }

    pub async fn sale_count(&self) -> usize {
        self.state.lock().await.sales.len()
    }

    pub async fn last_login(&self, user_id: i64) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_logins.get(&user_id).copied()
    }

    pub async fn movements(&self, product_id: i64) -> Vec<StockMovement> {
        self.state
            .lock()
            .await
            .movements
            .iter()
            .filter(|m| m.product_id == product_id)
            .cloned()
            .collect()
    }

    /// Makes every later call of `op` fail with `StoreError::Unavailable`.
    pub async fn fail(&self, op: StoreOp) {
        self.state.lock().await.failures.insert(op, FailureMode::Always);
    }

    /// Lets `successes` calls of `op` through and fails the one after.
    pub async fn fail_once_after(&self, op: StoreOp, successes: usize) {
        self.state
            .lock()
            .await
            .failures
            .insert(op, FailureMode::OnceAfter(successes));
    }

    pub async fn heal(&self, op: StoreOp) {
        self.state.lock().await.failures.remove(&op);
    }

    /// Makes the next sale save, sale void or quantity change named by `op`
    /// wait until the returned gate is notified. Only the first call waits.
    pub async fn hold(&self, op: StoreOp) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().await.gates.insert(op, gate.clone());
        gate
    }

    async fn pass_gate(&self, op: StoreOp) {
        let gate = self.state.lock().await.gates.remove(&op);
        if let Some(gate) = gate {
            debug!(?op, "Store call held at gate");
            gate.notified().await;
        }
    }
}

#[async_trait]
impl PosStore for MemoryStore {
    async fn load_product_by_code(&self, code: &str) -> StoreResult<Option<Product>> {
        let mut state = self.state.lock().await;
        state.check(StoreOp::LoadProduct)?;
        let code = code.trim();
        Ok(state.products.values().find(|p| p.code == code).cloned())
    }

    async fn load_product_by_id(&self, id: i64) -> StoreResult<Option<Product>> {
        let mut state = self.state.lock().await;
        state.check(StoreOp::LoadProduct)?;
        Ok(state.products.get(&id).cloned())
    }

    async fn load_active_products(&self) -> StoreResult<Vec<Product>> {
        let mut state = self.state.lock().await;
        state.check(StoreOp::LoadProduct)?;
        Ok(state
            .products
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect())
    }

    async fn load_credential(&self, username: &str) -> StoreResult<Option<Credential>> {
        let mut state = self.state.lock().await;
        state.check(StoreOp::LoadCredential)?;
        Ok(state
            .users
            .get(username.trim())
            .filter(|(_, active)| *active)
            .map(|(credential, _)| credential.clone()))
    }

    async fn record_last_login(&self, user_id: i64) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.check(StoreOp::RecordLastLogin)?;
        if !state.users.values().any(|(c, _)| c.user_id == user_id) {
            return Err(StoreError::not_found("User", user_id));
        }
        state.last_logins.insert(user_id, Utc::now());
        Ok(())
    }

    async fn save_sale(&self, sale: &Sale) -> StoreResult<i64> {
        self.pass_gate(StoreOp::SaveSale).await;
        let mut state = self.state.lock().await;
        state.check(StoreOp::SaveSale)?;

        if state.sales.contains_key(&sale.sale_number) {
            return Err(StoreError::Rejected(format!(
                "duplicate sale number {}",
                sale.sale_number
            )));
        }
        if let Some(line) = sale
            .lines
            .iter()
            .find(|l| !state.products.contains_key(&l.product_id))
        {
            return Err(StoreError::Rejected(format!(
                "unknown product {}",
                line.product_id
            )));
        }

        state.next_sale_id += 1;
        let id = state.next_sale_id;
        let mut stored = sale.clone();
        stored.id = Some(id);
        state.sales.insert(stored.sale_number.clone(), stored);

        debug!(sale_number = %sale.sale_number, sale_id = %id, "Sale stored in memory");
        Ok(id)
    }

    async fn load_sale(&self, sale_number: &str) -> StoreResult<Option<Sale>> {
        Ok(self.state.lock().await.sales.get(sale_number).cloned())
    }

    async fn void_sale(&self, sale_number: &str) -> StoreResult<Sale> {
        self.pass_gate(StoreOp::VoidSale).await;
        let mut state = self.state.lock().await;
        state.check(StoreOp::VoidSale)?;

        let sale = state
            .sales
            .get_mut(sale_number)
            .ok_or_else(|| StoreError::not_found("Sale", sale_number))?;
        if sale.status != SaleStatus::Committed {
            return Err(StoreError::Rejected(format!(
                "sale {sale_number} is {}",
                sale.status
            )));
        }
        sale.status = SaleStatus::Void;
        Ok(sale.clone())
    }

    async fn adjust_product_quantity(
        &self,
        product_id: i64,
        delta: i64,
        reason: &StockReason,
    ) -> StoreResult<i64> {
        self.pass_gate(StoreOp::AdjustQuantity).await;
        let mut state = self.state.lock().await;
        state.check(StoreOp::AdjustQuantity)?;

        let product = state
            .products
            .get_mut(&product_id)
            .ok_or_else(|| StoreError::not_found("Product", product_id))?;

        let updated = product.quantity + delta;
        if updated < 0 {
            return Err(StoreError::Rejected(format!(
                "product {product_id} quantity {} cannot change by {delta}",
                product.quantity
            )));
        }
        product.quantity = updated;
        product.updated_at = Utc::now();

        let movement_type = reason.movement_type();
        let recorded = match movement_type {
            MovementType::Adjustment => delta,
            MovementType::In | MovementType::Out => delta.abs(),
        };
        state.movements.push(StockMovement {
            id: None,
            product_id,
            movement_type,
            quantity: recorded,
            reason: Some(reason.note()),
            user_id: None,
            created_at: Utc::now(),
        });

        Ok(updated)
    }
}

// =============================================================================
// Test Fixtures
// =============================================================================

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Active product with a threshold of 2.
    pub fn product(id: i64, code: &str, price_cents: i64, quantity: i64) -> Product {
        let now = Utc::now();
        Product {
            id,
            code: code.to_string(),
            name: format!("Product {code}"),
            description: None,
            category_id: None,
            purchase_price_cents: price_cents / 2,
            selling_price_cents: price_cents,
            quantity,
            alert_threshold: 2,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn principal(id: i64, role: Role) -> Principal {
        Principal {
            id,
            username: format!("user{id}"),
            role,
            display_name: format!("User {id}"),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
