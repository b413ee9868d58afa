//! # Domain Types
//!
//! Core domain entities for Vendra POS.
//!
//! Monetary fields are stored as integer cents (`*_cents`) so the structs
//! map one-to-one onto database rows and JSON payloads; the `Money`
//! accessors are the way to do arithmetic with them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::{DiscountRate, Money, BPS_SCALE};
use crate::pricing;

// =============================================================================
// Product
// =============================================================================

/// A product available for sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Product {
    /// Surrogate identifier.
    pub id: i64,

    /// Stable business code, unique and never changed after creation.
    pub code: String,

    /// Display name shown to the cashier and on the receipt.
    pub name: String,

    pub description: Option<String>,

    /// Category reference (categories are managed outside the core).
    pub category_id: Option<i64>,

    /// What the shop paid per unit, in cents.
    pub purchase_price_cents: i64,

    /// Shelf price per unit, in cents.
    pub selling_price_cents: i64,

    /// Units on hand. Never negative.
    pub quantity: i64,

    /// At or below this quantity the product is "low stock".
    pub alert_threshold: i64,

    /// Soft delete flag.
    pub is_active: bool,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    #[inline]
    pub fn selling_price(&self) -> Money {
        Money::from_cents(self.selling_price_cents)
    }

    #[inline]
    pub fn purchase_price(&self) -> Money {
        Money::from_cents(self.purchase_price_cents)
    }

    /// `quantity <= alert_threshold`.
    #[inline]
    pub fn is_low_stock(&self) -> bool {
        self.quantity <= self.alert_threshold
    }

    /// Nothing on hand; blocks new cart additions.
    #[inline]
    pub fn is_out_of_stock(&self) -> bool {
        self.quantity <= 0
    }

    /// Out of stock wins over low stock.
    pub fn stock_status(&self) -> StockStatus {
        if self.is_out_of_stock() {
            StockStatus::OutOfStock
        } else if self.is_low_stock() {
            StockStatus::LowStock
        } else {
            StockStatus::InStock
        }
    }

    /// Selling price minus purchase price.
    ///
    /// A product without a purchase price is all margin.
    pub fn profit_margin(&self) -> Money {
        if self.purchase_price_cents == 0 {
            return self.selling_price();
        }
        self.selling_price() - self.purchase_price()
    }

    /// Margin relative to the purchase price, in basis points.
    ///
    /// ```rust
    /// # use vendra_core::Product;
    /// # use chrono::Utc;
    /// # let mut p = Product {
    /// #     id: 1, code: "P1".into(), name: "Soap".into(), description: None,
    /// #     category_id: None, purchase_price_cents: 0, selling_price_cents: 0,
    /// #     quantity: 0, alert_threshold: 0, is_active: true,
    /// #     created_at: Utc::now(), updated_at: Utc::now(),
    /// # };
    /// p.purchase_price_cents = 800;
    /// p.selling_price_cents = 1000;
    /// assert_eq!(p.profit_margin_bps(), 2500); // 25%
    /// ```
    pub fn profit_margin_bps(&self) -> i64 {
        if self.purchase_price_cents == 0 {
            return BPS_SCALE as i64;
        }
        let margin = self.profit_margin().cents() as i128;
        let bps = crate::money::div_round_half_up(
            margin * BPS_SCALE as i128,
            self.purchase_price_cents as i128,
        );
        bps as i64
    }
}

/// Inventory status of a product, derived from quantity and threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    InStock,
    LowStock,
    OutOfStock,
}

// =============================================================================
// Category
// =============================================================================

/// A product category. Reference data only; the core never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

// =============================================================================
// Sale Status
// =============================================================================

/// The status of a sale transaction.
///
/// ```text
/// PENDING ──commit──► COMMITTED
///    │                    │
///    └──────void──────────┴──► VOID
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum SaleStatus {
    /// Lines are still being edited.
    Pending,
    /// Paid, stock decremented, persisted.
    Committed,
    /// Cancelled.
    Void,
}

impl SaleStatus {
    pub fn code(&self) -> &'static str {
        match self {
            SaleStatus::Pending => "PENDING",
            SaleStatus::Committed => "COMMITTED",
            SaleStatus::Void => "VOID",
        }
    }
}

impl Default for SaleStatus {
    fn default() -> Self {
        SaleStatus::Pending
    }
}

impl fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for SaleStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(SaleStatus::Pending),
            "COMMITTED" => Ok(SaleStatus::Committed),
            "VOID" => Ok(SaleStatus::Void),
            other => Err(ValidationError::InvalidFormat {
                field: "sale status".to_string(),
                reason: format!("unknown status '{other}'"),
            }),
        }
    }
}

// =============================================================================
// Payment Method
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentMethod {
    Cash,
    Card,
    /// Mobile money.
    Mobile,
}

impl PaymentMethod {
    pub fn code(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::Card => "CARD",
            PaymentMethod::Mobile => "MOBILE",
        }
    }
}

impl Default for PaymentMethod {
    fn default() -> Self {
        PaymentMethod::Cash
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for PaymentMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CASH" => Ok(PaymentMethod::Cash),
            "CARD" => Ok(PaymentMethod::Card),
            "MOBILE" => Ok(PaymentMethod::Mobile),
            other => Err(ValidationError::InvalidFormat {
                field: "payment method".to_string(),
                reason: format!("unknown payment method '{other}'"),
            }),
        }
    }
}

// =============================================================================
// Role & Principal
// =============================================================================

/// Closed set of user roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// Full access, including voiding committed sales.
    Admin,
    /// Till and inventory access.
    Manager,
}

impl Role {
    pub fn code(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Manager => "MANAGER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "MANAGER" => Ok(Role::Manager),
            other => Err(ValidationError::InvalidFormat {
                field: "role".to_string(),
                reason: format!("unknown role '{other}'"),
            }),
        }
    }
}

/// The authenticated identity behind a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Principal {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub display_name: String,
}

impl Principal {
    #[inline]
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }

    #[inline]
    pub fn is_manager(&self) -> bool {
        matches!(self.role, Role::Manager)
    }
}

// =============================================================================
// Sale Line
// =============================================================================

/// A line of a sale.
///
/// Uses the snapshot pattern: code, name and unit price are frozen when the
/// line is created, so later catalogue edits never change a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleLine {
    pub product_id: i64,
    /// Code at time of sale (frozen).
    pub product_code: String,
    /// Name at time of sale (frozen).
    pub product_name: String,
    /// Unit price in cents at time of sale (frozen).
    pub unit_price_cents: i64,
    /// Always >= 1.
    pub quantity: i64,
    /// Line discount in basis points (0..=10000).
    pub discount_bps: u32,
    /// Derived: `line_subtotal(unit_price, quantity, discount)`.
    pub subtotal_cents: i64,
}

impl SaleLine {
    /// Snapshots a product into a new line with no discount.
    pub fn from_product(product: &Product, quantity: i64) -> Self {
        let mut line = SaleLine {
            product_id: product.id,
            product_code: product.code.clone(),
            product_name: product.name.clone(),
            unit_price_cents: product.selling_price_cents,
            quantity,
            discount_bps: 0,
            subtotal_cents: 0,
        };
        line.recalculate();
        line
    }

    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    #[inline]
    pub fn discount(&self) -> DiscountRate {
        DiscountRate::from_bps(self.discount_bps)
    }

    #[inline]
    pub fn subtotal(&self) -> Money {
        Money::from_cents(self.subtotal_cents)
    }

    /// Amount knocked off by the line discount.
    pub fn discount_amount(&self) -> Money {
        pricing::line_discount_amount(self.unit_price(), self.quantity, self.discount())
    }

    /// Recomputes the derived subtotal.
    pub fn recalculate(&mut self) {
        self.subtotal_cents =
            pricing::line_subtotal(self.unit_price(), self.quantity, self.discount()).cents();
    }
}

// =============================================================================
// Sale
// =============================================================================

/// A sale transaction, pending or persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Sale {
    /// Database id, assigned on save.
    pub id: Option<i64>,
    pub sale_number: String,
    /// Owning user, assigned at commit.
    pub user_id: Option<i64>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub lines: Vec<SaleLine>,
    /// Always `Σ line.subtotal_cents`.
    pub total_amount_cents: i64,
    /// Sale-level discount (on top of line discounts).
    pub discount_amount_cents: i64,
    pub tax_amount_cents: i64,
    pub payment_method: PaymentMethod,
    pub status: SaleStatus,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Sale {
    /// A fresh, empty PENDING sale.
    pub fn new(sale_number: impl Into<String>) -> Self {
        Sale {
            id: None,
            sale_number: sale_number.into(),
            user_id: None,
            customer_name: None,
            customer_phone: None,
            lines: Vec::new(),
            total_amount_cents: 0,
            discount_amount_cents: 0,
            tax_amount_cents: 0,
            payment_method: PaymentMethod::default(),
            status: SaleStatus::Pending,
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[inline]
    pub fn total_amount(&self) -> Money {
        Money::from_cents(self.total_amount_cents)
    }

    #[inline]
    pub fn discount_amount(&self) -> Money {
        Money::from_cents(self.discount_amount_cents)
    }

    #[inline]
    pub fn tax_amount(&self) -> Money {
        Money::from_cents(self.tax_amount_cents)
    }

    /// `max(0, total - discount + tax)`.
    pub fn final_amount(&self) -> Money {
        pricing::final_amount(self.total_amount(), self.discount_amount(), self.tax_amount())
    }

    /// Units across all lines.
    pub fn total_items(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Recomputes every line subtotal and the total from scratch.
    pub fn recalculate_total(&mut self) {
        for line in &mut self.lines {
            line.recalculate();
        }
        self.total_amount_cents = pricing::sale_total(&self.lines).cents();
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.status == SaleStatus::Pending
    }

    #[inline]
    pub fn is_committed(&self) -> bool {
        self.status == SaleStatus::Committed
    }

    /// PENDING → COMMITTED, recording the owner. Happens exactly once.
    pub fn mark_committed(&mut self, user_id: i64) -> CoreResult<()> {
        if self.status != SaleStatus::Pending {
            return Err(self.invalid_status());
        }
        self.user_id = Some(user_id);
        self.status = SaleStatus::Committed;
        Ok(())
    }

    /// PENDING or COMMITTED → VOID.
    pub fn mark_void(&mut self) -> CoreResult<()> {
        if self.status == SaleStatus::Void {
            return Err(self.invalid_status());
        }
        self.status = SaleStatus::Void;
        Ok(())
    }

    pub(crate) fn invalid_status(&self) -> CoreError {
        CoreError::InvalidSaleStatus {
            sale_number: self.sale_number.clone(),
            current_status: self.status.to_string(),
        }
    }
}

// =============================================================================
// Stock Movement
// =============================================================================

/// Direction of an inventory change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementType {
    /// Goods received.
    In,
    /// Goods sold.
    Out,
    /// Manual correction, either sign.
    Adjustment,
}

impl MovementType {
    pub fn code(&self) -> &'static str {
        match self {
            MovementType::In => "IN",
            MovementType::Out => "OUT",
            MovementType::Adjustment => "ADJUSTMENT",
        }
    }

    /// Movement type implied by a signed quantity delta.
    pub fn for_delta(delta: i64) -> Self {
        if delta < 0 {
            MovementType::Out
        } else {
            MovementType::In
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Audit record of a quantity change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockMovement {
    pub id: Option<i64>,
    pub product_id: i64,
    pub movement_type: MovementType,
    /// Unsigned for IN/OUT, signed for ADJUSTMENT.
    pub quantity: i64,
    pub reason: Option<String>,
    pub user_id: Option<i64>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================
