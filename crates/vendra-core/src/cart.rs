//! # Sale Cart
//!
//! The in-progress sale aggregate.
//!
//! ## Cart Operations Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Cart Operations                                      │
//! │                                                                         │
//! │  Cashier Action           Cart Method               Effect              │
//! │  ──────────────           ───────────               ──────              │
//! │                                                                         │
//! │  Scan product ───────────► add_line() ────────────► merge or push       │
//! │                                                                         │
//! │  Change quantity ────────► set_line_quantity() ───► qty = n (0 removes) │
//! │                                                                         │
//! │  Click remove ───────────► remove_line() ─────────► lines.remove(i)     │
//! │                                                                         │
//! │  Line discount ──────────► set_line_discount() ───► bps = n             │
//! │                                                                         │
//! │  New sale ───────────────► clear() ───────────────► fresh sale number   │
//! │                                                                         │
//! │  Every mutation ends in recalculate(): total = Σ line.subtotal          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Invariants
//! - Lines are unique by `product_id` (adding the same product merges)
//! - Every line quantity is in `1..=MAX_LINE_QUANTITY`
//! - At most `MAX_CART_LINES` lines
//! - Only a PENDING sale can be mutated

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::{DiscountRate, Money};
use crate::types::{PaymentMethod, Product, Sale, SaleLine};
use crate::validation;
use crate::{MAX_CART_LINES, MAX_LINE_QUANTITY};

/// The shopping cart: a PENDING [`Sale`] plus the rules for editing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    sale: Sale,
}

impl Cart {
    /// Creates an empty cart for a new sale number.
    pub fn new(sale_number: impl Into<String>) -> Self {
        Cart {
            sale: Sale::new(sale_number),
        }
    }

    /// The underlying sale (read only).
    #[inline]
    pub fn sale(&self) -> &Sale {
        &self.sale
    }

    #[inline]
    pub fn sale_number(&self) -> &str {
        &self.sale.sale_number
    }

    #[inline]
    pub fn lines(&self) -> &[SaleLine] {
        &self.sale.lines
    }

    pub fn line(&self, product_id: i64) -> Option<&SaleLine> {
        self.sale.lines.iter().find(|l| l.product_id == product_id)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sale.lines.is_empty()
    }

    #[inline]
    pub fn line_count(&self) -> usize {
        self.sale.lines.len()
    }

    /// Adds a product or increases the quantity of its existing line.
    ///
    /// ## Errors
    /// - `ProductInactive` if the product was soft-deleted
    /// - `OutOfStock` if the product has nothing on hand
    /// - `QuantityTooLarge` if the merged quantity would exceed the limit
    /// - `CartTooLarge` if a new line would exceed the line limit
    ///
    /// The unit price is frozen from the first addition; merging only adds
    /// quantity.
    pub fn add_line(&mut self, product: &Product, quantity: i64) -> CoreResult<()> {
        self.ensure_pending()?;
        validation::validate_quantity(quantity)?;

        if !product.is_active {
            return Err(CoreError::ProductInactive {
                code: product.code.clone(),
            });
        }
        if product.is_out_of_stock() {
            return Err(CoreError::OutOfStock {
                code: product.code.clone(),
            });
        }

        if let Some(line) = self
            .sale
            .lines
            .iter_mut()
            .find(|l| l.product_id == product.id)
        {
            let merged = line.quantity + quantity;
            if merged > MAX_LINE_QUANTITY {
                return Err(CoreError::QuantityTooLarge {
                    requested: merged,
                    max: MAX_LINE_QUANTITY,
                });
            }
            line.quantity = merged;
        } else {
            if self.sale.lines.len() >= MAX_CART_LINES {
                return Err(CoreError::CartTooLarge {
                    max: MAX_CART_LINES,
                });
            }
            self.sale.lines.push(SaleLine::from_product(product, quantity));
        }

        self.recalculate();
        Ok(())
    }

    /// Sets a line quantity. Zero removes the line.
    pub fn set_line_quantity(&mut self, product_id: i64, quantity: i64) -> CoreResult<()> {
        self.ensure_pending()?;

        if quantity == 0 {
            return self.remove_line(product_id);
        }
        if quantity > MAX_LINE_QUANTITY {
            return Err(CoreError::QuantityTooLarge {
                requested: quantity,
                max: MAX_LINE_QUANTITY,
            });
        }
        validation::validate_quantity(quantity)?;

        let line = self.line_mut(product_id)?;
        line.quantity = quantity;
        self.recalculate();
        Ok(())
    }

    pub fn remove_line(&mut self, product_id: i64) -> CoreResult<()> {
        self.ensure_pending()?;

        let before = self.sale.lines.len();
        self.sale.lines.retain(|l| l.product_id != product_id);
        if self.sale.lines.len() == before {
            return Err(CoreError::LineNotFound { product_id });
        }

        self.recalculate();
        Ok(())
    }

    /// Sets the percentage discount of one line.
    pub fn set_line_discount(&mut self, product_id: i64, discount: DiscountRate) -> CoreResult<()> {
        self.ensure_pending()?;
        validation::validate_discount_bps(discount.bps())?;

        let line = self.line_mut(product_id)?;
        line.discount_bps = discount.bps();
        self.recalculate();
        Ok(())
    }

    /// Sets the sale-level discount amount.
    pub fn set_discount_amount(&mut self, amount: Money) -> CoreResult<()> {
        self.ensure_pending()?;
        validation::validate_amount_cents("discount amount", amount.cents())?;
        self.sale.discount_amount_cents = amount.cents();
        self.recalculate();
        Ok(())
    }

    /// Sets the tax amount. The core applies no tax rules of its own.
    pub fn set_tax_amount(&mut self, amount: Money) -> CoreResult<()> {
        self.ensure_pending()?;
        validation::validate_amount_cents("tax amount", amount.cents())?;
        self.sale.tax_amount_cents = amount.cents();
        self.recalculate();
        Ok(())
    }

    pub fn set_payment_method(&mut self, method: PaymentMethod) -> CoreResult<()> {
        self.ensure_pending()?;
        self.sale.payment_method = method;
        Ok(())
    }

    /// Attaches optional customer details. Blank strings count as absent.
    pub fn set_customer(&mut self, name: Option<String>, phone: Option<String>) -> CoreResult<()> {
        self.ensure_pending()?;

        let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        let phone = phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
        if let Some(phone) = &phone {
            validation::validate_customer_phone(phone)?;
        }

        self.sale.customer_name = name;
        self.sale.customer_phone = phone;
        Ok(())
    }

    pub fn set_notes(&mut self, notes: Option<String>) -> CoreResult<()> {
        self.ensure_pending()?;
        self.sale.notes = notes.filter(|n| !n.trim().is_empty());
        Ok(())
    }

    /// Recomputes every line subtotal and the sale total.
    pub fn recalculate(&mut self) {
        self.sale.recalculate_total();
    }

    /// Summary for display and change notifications.
    pub fn totals(&self) -> CartTotals {
        CartTotals {
            sale_number: self.sale.sale_number.clone(),
            line_count: self.sale.lines.len(),
            total_quantity: self.sale.total_items(),
            total_amount_cents: self.sale.total_amount_cents,
            discount_amount_cents: self.sale.discount_amount_cents,
            tax_amount_cents: self.sale.tax_amount_cents,
            final_amount_cents: self.sale.final_amount().cents(),
        }
    }

    /// Snapshot of the sale for commit or display.
    pub fn to_sale(&self) -> Sale {
        self.sale.clone()
    }

    /// Discards every line and starts a fresh sale under a new number.
    pub fn clear(&mut self, sale_number: impl Into<String>) {
        let payment_method = self.sale.payment_method;
        self.sale = Sale::new(sale_number);
        self.sale.payment_method = payment_method;
    }

    /// Abandons the current sale: returns it marked VOID and starts a fresh
    /// one under `next_sale_number`. The payment method carries over.
    pub fn discard(&mut self, next_sale_number: impl Into<String>) -> CoreResult<Sale> {
        self.ensure_pending()?;

        let mut abandoned = self.sale.clone();
        abandoned.mark_void()?;
        self.clear(next_sale_number);
        Ok(abandoned)
    }

    fn line_mut(&mut self, product_id: i64) -> CoreResult<&mut SaleLine> {
        self.sale
            .lines
            .iter_mut()
            .find(|l| l.product_id == product_id)
            .ok_or(CoreError::LineNotFound { product_id })
    }

    fn ensure_pending(&self) -> CoreResult<()> {
        if self.sale.is_pending() {
            Ok(())
        } else {
            Err(self.sale.invalid_status())
        }
    }
}

/// Cart totals summary sent to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartTotals {
    pub sale_number: String,
    pub line_count: usize,
    pub total_quantity: i64,
    pub total_amount_cents: i64,
    pub discount_amount_cents: i64,
    pub tax_amount_cents: i64,
    pub final_amount_cents: i64,
}

impl CartTotals {
    #[inline]
    pub fn final_amount(&self) -> Money {
        Money::from_cents(self.final_amount_cents)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SaleStatus;
    use crate::MAX_AMOUNT_CENTS;
    use chrono::Utc;

    fn product(id: i64, price: i64, quantity: i64) -> Product {
        Product {
            id,
            code: format!("P-{id}"),
            name: format!("Product {id}"),
            description: None,
            category_id: None,
            purchase_price_cents: price / 2,
            selling_price_cents: price,
            quantity,
            alert_threshold: 2,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn assert_total_matches(cart: &Cart) {
        let sum: i64 = cart.lines().iter().map(|l| l.subtotal_cents).sum();
        assert_eq!(cart.sale().total_amount_cents, sum);
    }

    #[test]
    fn test_add_same_product_merges() {
        let mut cart = Cart::new("VNT-1-1");
        let p = product(1, 500, 10);

        cart.add_line(&p, 1).unwrap();
        cart.add_line(&p, 1).unwrap();

        assert_eq!(cart.line_count(), 1);
        assert_eq!(cart.lines()[0].quantity, 2);
        assert_eq!(cart.sale().total_amount_cents, 1000);
    }

    #[test]
    fn test_out_of_stock_blocks_add() {
        let mut cart = Cart::new("VNT-1-1");
        let err = cart.add_line(&product(1, 500, 0), 1).unwrap_err();
        assert!(matches!(err, CoreError::OutOfStock { .. }));
        assert!(cart.is_empty());
    }

    #[test]
    fn test_inactive_product_rejected() {
        let mut cart = Cart::new("VNT-1-1");
        let mut p = product(1, 500, 5);
        p.is_active = false;
        assert!(matches!(
            cart.add_line(&p, 1),
            Err(CoreError::ProductInactive { .. })
        ));
    }

    #[test]
    fn test_reference_sale() {
        let mut cart = Cart::new("VNT-1-1");
        cart.add_line(&product(1, 100_000, 10), 3).unwrap();
        cart.set_line_discount(1, DiscountRate::from_bps(1000)).unwrap();

        let totals = cart.totals();
        assert_eq!(cart.lines()[0].subtotal_cents, 270_000);
        assert_eq!(totals.total_amount_cents, 270_000);
        assert_eq!(totals.final_amount_cents, 270_000);
    }

    #[test]
    fn test_total_tracks_every_mutation() {
        let mut cart = Cart::new("VNT-1-1");
        let a = product(1, 333, 50);
        let b = product(2, 1999, 50);
        let c = product(3, 5, 50);

        cart.add_line(&a, 3).unwrap();
        assert_total_matches(&cart);
        cart.add_line(&b, 2).unwrap();
        assert_total_matches(&cart);
        cart.set_line_discount(1, DiscountRate::from_bps(1250)).unwrap();
        assert_total_matches(&cart);
        cart.add_line(&c, 7).unwrap();
        assert_total_matches(&cart);
        cart.set_line_quantity(2, 5).unwrap();
        assert_total_matches(&cart);
        cart.remove_line(3).unwrap();
        assert_total_matches(&cart);
        cart.set_line_quantity(1, 0).unwrap();
        assert_total_matches(&cart);

        assert_eq!(cart.line_count(), 1);
        assert_eq!(cart.sale().total_amount_cents, 1999 * 5);
    }

    #[test]
    fn test_set_quantity_bounds() {
        let mut cart = Cart::new("VNT-1-1");
        cart.add_line(&product(1, 100, 10), 1).unwrap();

        assert!(matches!(
            cart.set_line_quantity(1, 1000),
            Err(CoreError::QuantityTooLarge { .. })
        ));
        assert!(matches!(
            cart.set_line_quantity(1, -1),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            cart.set_line_quantity(99, 2),
            Err(CoreError::LineNotFound { product_id: 99 })
        ));
    }

    #[test]
    fn test_merge_respects_line_limit() {
        let mut cart = Cart::new("VNT-1-1");
        let p = product(1, 100, 5);
        cart.add_line(&p, MAX_LINE_QUANTITY).unwrap();
        assert!(matches!(
            cart.add_line(&p, 1),
            Err(CoreError::QuantityTooLarge { .. })
        ));
        assert_eq!(cart.lines()[0].quantity, MAX_LINE_QUANTITY);
    }

    #[test]
    fn test_cart_line_limit() {
        let mut cart = Cart::new("VNT-1-1");
        for id in 0..MAX_CART_LINES as i64 {
            cart.add_line(&product(id, 100, 5), 1).unwrap();
        }
        assert!(matches!(
            cart.add_line(&product(10_000, 100, 5), 1),
            Err(CoreError::CartTooLarge { .. })
        ));
    }

    #[test]
    fn test_sale_level_amounts() {
        let mut cart = Cart::new("VNT-1-1");
        cart.add_line(&product(1, 10_000, 5), 1).unwrap();
        cart.set_discount_amount(Money::from_cents(1_500)).unwrap();
        cart.set_tax_amount(Money::from_cents(500)).unwrap();
        assert_eq!(cart.totals().final_amount_cents, 9_000);

        assert!(cart.set_tax_amount(Money::from_cents(-1)).is_err());
        cart.set_discount_amount(Money::from_cents(50_000)).unwrap();
        assert_eq!(cart.totals().final_amount(), Money::zero());
    }

    #[test]
    fn test_oversized_amounts_are_rejected() {
        let mut cart = Cart::new("VNT-1-1");
        cart.add_line(&product(1, 2_500, 5), 1).unwrap();

        assert!(matches!(
            cart.set_tax_amount(Money::from_cents(i64::MAX)),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            cart.set_discount_amount(Money::from_cents(MAX_AMOUNT_CENTS + 1)),
            Err(CoreError::Validation(_))
        ));

        // Rejected values never reach the sale
        let totals = cart.totals();
        assert_eq!(totals.tax_amount_cents, 0);
        assert_eq!(totals.final_amount_cents, 2_500);

        cart.set_tax_amount(Money::from_cents(MAX_AMOUNT_CENTS)).unwrap();
        assert_eq!(cart.totals().final_amount_cents, MAX_AMOUNT_CENTS + 2_500);
    }

    #[test]
    fn test_customer_details() {
        let mut cart = Cart::new("VNT-1-1");
        cart.set_customer(Some("  Awa ".to_string()), Some("".to_string()))
            .unwrap();
        assert_eq!(cart.sale().customer_name.as_deref(), Some("Awa"));
        assert_eq!(cart.sale().customer_phone, None);

        assert!(cart
            .set_customer(None, Some("call me".to_string()))
            .is_err());
    }

    #[test]
    fn test_clear_assigns_new_number() {
        let mut cart = Cart::new("VNT-1-1");
        cart.add_line(&product(1, 100, 5), 2).unwrap();
        cart.set_payment_method(PaymentMethod::Mobile).unwrap();

        cart.clear("VNT-1-2");

        assert!(cart.is_empty());
        assert_eq!(cart.sale_number(), "VNT-1-2");
        assert_eq!(cart.sale().total_amount_cents, 0);
        assert_eq!(cart.sale().payment_method, PaymentMethod::Mobile);
    }

    #[test]
    fn test_discard_returns_void_sale() {
        let mut cart = Cart::new("VNT-1-1");
        cart.add_line(&product(1, 100, 5), 2).unwrap();

        let old = cart.discard("VNT-1-2").unwrap();

        assert_eq!(old.status, SaleStatus::Void);
        assert_eq!(old.lines.len(), 1);
        assert!(cart.is_empty());
        assert_eq!(cart.sale_number(), "VNT-1-2");
    }
}
