//! # Pricing Engine
//!
//! Pure functions turning sale lines into monetary totals.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  line_subtotal  = round½↑( unit_price × qty × (10000 − bps) / 10000 )   │
//! │  sale_total     = Σ line_subtotal          (recomputed, never patched)  │
//! │  final_amount   = max(0, sale_total − discount + tax)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The subtotal is rounded exactly once, after the multiplication, using
//! 128-bit intermediates so no realistic price × quantity can overflow.

use crate::money::{div_round_half_up, DiscountRate, Money, BPS_SCALE};
use crate::types::SaleLine;

/// Subtotal of one line, rounded half-up to the cent.
///
/// ```rust
/// use vendra_core::money::{DiscountRate, Money};
/// use vendra_core::pricing::line_subtotal;
///
/// let subtotal = line_subtotal(Money::from_cents(100_000), 3, DiscountRate::from_bps(1000));
/// assert_eq!(subtotal.to_string(), "2,700.00");
/// ```
pub fn line_subtotal(unit_price: Money, quantity: i64, discount: DiscountRate) -> Money {
    let gross = unit_price.cents() as i128 * quantity as i128;
    let keep = (BPS_SCALE - discount.bps()) as i128;
    Money::from_wide(div_round_half_up(gross * keep, BPS_SCALE as i128))
}

/// What the line discount took off: `unit_price × qty − line_subtotal`.
pub fn line_discount_amount(unit_price: Money, quantity: i64, discount: DiscountRate) -> Money {
    unit_price.multiply_quantity(quantity) - line_subtotal(unit_price, quantity, discount)
}

/// Fresh sum of line subtotals.
pub fn sale_total(lines: &[SaleLine]) -> Money {
    lines.iter().map(SaleLine::subtotal).sum()
}

/// `max(0, total - discount + tax)`, computed without intermediate overflow.
pub fn final_amount(total: Money, discount: Money, tax: Money) -> Money {
    let wide = total.cents() as i128 - discount.cents() as i128 + tax.cents() as i128;
    Money::from_wide(wide.max(0))
}
