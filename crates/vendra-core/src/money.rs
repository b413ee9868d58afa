//! # Money Module
//!
//! Provides the `Money` type for monetary values and `DiscountRate` for
//! percentage discounts.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In floating point:                                                     │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  Prices in the shop have exactly two decimal places, so every amount   │
//! │  is stored as an integer count of hundredths (cents).                   │
//! │    1000.00 → 100000 cents                                               │
//! │    10% of 1000.00 × 3 → (300000 × 9000 + 5000) / 10000 = 270000        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use vendra_core::money::{DiscountRate, Money};
//!
//! let price = Money::from_cents(1099); // 10.99
//! let line = price * 3;                // 32.97
//! let discounted = line.apply_discount(DiscountRate::from_bps(1000));
//! assert_eq!(discounted.cents(), 2967);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

/// Basis points in 100%.
pub const BPS_SCALE: u32 = 10_000;

/// Divides rounding half away from zero.
///
/// Every rounding step in the pricing engine goes through here so that
/// there is exactly one rounding rule in the crate.
pub(crate) fn div_round_half_up(numerator: i128, denominator: i128) -> i128 {
    let half = denominator / 2;
    if numerator >= 0 {
        (numerator + half) / denominator
    } else {
        (numerator - half) / denominator
    }
}

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in hundredths of the shop currency.
///
/// ## Design Decisions
/// - **i64 (signed)**: intermediate results such as `total - discount` may
///   go negative before being clamped
/// - **Single field tuple struct**: zero-cost abstraction over i64
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    ///
    /// ```rust
    /// use vendra_core::money::Money;
    ///
    /// let price = Money::from_cents(1099);
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from major and minor units.
    ///
    /// For negative amounts only the major unit carries the sign:
    /// `from_major_minor(-5, 50)` is -5.50.
    ///
    /// ```rust
    /// use vendra_core::money::Money;
    ///
    /// assert_eq!(Money::from_major_minor(10, 99).cents(), 1099);
    /// assert_eq!(Money::from_major_minor(-5, 50).cents(), -550);
    /// ```
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion.
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn minor(&self) -> i64 {
        (self.0 % 100).abs()
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the value, or zero if it is negative.
    ///
    /// ```rust
    /// use vendra_core::money::Money;
    ///
    /// assert_eq!(Money::from_cents(-1).clamp_non_negative(), Money::zero());
    /// assert_eq!(Money::from_cents(42).clamp_non_negative().cents(), 42);
    /// ```
    #[inline]
    pub const fn clamp_non_negative(self) -> Self {
        if self.0 < 0 {
            Money(0)
        } else {
            self
        }
    }

    /// Multiplies money by a quantity.
    ///
    /// ```rust
    /// use vendra_core::money::Money;
    ///
    /// let line_total = Money::from_cents(299).multiply_quantity(3);
    /// assert_eq!(line_total.cents(), 897);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0.saturating_mul(qty))
    }

    /// Adds, returning `None` on overflow.
    #[inline]
    pub const fn checked_add(&self, other: Money) -> Option<Money> {
        match self.0.checked_add(other.0) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }

    /// Subtracts, returning `None` on overflow.
    #[inline]
    pub const fn checked_sub(&self, other: Money) -> Option<Money> {
        match self.0.checked_sub(other.0) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }

    /// Narrows a 128-bit intermediate, saturating at the i64 bounds.
    pub(crate) fn from_wide(cents: i128) -> Money {
        Money(cents.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }

    /// Applies a percentage discount and returns the discounted amount.
    ///
    /// The result is rounded half-up exactly once:
    /// `round((cents × (10000 − bps)) / 10000)`.
    ///
    /// ```rust
    /// use vendra_core::money::{DiscountRate, Money};
    ///
    /// let gross = Money::from_cents(10_000);
    /// assert_eq!(gross.apply_discount(DiscountRate::from_bps(1000)).cents(), 9_000);
    /// ```
    pub fn apply_discount(&self, rate: DiscountRate) -> Money {
        let keep = (BPS_SCALE - rate.bps()) as i128;
        Money::from_wide(div_round_half_up(self.0 as i128 * keep, BPS_SCALE as i128))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let digits = self.major().unsigned_abs().to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }
        write!(f, "{}{}.{:02}", sign, grouped, self.minor())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

// Operators saturate at the i64 bounds instead of wrapping or panicking.

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0.saturating_add(other.0))
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0.saturating_sub(other.0))
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        *self = *self - other;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        self.multiply_quantity(qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + *m)
    }
}

// =============================================================================
// Discount Rate
// =============================================================================

/// Percentage discount in basis points (1 bp = 0.01%).
///
/// The shop stores discounts with two decimals (`DECIMAL(5,2)`), which is
/// exactly basis-point precision: 12.5% = 1250 bps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DiscountRate(u32);

impl DiscountRate {
    /// Creates a rate from basis points, capped at 100%.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        if bps > BPS_SCALE {
            DiscountRate(BPS_SCALE)
        } else {
            DiscountRate(bps)
        }
    }

    /// Creates a rate from a percentage (display convenience only).
    pub fn from_percentage(pct: f64) -> Self {
        let bps = (pct * 100.0).round();
        if bps <= 0.0 {
            DiscountRate(0)
        } else {
            DiscountRate::from_bps(bps as u32)
        }
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    #[inline]
    pub const fn none() -> Self {
        DiscountRate(0)
    }

    #[inline]
    pub const fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl Default for DiscountRate {
    fn default() -> Self {
        DiscountRate::none()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents() {
        let money = Money::from_cents(1099);
        assert_eq!(money.cents(), 1099);
        assert_eq!(money.major(), 10);
        assert_eq!(money.minor(), 99);
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(1099).to_string(), "10.99");
        assert_eq!(Money::from_cents(270_000).to_string(), "2,700.00");
        assert_eq!(Money::from_cents(123_456_789).to_string(), "1,234,567.89");
        assert_eq!(Money::from_cents(99_999).to_string(), "999.99");
        assert_eq!(Money::from_cents(-550).to_string(), "-5.50");
        assert_eq!(Money::zero().to_string(), "0.00");
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(500);

        assert_eq!((a + b).cents(), 1500);
        assert_eq!((a - b).cents(), 500);
        assert_eq!((a * 3).cents(), 3000);

        let total: Money = [a, b, b].iter().sum();
        assert_eq!(total.cents(), 2000);
    }

    #[test]
    fn test_arithmetic_saturates() {
        let max = Money::from_cents(i64::MAX);
        let min = Money::from_cents(i64::MIN);

        assert_eq!(max + Money::from_cents(1), max);
        assert_eq!(min - Money::from_cents(1), min);
        assert_eq!(max * 2, max);
        assert_eq!(max.checked_add(Money::from_cents(1)), None);
        assert_eq!(min.checked_sub(Money::from_cents(1)), None);
        assert_eq!(
            Money::from_cents(5).checked_sub(Money::from_cents(7)),
            Some(Money::from_cents(-2))
        );

        let mut acc = max;
        acc += Money::from_cents(10);
        assert_eq!(acc, max);
    }

    #[test]
    fn test_discount_rounds_half_up_once() {
        // 0.05 × (1 - 50%) = 0.025 → 0.03
        assert_eq!(
            Money::from_cents(5).apply_discount(DiscountRate::from_bps(5000)).cents(),
            3
        );
        // 3.33 × (1 - 12.5%) = 2.91375 → 2.91
        assert_eq!(
            Money::from_cents(333).apply_discount(DiscountRate::from_bps(1250)).cents(),
            291
        );
    }

    #[test]
    fn test_full_and_zero_discount() {
        let gross = Money::from_cents(12_345);
        assert_eq!(gross.apply_discount(DiscountRate::none()), gross);
        assert_eq!(gross.apply_discount(DiscountRate::from_bps(10_000)), Money::zero());
    }

    #[test]
    fn test_discount_rate_is_capped() {
        assert_eq!(DiscountRate::from_bps(25_000).bps(), 10_000);
        assert_eq!(DiscountRate::from_percentage(12.5).bps(), 1250);
        assert_eq!(DiscountRate::from_percentage(-3.0).bps(), 0);
    }

    #[test]
    fn test_clamp_non_negative() {
        assert!(Money::from_cents(-100).clamp_non_negative().is_zero());
        assert!(Money::from_cents(100).clamp_non_negative().is_positive());
    }

    #[test]
    fn test_round_half_up_negative_is_symmetric() {
        assert_eq!(div_round_half_up(-5, 10), -1);
        assert_eq!(div_round_half_up(5, 10), 1);
        assert_eq!(div_round_half_up(4, 10), 0);
    }
}
