//! # vendra-core: Pure Business Logic for Vendra POS
//!
//! This crate holds the arithmetic and the aggregates of the point of sale:
//! money, the pricing engine, the sale cart and the domain types shared by
//! the storage and runtime crates. Nothing in here touches a database, a
//! lock or a clock other than `chrono::Utc::now()` for record timestamps.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Vendra POS Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Presentation (external)                         │   │
//! │  │    Login ──► Cart view ──► Payment ──► Receipt                 │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ in-process calls                       │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    vendra-engine                                │   │
//! │  │    SessionManager, StockLedger, CartHandle, SaleFinalizer       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ vendra-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │   cart    │  │ validation│  │   │
//! │  │   │  Product  │  │   Money   │  │   Cart    │  │   rules   │  │   │
//! │  │   │   Sale    │  │ Discount  │  │ SaleLine  │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                        ┌───────────┐                            │   │
//! │  │                        │  pricing  │                            │   │
//! │  │                        └───────────┘                            │   │
//! │  │   NO I/O • NO DATABASE • NO LOCKS • PURE FUNCTIONS              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, Sale, SaleLine, Principal, etc.)
//! - [`money`] - Money and DiscountRate with integer arithmetic
//! - [`pricing`] - Line subtotal, sale total and final amount
//! - [`cart`] - The in-progress sale aggregate
//! - [`error`] - Domain error types
//! - [`validation`] - Business rule validation
//!
//! ## Example Usage
//!
//! ```rust
//! use vendra_core::money::{DiscountRate, Money};
//! use vendra_core::pricing::line_subtotal;
//!
//! // 1000.00 × 3 with 10% off
//! let subtotal = line_subtotal(Money::from_cents(100_000), 3, DiscountRate::from_bps(1000));
//! assert_eq!(subtotal.cents(), 270_000);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cart;
pub mod error;
pub mod money;
pub mod pricing;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use cart::{Cart, CartTotals};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::{DiscountRate, Money};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum number of distinct lines in a single cart.
pub const MAX_CART_LINES: usize = 100;

/// Maximum quantity of a single line.
///
/// Guards against typing 1000 instead of 10 at the till.
pub const MAX_LINE_QUANTITY: i64 = 999;

/// Largest accepted price or sale-level amount, in cents (1 billion).
///
/// Keeps every cart total far inside i64 even at the line and quantity
/// limits.
pub const MAX_AMOUNT_CENTS: i64 = 100_000_000_000;

/// Default alert threshold for new products (matches the shop schema default).
pub const DEFAULT_ALERT_THRESHOLD: i64 = 10;
