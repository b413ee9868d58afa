//! # Repository Module
//!
//! Database repository implementations for Vendra POS.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  PosStore adapter (vendra-engine)                                      │
//! │       │                                                                 │
//! │       │  db.products().adjust_quantity(id, -3, Out, ..)                │
//! │       ▼                                                                 │
//! │  ProductRepository / SaleRepository / UserRepository                   │
//! │       │                                                                 │
//! │       │  SQL                                                            │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  All SQL lives in this module.                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`](product::ProductRepository) - Products, categories, stock movements
//! - [`SaleRepository`](sale::SaleRepository) - Sale headers and lines
//! - [`UserRepository`](user::UserRepository) - Accounts and credentials

pub mod product;
pub mod sale;
pub mod user;
