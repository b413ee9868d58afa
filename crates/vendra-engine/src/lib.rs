//! # vendra-engine: Runtime Services for Vendra POS
//!
//! Everything in the point of sale that has shared mutable state or runs in
//! the background: the authenticated session, the inactivity watchdog, the
//! stock ledger, the cart of the terminal and sale finalization.
//!
//! ## Lock Order
//! ```text
//! cart ──► session          (every cart operation checks the session)
//! cart ──► ledger           (finalize reserves stock while holding the cart)
//!
//! The watchdog takes the session, releases it, then takes the cart.
//! No component ever holds the session or the ledger while waiting for
//! the cart.
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - TOML configuration with environment overrides
//! - [`error`] - Engine, store and config errors
//! - [`store`] - Persistence port and its SQLite and in-memory adapters
//! - [`auth`] - Credential verification
//! - [`session`] - Session state machine
//! - [`watchdog`] - Background inactivity expiry
//! - [`ledger`] - Authoritative stock counts and reservations
//! - [`cart`] - The terminal's cart
//! - [`finalizer`] - Commit and void of sales
//! - [`events`] - Notifications for the presentation layer
//! - [`engine`] - Wires it all together
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vendra_engine::{EngineConfig, NoOpEmitter, PosEngine};
//!
//! let config = EngineConfig::load_or_default(None);
//! let engine = PosEngine::with_database(config, Arc::new(NoOpEmitter)).await?;
//!
//! engine.login("admin", "secret").await?;
//! engine.cart().add_product_by_code("P001", 2).await?;
//! let receipt = engine.finalize().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod auth;
pub mod cart;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod finalizer;
pub mod ledger;
pub mod session;
pub mod store;
pub mod watchdog;

// =============================================================================
// Re-exports
// =============================================================================

pub use auth::CredentialVerifier;
pub use cart::{CartHandle, SaleNumberGenerator};
pub use config::EngineConfig;
pub use engine::PosEngine;
pub use error::{AuthFailure, ConfigError, EngineError, EngineResult, StoreError, StoreResult};
pub use events::{LowStockAlert, NoOpEmitter, PosEvent, PosEventEmitter, RecordingEmitter};
pub use finalizer::{Receipt, SaleFinalizer};
pub use ledger::{Reservation, StockLedger};
pub use session::{SessionInfo, SessionManager, SessionStatus};
pub use store::{Credential, MemoryStore, PosStore, StockReason};
pub use watchdog::{SessionWatchdog, WatchdogHandle};
