//! # Engine Error Types
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Identity     │  │     Stock       │  │      Persistence        │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Auth           │  │  OutOfStock     │  │  PersistenceFailed      │ │
//! │  │  NotAuthenticated│ │  Insufficient   │  │   └─ StoreError         │ │
//! │  │  PermissionDenied│ │  ProductNotFound│  │  SaleNotFound           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │      Cart       │  │  Configuration  │  │       Internal          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  EmptyCart      │  │  Config         │  │  Hashing                │ │
//! │  │  Cart(CoreError)│  │   └─ ConfigError│  │  Internal               │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Authentication failures keep their cause for logs but render the same
//! text for both causes, so callers cannot tell an unknown user from a
//! wrong secret.

use thiserror::Error;
use vendra_core::{CoreError, Role};
use vendra_db::DbError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type alias for persistence port calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Text shown for every failed login.
pub const INVALID_CREDENTIALS: &str = "Invalid username or password";

// =============================================================================
// Authentication Failure
// =============================================================================

/// Why a login was refused. Only ever logged; see [`INVALID_CREDENTIALS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No active account with that username.
    NotFound,
    /// Account exists, secret does not match.
    BadSecret,
}

impl AuthFailure {
    /// Short tag for structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            AuthFailure::NotFound => "not_found",
            AuthFailure::BadSecret => "bad_secret",
        }
    }
}

// =============================================================================
// Engine Error
// =============================================================================

/// Every failure a caller of the engine can observe.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Login refused. The cause is deliberately absent from the message.
    #[error("{}", INVALID_CREDENTIALS)]
    Auth(AuthFailure),

    /// No active session, or the session went idle past the timeout.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The session's role may not perform the operation.
    #[error("Permission denied: {required} role required")]
    PermissionDenied { required: Role },

    /// Product has nothing on hand.
    #[error("Product {code} is out of stock")]
    OutOfStock { code: String },

    /// Reservation asked for more than the ledger holds.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: i64,
        requested: i64,
        available: i64,
    },

    /// Finalize was called on a cart with no lines.
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Sale not found: {0}")]
    SaleNotFound(String),

    /// A store write failed. Any reservation taken for it has been released.
    #[error("Persistence failed: {0}")]
    PersistenceFailed(#[source] StoreError),

    /// Cart or sale rule rejected the change.
    #[error(transparent)]
    Cart(CoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Returns true if the same call may be repeated unchanged.
    ///
    /// A failed commit leaves the cart and the ledger as they were, so the
    /// cashier can always try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::PersistenceFailed(_))
    }

    /// Returns true if the caller must log in (again) before continuing.
    pub fn requires_login(&self) -> bool {
        matches!(self, EngineError::NotAuthenticated)
    }

    /// Text suitable for the cashier's screen.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Auth(_) => INVALID_CREDENTIALS.to_string(),
            EngineError::NotAuthenticated => "Your session has ended. Please log in again.".to_string(),
            EngineError::PermissionDenied { .. } => {
                "You are not allowed to perform this action.".to_string()
            }
            EngineError::OutOfStock { code } => format!("{code} is out of stock."),
            EngineError::InsufficientStock { available, .. } => {
                format!("Not enough stock: only {available} left.")
            }
            EngineError::EmptyCart => "Add at least one product before checkout.".to_string(),
            EngineError::ProductNotFound(code) => format!("No product with code {code}."),
            EngineError::SaleNotFound(number) => format!("No sale numbered {number}."),
            EngineError::PersistenceFailed(_) => {
                "The sale could not be saved. Nothing was charged; please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::OutOfStock { code } => EngineError::OutOfStock { code },
            other => EngineError::Cart(other),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        EngineError::PersistenceFailed(err)
    }
}

// =============================================================================
// Store Error
// =============================================================================

/// Failure reported by a [`PosStore`](crate::store::PosStore).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The store refused the write (constraint, state or duplicate).
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The store could not be reached or the query failed.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => StoreError::NotFound { entity, id },
            DbError::UniqueViolation { .. }
            | DbError::ForeignKeyViolation { .. }
            | DbError::CheckViolation(_)
            | DbError::InvalidState(_)
            | DbError::Validation(_) => StoreError::Rejected(err.to_string()),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

// =============================================================================
// Config Error
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load config: {0}")]
    LoadFailed(String),

    #[error("Failed to save config: {0}")]
    SaveFailed(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::LoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::LoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(err: toml::ser::Error) -> Self {
        ConfigError::SaveFailed(err.to_string())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
