//! # Error Types
//!
//! Domain-specific error types for vendra-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  vendra-core errors (this file)                                        │
//! │  ├── CoreError        - Cart and domain rule violations                │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  vendra-db errors (separate crate)                                     │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  vendra-engine errors (separate crate)                                 │
//! │  └── EngineError      - What the presentation layer sees               │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → Presentation        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Cart and domain rule violations.
///
/// Every variant is recoverable by the cashier: fix the input and try again.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Product has nothing on hand.
    ///
    /// ## When This Occurs
    /// - Scanning a product whose quantity is 0
    ///
    /// ## User Workflow
    /// ```text
    /// Scan "P-COKE"
    ///      │
    ///      ▼
    /// Check stock: quantity = 0
    ///      │
    ///      ▼
    /// OutOfStock { code: "P-COKE" }
    ///      │
    ///      ▼
    /// UI shows: "P-COKE is out of stock"
    /// ```
    #[error("Product {code} is out of stock")]
    OutOfStock { code: String },

    /// Product was soft-deleted and can no longer be sold.
    #[error("Product {code} is no longer sold")]
    ProductInactive { code: String },

    /// No cart line exists for the given product.
    #[error("No cart line for product {product_id}")]
    LineNotFound { product_id: i64 },

    /// Sale is not in a state that allows the requested operation.
    ///
    /// ## When This Occurs
    /// - Mutating lines of a COMMITTED sale
    /// - Committing a sale twice
    /// - Voiding a sale that is already VOID
    #[error("Sale {sale_number} is {current_status}, cannot perform operation")]
    InvalidSaleStatus {
        sale_number: String,
        current_status: String,
    },

    /// Cart has reached the maximum number of lines.
    #[error("Cart cannot have more than {max} lines")]
    CartTooLarge { max: usize },

    /// Line quantity exceeds the maximum allowed.
    #[error("Quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: i64, max: i64 },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too short.
    #[error("{field} must be at least {min} characters")]
    TooShort { field: String, min: usize },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g. a phone number with letters).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::OutOfStock {
            code: "P-COKE".to_string(),
        };
        assert_eq!(err.to_string(), "Product P-COKE is out of stock");

        let err = CoreError::QuantityTooLarge {
            requested: 1000,
            max: 999,
        };
        assert_eq!(
            err.to_string(),
            "Quantity 1000 exceeds maximum allowed (999)"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "code".to_string(),
        };
        assert_eq!(err.to_string(), "code is required");

        let err = ValidationError::MustNotBeNegative {
            field: "tax amount".to_string(),
        };
        assert_eq!(err.to_string(), "tax amount must not be negative");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "code".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
