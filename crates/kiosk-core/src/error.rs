//! # Error Types
//!
//! Domain-specific error types for kiosk-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  kiosk-core errors (this file)                                         │
//! │  ├── CoreError        - Session rule violations                        │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  kiosk-ssp errors (separate crate)                                     │
//! │  └── SspError         - Link, bus and device protocol failures         │
//! │                                                                         │
//! │  kiosk-payment errors                                                  │
//! │  └── PaymentError     - What the calling layer sees                    │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → PaymentError → caller             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Payment session rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An operation needs an active session and there is none.
    ///
    /// ## When This Occurs
    /// - `cancel` while Idle
    /// - a credit arriving after the session already completed
    #[error("No active payment session")]
    NoActiveSession,

    /// A session is already collecting cash.
    ///
    /// ## User Workflow
    /// ```text
    /// startSession("A-1", 500)  ──► Active
    ///      │
    ///      ▼
    /// startSession("A-2", 900)  ──► SessionInProgress { order_id: "A-1" }
    ///      │
    ///      ▼
    /// UI must cancel A-1 first (which refunds what was inserted)
    /// ```
    #[error("Payment session for order {order_id} is still in progress")]
    SessionInProgress { order_id: String },

    /// The session is in a state that does not allow the operation.
    #[error("Cannot {operation} while session is {status}")]
    InvalidSessionStatus { operation: String, status: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., control characters, bad currency code).
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
