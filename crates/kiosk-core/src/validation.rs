//! # Validation Module
//!
//! Input validation for values crossing into the payment core from the
//! calling layer (order identifiers, target amounts).
//!
//! ## Usage
//! ```rust
//! use kiosk_core::validation::{validate_order_id, validate_target_amount};
//! use kiosk_core::Money;
//!
//! assert!(validate_order_id("order-42").is_ok());
//! assert!(validate_target_amount(Money::from_cents(550)).is_ok());
//! ```

use crate::error::ValidationError;
use crate::money::Money;
use crate::{MAX_ORDER_ID_LEN, MAX_SESSION_AMOUNT_CENTS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates an order identifier.
///
/// ## Rules
/// - Must not be empty after trimming
/// - At most 64 characters
/// - No control characters (the id ends up in JSON lines and logs)
pub fn validate_order_id(order_id: &str) -> ValidationResult<()> {
    let order_id = order_id.trim();

    if order_id.is_empty() {
        return Err(ValidationError::Required {
            field: "order_id".to_string(),
        });
    }

    if order_id.len() > MAX_ORDER_ID_LEN {
        return Err(ValidationError::TooLong {
            field: "order_id".to_string(),
            max: MAX_ORDER_ID_LEN,
        });
    }

    if order_id.chars().any(char::is_control) {
        return Err(ValidationError::InvalidFormat {
            field: "order_id".to_string(),
            reason: "must not contain control characters".to_string(),
        });
    }

    Ok(())
}

/// Validates the amount a session must collect.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed [`MAX_SESSION_AMOUNT_CENTS`]
pub fn validate_target_amount(target: Money) -> ValidationResult<()> {
    if !target.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "target amount".to_string(),
        });
    }

    if target.cents() > MAX_SESSION_AMOUNT_CENTS {
        return Err(ValidationError::OutOfRange {
            field: "target amount".to_string(),
            min: 1,
            max: MAX_SESSION_AMOUNT_CENTS,
        });
    }

    Ok(())
}

/// Validates a credit value reported by a device.
pub fn validate_credit(value: Money) -> ValidationResult<()> {
    if !value.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "credit".to_string(),
        });
    }
    Ok(())
}
