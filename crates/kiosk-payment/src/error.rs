//! # Payment Error Types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Configuration        Session              Hardware                     │
//! │  InvalidConfig        Session(CoreError)   Hardware(SspError)           │
//! │  ConfigLoadFailed                          HardwareUnavailable          │
//! │  ConfigSaveFailed                          Payout(PayoutError)          │
//! │                                                                         │
//! │  Internal: ChannelError, ShuttingDown                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use kiosk_core::CoreError;
use kiosk_ssp::{PayoutError, SspError};

/// Result type alias for payment operations.
pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Error)]
pub enum PaymentError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid kiosk configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Session Errors
    // =========================================================================
    #[error(transparent)]
    Session(#[from] CoreError),

    // =========================================================================
    // Hardware Errors
    // =========================================================================
    #[error("Hardware error: {0}")]
    Hardware(#[from] SspError),

    /// No serial port configured, or bring-up failed.
    #[error("Cash hardware unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("Payout failed: {0}")]
    Payout(#[from] PayoutError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Payment coordinator is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<std::io::Error> for PaymentError {
    fn from(err: std::io::Error) -> Self {
        PaymentError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for PaymentError {
    fn from(err: toml::de::Error) -> Self {
        PaymentError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for PaymentError {
    fn from(err: toml::ser::Error) -> Self {
        PaymentError::ConfigSaveFailed(err.to_string())
    }
}

impl PaymentError {
    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            PaymentError::InvalidConfig(_)
                | PaymentError::ConfigLoadFailed(_)
                | PaymentError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the caller asked for something the session state
    /// does not allow.
    pub fn is_session_error(&self) -> bool {
        matches!(self, PaymentError::Session(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert!(PaymentError::InvalidConfig("baud".into()).is_config_error());
        assert!(PaymentError::Session(CoreError::NoActiveSession).is_session_error());
        assert!(!PaymentError::ShuttingDown.is_config_error());
    }

    #[test]
    fn test_conversions() {
        let err: PaymentError = SspError::BusClosed.into();
        assert!(matches!(err, PaymentError::Hardware(SspError::BusClosed)));

        let err: PaymentError = PayoutError::Busy.into();
        assert_eq!(err.to_string(), "Payout failed: Coin handler busy");
    }
}
