//! # Money Module
//!
//! Provides the `Money` type for monetary values and `CurrencyCode` for the
//! three-letter country/currency tags the cash devices report.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  WHERE CASH VALUES COME FROM                                            │
//! │                                                                         │
//! │  Bill validator:  channel 2 ──► setup table ──► 1000 (minor units)      │
//! │  Coin handler:    VALUE_ADDED ──► u32 LE    ──► 200  (minor units)      │
//! │                                                                         │
//! │  Devices speak integer minor units on the wire. We keep it that way:   │
//! │    accumulated = Σ credits, change = accumulated - target              │
//! │  No floats, no rounding, no lost cents.                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use kiosk_core::money::Money;
//!
//! let note = Money::from_cents(500);
//! let coin = Money::from_cents(100);
//! assert_eq!((note + coin).cents(), 600);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use ts_rs::TS;

use crate::error::ValidationError;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
///
/// ## Design Decisions
/// - **i64 (signed)**: differences (`target - accumulated`) may go negative
///   before being clamped
/// - **Single field tuple struct**: Zero-cost abstraction over i64
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    ///
    /// ## Example
    /// ```rust
    /// use kiosk_core::money::Money;
    ///
    /// let fare = Money::from_cents(1099);
    /// assert_eq!(fare.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from an unsigned device value.
    ///
    /// Cash devices report values as u32 little-endian minor units.
    #[inline]
    pub const fn from_device_value(value: u32) -> Self {
        Money(value as i64)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the value as a device wire value, if it fits.
    ///
    /// ## Example
    /// ```rust
    /// use kiosk_core::money::Money;
    ///
    /// assert_eq!(Money::from_cents(50).to_device_value(), Some(50));
    /// assert_eq!(Money::from_cents(-1).to_device_value(), None);
    /// ```
    pub fn to_device_value(&self) -> Option<u32> {
        u32::try_from(self.0).ok()
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

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Subtracts `other`, clamping at zero.
    ///
    /// ## Example
    /// ```rust
    /// use kiosk_core::money::Money;
    ///
    /// let target = Money::from_cents(550);
    /// assert_eq!(target.saturating_remaining(Money::from_cents(500)).cents(), 50);
    /// assert_eq!(target.saturating_remaining(Money::from_cents(600)).cents(), 0);
    /// ```
    #[inline]
    pub fn saturating_remaining(&self, paid: Money) -> Money {
        Money((self.0 - paid.0).max(0))
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Shows money as `major.minor` without a currency symbol.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.major().abs(), self.minor())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}

// =============================================================================
// Currency Code
// =============================================================================

/// A three-letter ISO 4217 currency code as carried in SSP payloads.
///
/// The devices send the code as 3 raw ASCII bytes. `from_bytes` keeps
/// whatever arrived (for logging), `parse` validates operator input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode([u8; 3]);

impl CurrencyCode {
    /// Wraps the 3 bytes exactly as received from a device.
    #[inline]
    pub const fn from_bytes(bytes: [u8; 3]) -> Self {
        CurrencyCode(bytes)
    }

    /// Parses and validates an operator-supplied code ("EUR", "usd").
    ///
    /// ## Example
    /// ```rust
    /// use kiosk_core::money::CurrencyCode;
    ///
    /// assert_eq!(CurrencyCode::parse("eur").unwrap().as_str(), "EUR");
    /// assert!(CurrencyCode::parse("EURO").is_err());
    /// ```
    pub fn parse(code: &str) -> Result<Self, ValidationError> {
        let code = code.trim();
        let bytes = code.as_bytes();

        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_alphabetic()) {
            return Err(ValidationError::InvalidFormat {
                field: "currency".to_string(),
                reason: format!("'{}' is not a three-letter code", code),
            });
        }

        let mut upper = [0u8; 3];
        for (dst, src) in upper.iter_mut().zip(bytes) {
            *dst = src.to_ascii_uppercase();
        }
        Ok(CurrencyCode(upper))
    }

    /// Returns the raw bytes for the wire.
    #[inline]
    pub const fn as_bytes(&self) -> [u8; 3] {
        self.0
    }

    /// Returns the code as text. Non-ASCII device garbage shows as "???".
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CurrencyCode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CurrencyCode::parse(s)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CurrencyCode::parse(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.as_str().to_string()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
