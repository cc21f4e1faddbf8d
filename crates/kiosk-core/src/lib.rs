//! # kiosk-core: Pure Domain Logic for the Cash Kiosk
//!
//! This crate holds the money math and the payment-session state machine.
//! It has zero I/O dependencies: the hardware stack (`kiosk-ssp`) and the
//! coordinator (`kiosk-payment`) build on top of it.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Kiosk Cash Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Kiosk UI / web layer (external)                    │   │
//! │  │      startSession ──► PaymentEvent feed ◄── cancelSession       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               kiosk-payment (Coordinator actor)                 │   │
//! │  └───────────────┬─────────────────────────────┬───────────────────┘   │
//! │                  │                             │                        │
//! │  ┌───────────────▼───────────────┐  ┌──────────▼──────────────────┐   │
//! │  │ ★ kiosk-core (THIS CRATE) ★   │  │ kiosk-ssp (serial stack)    │   │
//! │  │                               │  │                             │   │
//! │  │  money ── session ── types    │  │ codec ─ bus ─ drivers       │   │
//! │  │                               │  │                             │   │
//! │  │  NO I/O • PURE FUNCTIONS      │  │                             │   │
//! │  └───────────────────────────────┘  └─────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Money type with integer arithmetic, ISO currency codes
//! - [`session`] - Payment session state machine
//! - [`types`] - Device kinds, hardware faults, the event feed
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use kiosk_core::money::Money;
//! use kiosk_core::session::PaymentSession;
//!
//! let mut session = PaymentSession::new();
//! session.start("order-42", Money::from_cents(550)).unwrap();
//!
//! let first = session.apply_credit(Money::from_cents(500)).unwrap();
//! assert!(first.completion.is_none());
//!
//! let second = session.apply_credit(Money::from_cents(100)).unwrap();
//! let completion = second.completion.unwrap();
//! assert_eq!(completion.change.cents(), 50);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod session;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::{CurrencyCode, Money};
pub use session::{Cancellation, Completion, CreditOutcome, PaymentSession, SessionSnapshot};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum length of an order identifier.
pub const MAX_ORDER_ID_LEN: usize = 64;

/// Largest amount a single kiosk session may request, in minor units.
///
/// ## Business Reason
/// A cash kiosk holding a few hundred coins cannot make change for an
/// arbitrarily large order; this bounds typos in the calling layer.
pub const MAX_SESSION_AMOUNT_CENTS: i64 = 1_000_000;
