//! # Domain Types
//!
//! Types shared between the hardware stack, the coordinator and the
//! external kiosk UI.
//!
//! ## Event Feed
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     PaymentEvent (tagged union)                         │
//! │                                                                         │
//! │  SESSION LIFECYCLE                 HARDWARE                            │
//! │  ─────────────────                 ────────                            │
//! │  SESSION_STARTED                   DEVICE_READY                        │
//! │  CREDIT_RECEIVED                   DEVICE_RESET                        │
//! │  PAYMENT_COMPLETE                  DEVICE_ACTIVITY                     │
//! │  CHANGE_DISPENSED                  HARDWARE_FAULT ──┬── JAM            │
//! │  CHANGE_ERROR                                       ├── STACKER_FULL   │
//! │  PAYMENT_CANCELLED                                  ├── COINS_LOW      │
//! │  UNATTRIBUTED_CREDIT                                ├── FRAUD          │
//! │                                                     └── BUS_ERROR ...  │
//! │                                                                         │
//! │  Wire format: { "event": "CREDIT_RECEIVED", "device": ..., ... }       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Consumers pattern-match on the variant; there are no string event names
//! to subscribe to.

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Device Kind
// =============================================================================

/// The two cash peripherals sharing the serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Banknote validator (address 0x00).
    BillValidator,
    /// Coin acceptor / recycler with payout (address 0x10).
    CoinHandler,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::BillValidator => write!(f, "bill_validator"),
            DeviceKind::CoinHandler => write!(f, "coin_handler"),
        }
    }
}

// =============================================================================
// Session Status
// =============================================================================

/// Lifecycle of a payment session.
///
/// ```text
/// Idle ──start──► Active ──credit ≥ target──► Completing ──► Completed ──┐
///                   │                                                   │
///                   └──cancel──────────────────────────────► Cancelled ─┤
///                                                                       ▼
///                                                                     Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No session; devices disabled.
    #[default]
    Idle,
    /// Accepting cash.
    Active,
    /// Target reached; devices being disabled and change paid out.
    Completing,
    /// Paid in full (transient, followed by Idle).
    Completed,
    /// Cancelled and refunded (transient, followed by Idle).
    Cancelled,
}

impl SessionStatus {
    /// Returns true once the session reached Completed or Cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Completing => write!(f, "completing"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// =============================================================================
// Hardware Faults
// =============================================================================

/// Conditions that need an operator rather than automatic recovery.
///
/// Faults are reported through the event feed, never as errors, and never
/// abort a running session on their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HardwareFault {
    /// Note or coin jammed in the path. `safe` jams hold no note in reach.
    Jam { safe: bool },
    /// Banknote stacker is full.
    StackerFull,
    /// Coin payout reservoir is running low.
    CoinsLow,
    /// Fraud attempt detected (string on a note, coin on a wire).
    Fraud,
    /// The bus gave up on a device after exhausting retries.
    BusError { message: String },
    /// Coin reservoir is full.
    DeviceFull,
    /// Banknote cashbox was taken out.
    CashboxRemoved,
    /// A payout stopped before dispensing the full amount.
    IncompletePayout { paid: Money, requested: Money },
    /// A note was credited on a channel the setup table does not know.
    UnmappedChannel { channel: u8 },
}

impl fmt::Display for HardwareFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardwareFault::Jam { safe: true } => write!(f, "safe jam"),
            HardwareFault::Jam { safe: false } => write!(f, "unsafe jam"),
            HardwareFault::StackerFull => write!(f, "stacker full"),
            HardwareFault::CoinsLow => write!(f, "coins low"),
            HardwareFault::Fraud => write!(f, "fraud attempt"),
            HardwareFault::BusError { message } => write!(f, "bus error: {}", message),
            HardwareFault::DeviceFull => write!(f, "device full"),
            HardwareFault::CashboxRemoved => write!(f, "cashbox removed"),
            HardwareFault::IncompletePayout { paid, requested } => {
                write!(f, "incomplete payout: {} of {}", paid, requested)
            }
            HardwareFault::UnmappedChannel { channel } => {
                write!(f, "credit on unmapped channel {}", channel)
            }
        }
    }
}

// =============================================================================
// Device Activity
// =============================================================================

/// Informational device progress, surfaced so the UI can animate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceActivity {
    /// A note is being read (channel 0 while still validating).
    NoteReading { channel: u8 },
    /// A note is being returned to the customer.
    NoteRejecting,
    /// A note was returned to the customer.
    NoteRejected,
    /// A note is moving to the stacker.
    NoteStacking,
    /// A note reached the stacker.
    NoteStacked,
    /// A note was cleared from the front at power-up.
    NoteClearedFromFront { channel: u8 },
    /// A note was cleared into the cashbox at power-up.
    NoteClearedIntoCashbox { channel: u8 },
    /// The cashbox was put back.
    CashboxReplaced,
    /// The coin mech detected a coin entering.
    CoinEntering,
    /// A coin was rejected.
    CoinRejected,
    /// Per-coin credit report. Credit itself is taken from value-added totals.
    CoinAccepted { value: Money },
    /// A payout is in progress; `value` dispensed so far.
    Dispensing { value: Money },
    /// A payout finished.
    Dispensed { value: Money },
    /// The coin handler's internal payout timer expired.
    PayoutTimeout,
}

// =============================================================================
// Payment Event Feed
// =============================================================================

/// Everything the payment core tells the outside world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentEvent {
    /// A session is accepting cash. `hardware_available = false` means it
    /// will never receive credit (no-hardware mode).
    SessionStarted {
        order_id: String,
        total_cents: Money,
        hardware_available: bool,
    },

    /// Cash was credited to the active session.
    CreditReceived {
        device: DeviceKind,
        value: Money,
        accumulated: Money,
        remaining: Money,
    },

    /// The target was reached. Fires exactly once per session.
    PaymentComplete {
        order_id: String,
        total_paid: Money,
        change: Money,
    },

    /// Change or refund was paid out.
    ChangeDispensed { amount: Money },

    /// Change or refund could not be paid out; the amount is still owed.
    ChangeError { change: Money, reason: String },

    /// The session was cancelled; `refunded` is what was owed back.
    PaymentCancelled { order_id: String, refunded: Money },

    /// Cash arrived while no session could take it.
    UnattributedCredit {
        device: DeviceKind,
        value: Money,
        reason: String,
    },

    /// A device finished its initialization sequence.
    DeviceReady { device: DeviceKind },

    /// A device reset itself; `reinitialized` tells whether it came back.
    DeviceReset {
        device: DeviceKind,
        reinitialized: bool,
    },

    /// Informational progress from a device.
    DeviceActivity {
        device: DeviceKind,
        activity: DeviceActivity,
    },

    /// A condition requiring operator attention.
    HardwareFault {
        device: DeviceKind,
        fault: HardwareFault,
    },
}

impl PaymentEvent {
    /// Returns the variant name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            PaymentEvent::SessionStarted { .. } => "SESSION_STARTED",
            PaymentEvent::CreditReceived { .. } => "CREDIT_RECEIVED",
            PaymentEvent::PaymentComplete { .. } => "PAYMENT_COMPLETE",
            PaymentEvent::ChangeDispensed { .. } => "CHANGE_DISPENSED",
            PaymentEvent::ChangeError { .. } => "CHANGE_ERROR",
            PaymentEvent::PaymentCancelled { .. } => "PAYMENT_CANCELLED",
            PaymentEvent::UnattributedCredit { .. } => "UNATTRIBUTED_CREDIT",
            PaymentEvent::DeviceReady { .. } => "DEVICE_READY",
            PaymentEvent::DeviceReset { .. } => "DEVICE_RESET",
            PaymentEvent::DeviceActivity { .. } => "DEVICE_ACTIVITY",
            PaymentEvent::HardwareFault { .. } => "HARDWARE_FAULT",
        }
    }

    /// Serializes to one JSON line.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
