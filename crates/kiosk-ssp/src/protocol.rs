//! # SSP Protocol Constants
//!
//! Addresses, command opcodes, poll event codes and generic response codes.
//!
//! ## Response Layout
//! ```text
//! ┌────────┬─────────────────────────────────────────────┐
//! │ STATUS │ DATA ...                                    │
//! │ 0xF0   │ command-specific / poll events              │
//! └────────┴─────────────────────────────────────────────┘
//! ```

use std::fmt;

/// Bill validator address on the shared line.
pub const BILL_VALIDATOR_ADDRESS: u8 = 0x00;

/// Coin handler address on the shared line.
pub const COIN_HANDLER_ADDRESS: u8 = 0x10;

/// Host protocol version negotiated with both devices.
pub const DEFAULT_PROTOCOL_VERSION: u8 = 8;

// =============================================================================
// Commands
// =============================================================================

/// Host → device command opcodes.
pub mod command {
    pub const RESET: u8 = 0x01;
    pub const SET_INHIBITS: u8 = 0x02;
    pub const SETUP_REQUEST: u8 = 0x05;
    pub const HOST_PROTOCOL_VERSION: u8 = 0x06;
    pub const POLL: u8 = 0x07;
    pub const REJECT_BANKNOTE: u8 = 0x08;
    pub const DISABLE: u8 = 0x09;
    pub const ENABLE: u8 = 0x0A;
    pub const SYNC: u8 = 0x11;
    pub const GET_ALL_LEVELS: u8 = 0x22;
    pub const PAYOUT_AMOUNT: u8 = 0x33;
    pub const SET_DENOMINATION_ROUTE: u8 = 0x3B;
    pub const SET_COIN_MECH_INHIBITS: u8 = 0x40;
    pub const SET_OPTIONS: u8 = 0x50;

    /// Human-readable opcode name for logs.
    pub fn name(opcode: u8) -> &'static str {
        match opcode {
            RESET => "RESET",
            SET_INHIBITS => "SET_INHIBITS",
            SETUP_REQUEST => "SETUP_REQUEST",
            HOST_PROTOCOL_VERSION => "HOST_PROTOCOL_VERSION",
            POLL => "POLL",
            REJECT_BANKNOTE => "REJECT_BANKNOTE",
            DISABLE => "DISABLE",
            ENABLE => "ENABLE",
            SYNC => "SYNC",
            GET_ALL_LEVELS => "GET_ALL_LEVELS",
            PAYOUT_AMOUNT => "PAYOUT_AMOUNT",
            SET_DENOMINATION_ROUTE => "SET_DENOMINATION_ROUTE",
            SET_COIN_MECH_INHIBITS => "SET_COIN_MECH_INHIBITS",
            SET_OPTIONS => "SET_OPTIONS",
            _ => "UNKNOWN",
        }
    }
}

/// Final byte of PAYOUT_AMOUNT.
pub mod payout_option {
    /// Dispense for real.
    pub const EXECUTE: u8 = 0x58;
    /// Ask whether the payout would succeed, without moving coins.
    pub const TEST: u8 = 0x19;
}

/// Route byte of SET_DENOMINATION_ROUTE.
pub mod route {
    /// Keep the coin in the payout reservoir (recycle as change).
    pub const PAYOUT: u8 = 0x00;
    /// Send the coin to the cashbox.
    pub const CASHBOX: u8 = 0x01;
}

// =============================================================================
// Poll Events
// =============================================================================

/// Event codes shared by both devices.
pub mod event {
    pub const SLAVE_RESET: u8 = 0xF1;
    pub const DISABLED: u8 = 0xE8;
    pub const FRAUD_ATTEMPT: u8 = 0xE6;
}

/// Bill validator poll event codes.
pub mod bill_event {
    pub const READ_NOTE: u8 = 0xEF;
    pub const CREDIT_NOTE: u8 = 0xEE;
    pub const NOTE_REJECTING: u8 = 0xED;
    pub const NOTE_REJECTED: u8 = 0xEC;
    pub const NOTE_STACKING: u8 = 0xCC;
    pub const NOTE_STACKED: u8 = 0xEB;
    pub const SAFE_NOTE_JAM: u8 = 0xEA;
    pub const UNSAFE_NOTE_JAM: u8 = 0xE9;
    pub const STACKER_FULL: u8 = 0xE7;
    pub const NOTE_CLEARED_FROM_FRONT: u8 = 0xE1;
    pub const NOTE_CLEARED_TO_CASHBOX: u8 = 0xE2;
    pub const CASHBOX_REMOVED: u8 = 0xE3;
    pub const CASHBOX_REPLACED: u8 = 0xE4;
}

/// Coin handler poll event codes.
pub mod coin_event {
    pub const VALUE_ADDED: u8 = 0xBF;
    pub const PAY_IN_ACTIVE: u8 = 0xC1;
    pub const COIN_REJECTED: u8 = 0xBA;
    pub const DISPENSING: u8 = 0xDA;
    pub const DISPENSED: u8 = 0xD2;
    pub const COINS_LOW: u8 = 0xD3;
    pub const DEVICE_FULL: u8 = 0xD4;
    pub const JAMMED: u8 = 0xD5;
    pub const TIMEOUT: u8 = 0xD9;
    pub const INCOMPLETE_PAYOUT: u8 = 0xDC;
    pub const COIN_CREDIT: u8 = 0xDF;
}

// =============================================================================
// Generic Response Status
// =============================================================================

/// First byte of every device response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
    Ok,
    Reset,
    UnknownCommand,
    WrongParams,
    OutOfRange,
    CannotProcess,
    SoftwareError,
    Fail,
    KeyNotSet,
}

impl ResponseStatus {
    /// Maps a status byte, `None` for anything outside the generic set.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0xF0 => Some(ResponseStatus::Ok),
            0xF1 => Some(ResponseStatus::Reset),
            0xF2 => Some(ResponseStatus::UnknownCommand),
            0xF3 => Some(ResponseStatus::WrongParams),
            0xF4 => Some(ResponseStatus::OutOfRange),
            0xF5 => Some(ResponseStatus::CannotProcess),
            0xF6 => Some(ResponseStatus::SoftwareError),
            0xF8 => Some(ResponseStatus::Fail),
            0xFA => Some(ResponseStatus::KeyNotSet),
            _ => None,
        }
    }

    /// The wire byte.
    pub fn as_byte(&self) -> u8 {
        match self {
            ResponseStatus::Ok => 0xF0,
            ResponseStatus::Reset => 0xF1,
            ResponseStatus::UnknownCommand => 0xF2,
            ResponseStatus::WrongParams => 0xF3,
            ResponseStatus::OutOfRange => 0xF4,
            ResponseStatus::CannotProcess => 0xF5,
            ResponseStatus::SoftwareError => 0xF6,
            ResponseStatus::Fail => 0xF8,
            ResponseStatus::KeyNotSet => 0xFA,
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseStatus::Ok => "OK",
            ResponseStatus::Reset => "RESET",
            ResponseStatus::UnknownCommand => "UNKNOWN_CMD",
            ResponseStatus::WrongParams => "WRONG_PARAMS",
            ResponseStatus::OutOfRange => "OUT_OF_RANGE",
            ResponseStatus::CannotProcess => "CANNOT_PROCESS",
            ResponseStatus::SoftwareError => "SOFTWARE_ERR",
            ResponseStatus::Fail => "FAIL",
            ResponseStatus::KeyNotSet => "KEY_NOT_SET",
        };
        write!(f, "{} (0x{:02X})", name, self.as_byte())
    }
}
