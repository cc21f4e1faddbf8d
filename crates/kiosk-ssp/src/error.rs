//! # SSP Error Types
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SSP Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │      Link       │  │      Bus        │  │     Device              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  PortOpenFailed │  │  Timeout        │  │  Rejected               │ │
//! │  │  WriteFailed    │  │  BusClosed      │  │  CannotProcess          │ │
//! │  │  ReadFailed     │  │  DeviceUnresp.  │  │  MalformedResponse      │ │
//! │  │  LinkClosed     │  │                 │  │  DeviceNotReady         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::protocol::{command, ResponseStatus};

/// Result type alias for SSP operations.
pub type SspResult<T> = Result<T, SspError>;

#[derive(Debug, Clone, Error)]
pub enum SspError {
    // =========================================================================
    // Link Errors
    // =========================================================================
    /// Serial port could not be opened.
    #[error("Failed to open serial port {port}: {reason}")]
    PortOpenFailed { port: String, reason: String },

    #[error("Serial write failed: {0}")]
    WriteFailed(String),

    #[error("Serial read failed: {0}")]
    ReadFailed(String),

    /// The link reported end-of-stream.
    #[error("Serial link closed")]
    LinkClosed,

    // =========================================================================
    // Bus Errors
    // =========================================================================
    /// No matching response within the response timeout.
    #[error("No response from device 0x{address:02X} within {timeout_ms} ms")]
    Timeout { address: u8, timeout_ms: u64 },

    /// The bus task has stopped.
    #[error("SSP bus is closed")]
    BusClosed,

    /// All retries of a command failed.
    #[error("Device 0x{address:02X} unresponsive to {} after {attempts} attempts: {last_error}", op_name(.opcode))]
    DeviceUnresponsive {
        address: u8,
        opcode: u8,
        attempts: u32,
        last_error: String,
    },

    // =========================================================================
    // Device Errors
    // =========================================================================
    /// The device answered with a non-OK generic status.
    #[error("Device 0x{address:02X} rejected {}: {status}", op_name(.opcode))]
    Rejected {
        address: u8,
        opcode: u8,
        status: ResponseStatus,
    },

    /// CANNOT_PROCESS, with the optional sub-code byte.
    #[error("Device 0x{address:02X} cannot process {} (code {code:?})", op_name(.opcode))]
    CannotProcess {
        address: u8,
        opcode: u8,
        code: Option<u8>,
    },

    #[error("Malformed response from 0x{address:02X} to {}: {reason}", op_name(.opcode))]
    MalformedResponse {
        address: u8,
        opcode: u8,
        reason: String,
    },

    /// Operation needs a completed initialization.
    #[error("Device 0x{address:02X} is not initialized")]
    DeviceNotReady { address: u8 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

fn op_name(opcode: &u8) -> &'static str {
    command::name(*opcode)
}

impl From<std::io::Error> for SspError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::BrokenPipe => {
                SspError::LinkClosed
            }
            _ => SspError::ReadFailed(err.to_string()),
        }
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SspError {
    /// Returns true if the bus should retransmit after this error.
    ///
    /// A closed link stays closed, so only transient I/O failures and
    /// timeouts qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SspError::Timeout { .. } | SspError::WriteFailed(_) | SspError::ReadFailed(_)
        )
    }

    /// Returns true if the device answered but not the way we asked.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            SspError::Rejected { .. }
                | SspError::CannotProcess { .. }
                | SspError::MalformedResponse { .. }
        )
    }

    /// Returns true if the transport is gone for good.
    pub fn is_link_down(&self) -> bool {
        matches!(
            self,
            SspError::LinkClosed | SspError::BusClosed | SspError::PortOpenFailed { .. }
        )
    }
}
