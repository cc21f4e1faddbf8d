//! # kiosk-ssp: SSP Protocol Stack
//!
//! Codec, bus transport and device drivers for the cash peripherals.
//!
//! ## Layering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   CashDevice (trait)                                                   │
//! │   ├── BillValidator ──┐                                                │
//! │   └── CoinHandler  ───┤  send(address, payload) ─► Frame               │
//! │                       ▼                                                 │
//! │   BusHandle ──mpsc──► Bus task ── one exchange at a time ──► link      │
//! │                       │   ▲                                             │
//! │          PollResponse ◄   └── FrameDecoder (resync, coalesced frames)  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//! - [`packet`] - frame encode/decode, CRC-16, byte stuffing
//! - [`protocol`] - addresses, opcodes, event codes, status codes
//! - [`link`] - serial link abstraction and the tokio-serial connector
//! - [`bus`] - the bus transport actor
//! - [`device`] - bill validator and coin handler drivers
//! - [`error`] - SSP error types

pub mod bus;
pub mod device;
pub mod error;
pub mod link;
pub mod packet;
pub mod protocol;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use bus::{Bus, BusConfig, BusHandle, PollResponse};
pub use device::bill_validator::{BillValidator, BillValidatorOptions};
pub use device::coin_handler::{CoinHandler, CoinHandlerOptions, PayoutError};
pub use device::{CashDevice, DeviceEvent};
pub use error::{SspError, SspResult};
pub use link::{Connector, SerialConnector, SerialLink, SerialSettings};
pub use packet::{Frame, FrameDecoder};
pub use protocol::{ResponseStatus, BILL_VALIDATOR_ADDRESS, COIN_HANDLER_ADDRESS};
