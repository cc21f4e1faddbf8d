//! # kiosk-payment: Payment Session Coordinator
//!
//! Turns credit events from the cash devices into paid orders.
//!
//! ## Session Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  start_session(order, target)                                          │
//! │     │  hardware offline? ──► bring up (validator, then coin handler)   │
//! │     ▼                                                                   │
//! │  Active ◄──── credit events (bill / coin) ───── PollResponse           │
//! │     │  accumulated ≥ target                                            │
//! │     ▼                                                                   │
//! │  Completing ── disable both ── PaymentComplete ── pay change           │
//! │     ▼                                                                   │
//! │  Completed ──► Idle                                                    │
//! │                                                                         │
//! │  cancel_session() ── reject escrow ── disable ── refund ── Cancelled   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//! - [`config`] - TOML/env configuration
//! - [`coordinator`] - the coordinator task and its handle
//! - [`emitter`] - event feed sinks
//! - [`hardware`] - bus and driver bring-up, poll routing
//! - [`error`] - payment error types

pub mod config;
pub mod coordinator;
pub mod emitter;
pub mod error;
pub mod hardware;

pub use config::KioskConfig;
pub use coordinator::{Coordinator, CoordinatorBuilder, CoordinatorHandle, SessionAck};
pub use emitter::{ChannelEmitter, NoOpEmitter, PaymentEventEmitter};
pub use error::{PaymentError, PaymentResult};
