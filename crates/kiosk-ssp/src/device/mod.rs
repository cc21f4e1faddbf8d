//! # Device Drivers
//!
//! The two cash peripherals behind one trait.
//!
//! ## Poll Event Walk
//! A single POLL reply can carry several events of different widths:
//!
//! ```text
//!   F0 │ EF 03 │ EE 03 │ CC │ EB
//!   ok │ read  │credit │stk │stacked
//!      │ ch 3  │ ch 3  │    │
//!
//!   code ─► width table ─► consume 1 + width bytes ─► next code
//!   unknown code or short data ─► stop (logged), never guess
//! ```

pub mod bill_validator;
pub mod coin_handler;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use kiosk_core::{CurrencyCode, DeviceActivity, DeviceKind, HardwareFault, Money};

use crate::bus::BusHandle;
use crate::error::{SspError, SspResult};
use crate::packet::Frame;
use crate::protocol::{bill_event, coin_event, event, ResponseStatus};

// =============================================================================
// Driver Trait
// =============================================================================

/// Capabilities shared by the bill validator and the coin handler.
#[async_trait]
pub trait CashDevice: Send + Sync {
    fn kind(&self) -> DeviceKind;

    fn address(&self) -> u8;

    /// True once `initialize` completed and no reset was seen since.
    fn is_ready(&self) -> bool;

    /// Runs the full init sequence, ending with the device enabled.
    async fn initialize(&mut self) -> SspResult<()>;

    /// Starts accepting cash.
    async fn enable(&mut self) -> SspResult<()>;

    /// Stops accepting cash.
    async fn disable(&mut self) -> SspResult<()>;

    /// Asks the device to reboot. It comes back with a reset event.
    async fn reset(&mut self) -> SspResult<()>;

    /// Decodes one poll reply. A device reset in the reply triggers a
    /// re-initialization before this returns.
    async fn handle_incoming_events(&mut self, frame: &Frame) -> Vec<DeviceEvent>;
}

/// Sends a command and checks the generic status byte.
///
/// Returns the data after the status on `OK`.
pub(crate) async fn exchange(bus: &BusHandle, address: u8, payload: Vec<u8>) -> SspResult<Vec<u8>> {
    let opcode = payload.first().copied().unwrap_or_default();
    let frame = bus.send(address, payload).await?;

    match frame.status() {
        Some(ResponseStatus::Ok) => Ok(frame.data().to_vec()),
        Some(ResponseStatus::CannotProcess) => Err(SspError::CannotProcess {
            address,
            opcode,
            code: frame.data().first().copied(),
        }),
        Some(status) => Err(SspError::Rejected {
            address,
            opcode,
            status,
        }),
        None => Err(SspError::MalformedResponse {
            address,
            opcode,
            reason: format!("unknown status byte {:02X?}", frame.payload.first()),
        }),
    }
}

// =============================================================================
// Channel Table
// =============================================================================

/// Note value per validator channel. Channel numbers start at 1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelTable {
    values: Vec<Money>,
}

impl ChannelTable {
    pub fn new(values: Vec<Money>) -> Self {
        Self { values }
    }

    /// Value of `channel`, `None` for channel 0 or beyond the table.
    pub fn value(&self, channel: u8) -> Option<Money> {
        let index = usize::from(channel).checked_sub(1)?;
        self.values.get(index).copied().filter(|v| v.is_positive())
    }

    /// Replaces the value of an existing channel. Returns false if the
    /// channel is not in the table.
    pub fn set(&mut self, channel: u8, value: Money) -> bool {
        match usize::from(channel).checked_sub(1).and_then(|i| self.values.get_mut(i)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `(channel, value)` pairs in channel order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, Money)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(|(i, v)| ((i + 1) as u8, *v))
    }
}

// =============================================================================
// Device Events
// =============================================================================

/// Every poll event either device can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    // ── Shared ───────────────────────────────────────────────────────────
    /// The device rebooted. `reinitialized` is filled in by the driver.
    Reset { reinitialized: bool },
    /// Periodic status while disabled.
    Disabled,
    FraudAttempt { channel: Option<u8> },

    // ── Bill validator ───────────────────────────────────────────────────
    NoteRead { channel: u8 },
    /// A note was accepted. `value` is `None` for a channel the setup
    /// table does not map.
    NoteCredit { channel: u8, value: Option<Money> },
    NoteRejecting,
    NoteRejected,
    NoteStacking,
    NoteStacked,
    NoteJam { safe: bool },
    StackerFull,
    NoteClearedFromFront { channel: u8 },
    NoteClearedIntoCashbox { channel: u8 },
    CashboxRemoved,
    CashboxReplaced,

    // ── Coin handler ─────────────────────────────────────────────────────
    /// Value added since the last poll, one per currency.
    CoinCredit { value: Money, currency: CurrencyCode },
    CoinAccepted { value: Money, currency: CurrencyCode },
    PayInActive,
    CoinRejected,
    Dispensing { value: Money },
    Dispensed { value: Money },
    CoinsLow,
    DeviceFull,
    CoinJam,
    PayoutTimeout,
    IncompletePayout { paid: Money, requested: Money },
}

impl DeviceEvent {
    /// Money this event credits, if it is a credit.
    pub fn credit(&self) -> Option<Money> {
        match self {
            DeviceEvent::NoteCredit { value, .. } => *value,
            DeviceEvent::CoinCredit { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Currency reported with a coin credit.
    pub fn currency(&self) -> Option<CurrencyCode> {
        match self {
            DeviceEvent::CoinCredit { currency, .. } | DeviceEvent::CoinAccepted { currency, .. } => {
                Some(*currency)
            }
            _ => None,
        }
    }

    /// The operator-facing fault this event signals, if any.
    pub fn fault(&self) -> Option<HardwareFault> {
        let fault = match self {
            DeviceEvent::NoteJam { safe } => HardwareFault::Jam { safe: *safe },
            DeviceEvent::CoinJam => HardwareFault::Jam { safe: false },
            DeviceEvent::StackerFull => HardwareFault::StackerFull,
            DeviceEvent::CoinsLow => HardwareFault::CoinsLow,
            DeviceEvent::FraudAttempt { .. } => HardwareFault::Fraud,
            DeviceEvent::DeviceFull => HardwareFault::DeviceFull,
            DeviceEvent::CashboxRemoved => HardwareFault::CashboxRemoved,
            DeviceEvent::IncompletePayout { paid, requested } => HardwareFault::IncompletePayout {
                paid: *paid,
                requested: *requested,
            },
            DeviceEvent::NoteCredit {
                channel,
                value: None,
            } => HardwareFault::UnmappedChannel { channel: *channel },
            _ => return None,
        };
        Some(fault)
    }

    /// Informational progress, if this is neither a credit nor a fault.
    pub fn activity(&self) -> Option<DeviceActivity> {
        let activity = match self {
            DeviceEvent::NoteRead { channel } => DeviceActivity::NoteReading { channel: *channel },
            DeviceEvent::NoteRejecting => DeviceActivity::NoteRejecting,
            DeviceEvent::NoteRejected => DeviceActivity::NoteRejected,
            DeviceEvent::NoteStacking => DeviceActivity::NoteStacking,
            DeviceEvent::NoteStacked => DeviceActivity::NoteStacked,
            DeviceEvent::NoteClearedFromFront { channel } => {
                DeviceActivity::NoteClearedFromFront { channel: *channel }
            }
            DeviceEvent::NoteClearedIntoCashbox { channel } => {
                DeviceActivity::NoteClearedIntoCashbox { channel: *channel }
            }
            DeviceEvent::CashboxReplaced => DeviceActivity::CashboxReplaced,
            DeviceEvent::PayInActive => DeviceActivity::CoinEntering,
            DeviceEvent::CoinRejected => DeviceActivity::CoinRejected,
            DeviceEvent::CoinAccepted { value, .. } => DeviceActivity::CoinAccepted { value: *value },
            DeviceEvent::Dispensing { value } => DeviceActivity::Dispensing { value: *value },
            DeviceEvent::Dispensed { value } => DeviceActivity::Dispensed { value: *value },
            DeviceEvent::PayoutTimeout => DeviceActivity::PayoutTimeout,
            _ => return None,
        };
        Some(activity)
    }
}

// =============================================================================
// Event Decoding
// =============================================================================

/// Data bytes following a bill validator event code, `None` if unknown.
fn bill_event_width(code: u8) -> Option<usize> {
    match code {
        bill_event::READ_NOTE
        | bill_event::CREDIT_NOTE
        | event::FRAUD_ATTEMPT
        | bill_event::NOTE_CLEARED_FROM_FRONT
        | bill_event::NOTE_CLEARED_TO_CASHBOX => Some(1),
        event::SLAVE_RESET
        | event::DISABLED
        | bill_event::NOTE_REJECTING
        | bill_event::NOTE_REJECTED
        | bill_event::NOTE_STACKING
        | bill_event::NOTE_STACKED
        | bill_event::SAFE_NOTE_JAM
        | bill_event::UNSAFE_NOTE_JAM
        | bill_event::STACKER_FULL
        | bill_event::CASHBOX_REMOVED
        | bill_event::CASHBOX_REPLACED => Some(0),
        _ => None,
    }
}

/// Walks a bill validator poll reply (data after the status byte).
pub fn decode_bill_events(data: &[u8], channels: &ChannelTable) -> Vec<DeviceEvent> {
    let mut events = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let code = data[i];
        let Some(width) = bill_event_width(code) else {
            warn!(code = %format!("0x{:02X}", code), offset = i, "Unknown bill validator event, dropping rest of poll");
            break;
        };
        if i + 1 + width > data.len() {
            warn!(code = %format!("0x{:02X}", code), offset = i, "Truncated bill validator event");
            break;
        }
        let arg = data.get(i + 1).copied().unwrap_or_default();

        let decoded = match code {
            event::SLAVE_RESET => DeviceEvent::Reset { reinitialized: false },
            event::DISABLED => DeviceEvent::Disabled,
            event::FRAUD_ATTEMPT => DeviceEvent::FraudAttempt { channel: Some(arg) },
            bill_event::READ_NOTE => DeviceEvent::NoteRead { channel: arg },
            bill_event::CREDIT_NOTE => DeviceEvent::NoteCredit {
                channel: arg,
                value: channels.value(arg),
            },
            bill_event::NOTE_REJECTING => DeviceEvent::NoteRejecting,
            bill_event::NOTE_REJECTED => DeviceEvent::NoteRejected,
            bill_event::NOTE_STACKING => DeviceEvent::NoteStacking,
            bill_event::NOTE_STACKED => DeviceEvent::NoteStacked,
            bill_event::SAFE_NOTE_JAM => DeviceEvent::NoteJam { safe: true },
            bill_event::UNSAFE_NOTE_JAM => DeviceEvent::NoteJam { safe: false },
            bill_event::STACKER_FULL => DeviceEvent::StackerFull,
            bill_event::NOTE_CLEARED_FROM_FRONT => DeviceEvent::NoteClearedFromFront { channel: arg },
            bill_event::NOTE_CLEARED_TO_CASHBOX => DeviceEvent::NoteClearedIntoCashbox { channel: arg },
            bill_event::CASHBOX_REMOVED => DeviceEvent::CashboxRemoved,
            _ => DeviceEvent::CashboxReplaced,
        };
        events.push(decoded);
        i += 1 + width;
    }

    events
}

/// Data bytes following a coin handler event code, `None` if unknown.
/// VALUE_ADDED is variable and sized from its count byte.
fn coin_event_width(code: u8, rest: &[u8]) -> Option<usize> {
    match code {
        coin_event::VALUE_ADDED => rest.first().map(|&n| 1 + usize::from(n) * 7).or(Some(1)),
        coin_event::DISPENSING | coin_event::DISPENSED | coin_event::COIN_CREDIT => Some(7),
        coin_event::INCOMPLETE_PAYOUT => Some(11),
        event::SLAVE_RESET
        | event::DISABLED
        | event::FRAUD_ATTEMPT
        | coin_event::PAY_IN_ACTIVE
        | coin_event::COIN_REJECTED
        | coin_event::COINS_LOW
        | coin_event::DEVICE_FULL
        | coin_event::JAMMED
        | coin_event::TIMEOUT => Some(0),
        _ => None,
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(word)
}

fn read_currency(bytes: &[u8], at: usize) -> CurrencyCode {
    let mut code = [0u8; 3];
    code.copy_from_slice(&bytes[at..at + 3]);
    CurrencyCode::from_bytes(code)
}

/// Walks a coin handler poll reply (data after the status byte).
pub fn decode_coin_events(data: &[u8]) -> Vec<DeviceEvent> {
    let mut events = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let code = data[i];
        let Some(width) = coin_event_width(code, &data[i + 1..]) else {
            warn!(code = %format!("0x{:02X}", code), offset = i, "Unknown coin handler event, dropping rest of poll");
            break;
        };
        if i + 1 + width > data.len() {
            warn!(code = %format!("0x{:02X}", code), offset = i, "Truncated coin handler event");
            break;
        }
        let body = &data[i + 1..i + 1 + width];

        match code {
            coin_event::VALUE_ADDED => {
                for entry in body[1..].chunks_exact(7) {
                    events.push(DeviceEvent::CoinCredit {
                        value: Money::from_device_value(read_u32(entry, 0)),
                        currency: read_currency(entry, 4),
                    });
                }
            }
            coin_event::COIN_CREDIT => events.push(DeviceEvent::CoinAccepted {
                value: Money::from_device_value(read_u32(body, 0)),
                currency: read_currency(body, 4),
            }),
            coin_event::DISPENSING => events.push(DeviceEvent::Dispensing {
                value: Money::from_device_value(read_u32(body, 0)),
            }),
            coin_event::DISPENSED => events.push(DeviceEvent::Dispensed {
                value: Money::from_device_value(read_u32(body, 0)),
            }),
            coin_event::INCOMPLETE_PAYOUT => events.push(DeviceEvent::IncompletePayout {
                paid: Money::from_device_value(read_u32(body, 0)),
                requested: Money::from_device_value(read_u32(body, 4)),
            }),
            event::SLAVE_RESET => events.push(DeviceEvent::Reset { reinitialized: false }),
            event::DISABLED => events.push(DeviceEvent::Disabled),
            event::FRAUD_ATTEMPT => events.push(DeviceEvent::FraudAttempt { channel: None }),
            coin_event::PAY_IN_ACTIVE => events.push(DeviceEvent::PayInActive),
            coin_event::COIN_REJECTED => events.push(DeviceEvent::CoinRejected),
            coin_event::COINS_LOW => events.push(DeviceEvent::CoinsLow),
            coin_event::DEVICE_FULL => events.push(DeviceEvent::DeviceFull),
            coin_event::JAMMED => events.push(DeviceEvent::CoinJam),
            _ => events.push(DeviceEvent::PayoutTimeout),
        }
        i += 1 + width;
    }

    events
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn euro_notes() -> ChannelTable {
        ChannelTable::new(vec![
            Money::from_cents(500),
            Money::from_cents(1000),
            Money::from_cents(2000),
        ])
    }

    fn eur() -> CurrencyCode {
        CurrencyCode::from_bytes(*b"EUR")
    }

    #[test]
    fn test_channel_table_lookup() {
        let mut table = euro_notes();
        assert_eq!(table.value(0), None);
        assert_eq!(table.value(1), Some(Money::from_cents(500)));
        assert_eq!(table.value(3), Some(Money::from_cents(2000)));
        assert_eq!(table.value(4), None);

        assert!(table.set(2, Money::from_cents(1500)));
        assert!(!table.set(9, Money::from_cents(100)));
        assert_eq!(table.value(2), Some(Money::from_cents(1500)));
    }

    #[test]
    fn test_bill_read_then_credit_in_one_poll() {
        let events = decode_bill_events(&[0xEF, 0x02, 0xEE, 0x02, 0xCC, 0xEB], &euro_notes());
        assert_eq!(
            events,
            vec![
                DeviceEvent::NoteRead { channel: 2 },
                DeviceEvent::NoteCredit {
                    channel: 2,
                    value: Some(Money::from_cents(1000))
                },
                DeviceEvent::NoteStacking,
                DeviceEvent::NoteStacked,
            ]
        );
        assert_eq!(events[1].credit(), Some(Money::from_cents(1000)));
    }

    #[test]
    fn test_bill_data_byte_is_not_read_as_code() {
        // Channel 0xCC must not be mistaken for NOTE_STACKING.
        let events = decode_bill_events(&[0xEF, 0xCC, 0xE8], &euro_notes());
        assert_eq!(
            events,
            vec![DeviceEvent::NoteRead { channel: 0xCC }, DeviceEvent::Disabled]
        );
    }

    #[test]
    fn test_bill_unmapped_channel_is_fault() {
        let events = decode_bill_events(&[0xEE, 0x09], &euro_notes());
        assert_eq!(events[0].credit(), None);
        assert_eq!(events[0].fault(), Some(HardwareFault::UnmappedChannel { channel: 9 }));
    }

    #[test]
    fn test_bill_unknown_code_stops_walk() {
        let events = decode_bill_events(&[0xCC, 0x42, 0xEB], &euro_notes());
        assert_eq!(events, vec![DeviceEvent::NoteStacking]);
    }

    #[test]
    fn test_bill_truncated_event_stops_walk() {
        let events = decode_bill_events(&[0xEB, 0xEE], &euro_notes());
        assert_eq!(events, vec![DeviceEvent::NoteStacked]);
    }

    #[test]
    fn test_bill_faults_and_reset() {
        let events = decode_bill_events(&[0xF1, 0xEA, 0xE9, 0xE7, 0xE6, 0x01, 0xE3, 0xE4], &euro_notes());
        assert_eq!(events[0], DeviceEvent::Reset { reinitialized: false });
        assert_eq!(events[1].fault(), Some(HardwareFault::Jam { safe: true }));
        assert_eq!(events[2].fault(), Some(HardwareFault::Jam { safe: false }));
        assert_eq!(events[3].fault(), Some(HardwareFault::StackerFull));
        assert_eq!(events[4].fault(), Some(HardwareFault::Fraud));
        assert_eq!(events[5].fault(), Some(HardwareFault::CashboxRemoved));
        assert_eq!(events[6].activity(), Some(DeviceActivity::CashboxReplaced));
    }

    #[test]
    fn test_coin_value_added_batches_currencies() {
        let mut data = vec![0xBF, 0x02];
        data.extend_from_slice(&100u32.to_le_bytes());
        data.extend_from_slice(b"EUR");
        data.extend_from_slice(&50u32.to_le_bytes());
        data.extend_from_slice(b"GBP");
        data.push(0xD3);

        let events = decode_coin_events(&data);
        assert_eq!(
            events,
            vec![
                DeviceEvent::CoinCredit {
                    value: Money::from_cents(100),
                    currency: eur()
                },
                DeviceEvent::CoinCredit {
                    value: Money::from_cents(50),
                    currency: CurrencyCode::from_bytes(*b"GBP")
                },
                DeviceEvent::CoinsLow,
            ]
        );
        assert_eq!(events[0].currency(), Some(eur()));
    }

    #[test]
    fn test_coin_payout_events() {
        let mut data = vec![0xDA];
        data.extend_from_slice(&20u32.to_le_bytes());
        data.extend_from_slice(b"EUR");
        data.push(0xDC);
        data.extend_from_slice(&30u32.to_le_bytes());
        data.extend_from_slice(&50u32.to_le_bytes());
        data.extend_from_slice(b"EUR");
        data.push(0xD9);

        let events = decode_coin_events(&data);
        assert_eq!(events[0].activity(), Some(DeviceActivity::Dispensing { value: Money::from_cents(20) }));
        assert_eq!(
            events[1].fault(),
            Some(HardwareFault::IncompletePayout {
                paid: Money::from_cents(30),
                requested: Money::from_cents(50)
            })
        );
        assert_eq!(events[2], DeviceEvent::PayoutTimeout);
    }

    #[test]
    fn test_coin_accepted_is_not_credit() {
        let mut data = vec![0xDF];
        data.extend_from_slice(&200u32.to_le_bytes());
        data.extend_from_slice(b"EUR");

        let events = decode_coin_events(&data);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].credit(), None);
        assert_eq!(
            events[0].activity(),
            Some(DeviceActivity::CoinAccepted { value: Money::from_cents(200) })
        );
    }

    #[test]
    fn test_coin_truncated_value_added_stops_walk() {
        // Claims two totals but carries one.
        let mut data = vec![0xD4, 0xBF, 0x02];
        data.extend_from_slice(&100u32.to_le_bytes());
        data.extend_from_slice(b"EUR");

        assert_eq!(decode_coin_events(&data), vec![DeviceEvent::DeviceFull]);
    }

    #[test]
    fn test_coin_unknown_code_stops_walk() {
        assert_eq!(decode_coin_events(&[0xC1, 0x77, 0xBA]), vec![DeviceEvent::PayInActive]);
    }
}
