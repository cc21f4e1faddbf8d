//! # Coin Handler Driver
//!
//! Coin acceptor with payout reservoir at address 0x10.
//!
//! ## Init Sequence
//! ```text
//!  SYNC ─► HOST_PROTOCOL (v) ─► SETUP_REQUEST
//!                                    │ denominations (value + country)
//!                                    ▼
//!  for each denomination:  SET_DENOMINATION_ROUTE (payout | cashbox)
//!  for each denomination:  SET_COIN_MECH_INHIBITS (accept)
//!                                    ▼
//!                    SET_OPTIONS (level check, speed) ─► ENABLE
//! ```
//!
//! ## Payout
//! `PAYOUT_AMOUNT` lets the device choose the coin mix. A refusal comes back
//! as `CANNOT_PROCESS` plus a reason byte, mapped to [`PayoutError`].

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use kiosk_core::{CurrencyCode, DeviceKind, Money};

use super::{decode_coin_events, exchange, CashDevice, DeviceEvent};
use crate::bus::BusHandle;
use crate::error::{SspError, SspResult};
use crate::packet::Frame;
use crate::protocol::{command, payout_option, route, COIN_HANDLER_ADDRESS, DEFAULT_PROTOCOL_VERSION};

/// SET_OPTIONS register 0 bits.
const OPTION_LEVEL_CHECK: u8 = 0x02;
const OPTION_HIGH_SPEED: u8 = 0x04;

/// SET_OPTIONS register 1: report rejected coins, value-based coin reporting.
const OPTIONS_REG1: u8 = 0x11;

/// Bytes per entry in a GET_ALL_LEVELS reply.
const LEVEL_ENTRY_LEN: usize = 9;

// =============================================================================
// Payout Errors
// =============================================================================

/// Why a payout did not happen.
#[derive(Debug, Clone, Error)]
pub enum PayoutError {
    #[error("Not enough value stored to pay out")]
    InsufficientValue,

    #[error("Cannot pay the exact amount with the coins stored")]
    CannotPayExact,

    #[error("Coin handler busy")]
    Busy,

    #[error("Coin handler disabled")]
    Disabled,

    #[error("Payout refused with code {0}")]
    Unknown(u8),

    #[error("Invalid payout amount: {0}")]
    InvalidAmount(Money),

    #[error(transparent)]
    Bus(#[from] SspError),
}

impl PayoutError {
    /// Maps the CANNOT_PROCESS reason byte.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => PayoutError::InsufficientValue,
            2 => PayoutError::CannotPayExact,
            3 => PayoutError::Busy,
            4 => PayoutError::Disabled,
            other => PayoutError::Unknown(other),
        }
    }
}

// =============================================================================
// Options and Setup
// =============================================================================

/// Driver settings.
#[derive(Debug, Clone)]
pub struct CoinHandlerOptions {
    pub protocol_version: u8,
    pub currency: CurrencyCode,
    /// Denominations routed to the cashbox instead of the payout reservoir.
    pub cashbox_denominations: Vec<Money>,
    pub level_check: bool,
    pub high_speed: bool,
    /// Send payouts with the test option: the device checks but keeps coins.
    pub dry_run_payouts: bool,
}

impl Default for CoinHandlerOptions {
    fn default() -> Self {
        Self {
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            currency: CurrencyCode::from_bytes(*b"EUR"),
            cashbox_denominations: Vec::new(),
            level_check: true,
            high_speed: true,
            dry_run_payouts: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Denomination {
    pub value: Money,
    pub currency: CurrencyCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoinSetup {
    pub unit_type: u8,
    pub firmware: String,
    pub country: CurrencyCode,
    pub protocol_version: u8,
    pub denominations: Vec<Denomination>,
}

/// Stored coin count for one denomination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoinLevel {
    pub count: u16,
    pub value: Money,
    pub currency: CurrencyCode,
}

fn malformed(opcode: u8, reason: impl Into<String>) -> SspError {
    SspError::MalformedResponse {
        address: COIN_HANDLER_ADDRESS,
        opcode,
        reason: reason.into(),
    }
}

/// Bytes per expanded denomination entry: value (u32 LE) then country.
const SETUP_ENTRY_LEN: usize = 7;

/// Parses the SETUP_REQUEST data.
///
/// ```text
///  [0] unit type  [1..5] firmware  [5..8] country  [8..11] multiplier  [11] n
///  [12..12+n] values (1 byte)  [12+n..12+2n] security  [12+2n..15+2n] multiplier
///  [15+2n] protocol
///  [16+2n..] n × (value u32 LE, country 3 bytes)
/// ```
///
/// Only the expanded entries carry usable coin values; the one-byte values
/// and multipliers are skipped.
pub fn parse_coin_setup(data: &[u8]) -> SspResult<CoinSetup> {
    if data.len() < 12 {
        return Err(malformed(command::SETUP_REQUEST, format!("setup reply of {} bytes", data.len())));
    }
    let n = usize::from(data[11]);
    let entries_start = 16 + 2 * n;
    let needed = entries_start + SETUP_ENTRY_LEN * n;
    if data.len() < needed {
        return Err(malformed(
            command::SETUP_REQUEST,
            format!("{} denominations need {} bytes, got {}", n, needed, data.len()),
        ));
    }

    let denominations = data[entries_start..needed]
        .chunks_exact(SETUP_ENTRY_LEN)
        .map(|e| Denomination {
            value: Money::from_device_value(u32::from_le_bytes([e[0], e[1], e[2], e[3]])),
            currency: CurrencyCode::from_bytes([e[4], e[5], e[6]]),
        })
        .collect();

    Ok(CoinSetup {
        unit_type: data[0],
        firmware: String::from_utf8_lossy(&data[1..5]).trim().to_string(),
        country: CurrencyCode::from_bytes([data[5], data[6], data[7]]),
        protocol_version: data[15 + 2 * n],
        denominations,
    })
}

/// SET_DENOMINATION_ROUTE: route, value (u32 LE), country.
fn route_payload(denomination: &Denomination, route: u8) -> SspResult<Vec<u8>> {
    let value = denomination.value.to_device_value().ok_or_else(|| {
        SspError::InvalidArgument(format!("{} does not fit a route value", denomination.value))
    })?;
    let mut payload = vec![command::SET_DENOMINATION_ROUTE, route];
    payload.extend_from_slice(&value.to_le_bytes());
    payload.extend_from_slice(&denomination.currency.as_bytes());
    Ok(payload)
}

/// SET_COIN_MECH_INHIBITS with the accept bit: value (u16 LE), country.
fn accept_payload(denomination: &Denomination) -> SspResult<Vec<u8>> {
    let value = u16::try_from(denomination.value.cents()).map_err(|_| {
        SspError::InvalidArgument(format!("{} does not fit a coin mech value", denomination.value))
    })?;
    let mut payload = vec![command::SET_COIN_MECH_INHIBITS, 0x01];
    payload.extend_from_slice(&value.to_le_bytes());
    payload.extend_from_slice(&denomination.currency.as_bytes());
    Ok(payload)
}

/// Parses a GET_ALL_LEVELS reply: n, then n × (count u16, value u32, country).
pub fn parse_levels(data: &[u8]) -> SspResult<Vec<CoinLevel>> {
    let n = usize::from(*data.first().ok_or_else(|| malformed(command::GET_ALL_LEVELS, "empty reply"))?);
    let body = &data[1..];
    if body.len() < n * LEVEL_ENTRY_LEN {
        return Err(malformed(
            command::GET_ALL_LEVELS,
            format!("{} levels need {} bytes, got {}", n, n * LEVEL_ENTRY_LEN, body.len()),
        ));
    }

    Ok(body
        .chunks_exact(LEVEL_ENTRY_LEN)
        .take(n)
        .map(|e| CoinLevel {
            count: u16::from_le_bytes([e[0], e[1]]),
            value: Money::from_device_value(u32::from_le_bytes([e[2], e[3], e[4], e[5]])),
            currency: CurrencyCode::from_bytes([e[6], e[7], e[8]]),
        })
        .collect())
}

// =============================================================================
// Driver
// =============================================================================

pub struct CoinHandler {
    bus: BusHandle,
    options: CoinHandlerOptions,
    ready: bool,
    setup: Option<CoinSetup>,
}

impl CoinHandler {
    pub fn new(bus: BusHandle, options: CoinHandlerOptions) -> Self {
        Self {
            bus,
            options,
            ready: false,
            setup: None,
        }
    }

    pub fn setup(&self) -> Option<&CoinSetup> {
        self.setup.as_ref()
    }

    /// Denominations in the configured currency, as accepted at init.
    pub fn denominations(&self) -> Vec<Denomination> {
        self.setup
            .as_ref()
            .map(|s| {
                s.denominations
                    .iter()
                    .copied()
                    .filter(|d| d.currency == self.options.currency)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Dispenses `amount`; the device picks the coins.
    pub async fn payout_amount(&mut self, amount: Money) -> Result<(), PayoutError> {
        self.ensure_ready()?;
        let value = amount
            .to_device_value()
            .filter(|v| *v > 0)
            .ok_or(PayoutError::InvalidAmount(amount))?;

        let option = if self.options.dry_run_payouts {
            payout_option::TEST
        } else {
            payout_option::EXECUTE
        };
        let mut payload = vec![command::PAYOUT_AMOUNT];
        payload.extend_from_slice(&value.to_le_bytes());
        payload.extend_from_slice(&self.options.currency.as_bytes());
        payload.push(option);

        info!(amount = %amount, dry_run = self.options.dry_run_payouts, "Paying out");
        match self.command(payload).await {
            Ok(_) => Ok(()),
            Err(SspError::CannotProcess { code, .. }) => {
                let err = PayoutError::from_code(code.unwrap_or_default());
                warn!(amount = %amount, error = %err, "Payout refused");
                Err(err)
            }
            Err(e) => Err(PayoutError::Bus(e)),
        }
    }

    /// Coins stored per denomination.
    pub async fn levels(&self) -> SspResult<Vec<CoinLevel>> {
        self.ensure_ready()?;
        let data = self.command(vec![command::GET_ALL_LEVELS]).await?;
        parse_levels(&data)
    }

    fn ensure_ready(&self) -> SspResult<()> {
        if self.ready {
            Ok(())
        } else {
            Err(SspError::DeviceNotReady {
                address: COIN_HANDLER_ADDRESS,
            })
        }
    }

    async fn command(&self, payload: Vec<u8>) -> SspResult<Vec<u8>> {
        exchange(&self.bus, COIN_HANDLER_ADDRESS, payload).await
    }

    fn options_payload(&self) -> Vec<u8> {
        let mut reg0 = 0;
        if self.options.level_check {
            reg0 |= OPTION_LEVEL_CHECK;
        }
        if self.options.high_speed {
            reg0 |= OPTION_HIGH_SPEED;
        }
        vec![command::SET_OPTIONS, reg0, OPTIONS_REG1]
    }

    async fn run_init_sequence(&mut self) -> SspResult<()> {
        self.command(vec![command::SYNC]).await?;
        debug!("Coin handler SYNC ok");

        self.command(vec![command::HOST_PROTOCOL_VERSION, self.options.protocol_version])
            .await?;

        let data = self.command(vec![command::SETUP_REQUEST]).await?;
        let setup = parse_coin_setup(&data)?;
        info!(
            firmware = %setup.firmware,
            country = %setup.country,
            denominations = setup.denominations.len(),
            protocol = setup.protocol_version,
            "Coin handler setup"
        );

        let currency = self.options.currency;
        let accepted: Vec<Denomination> = setup
            .denominations
            .iter()
            .copied()
            .filter(|d| {
                let keep = d.currency == currency;
                if !keep {
                    warn!(value = %d.value, currency = %d.currency, "Skipping foreign denomination");
                }
                keep
            })
            .collect();
        self.setup = Some(setup);

        for denomination in &accepted {
            let route = if self.options.cashbox_denominations.contains(&denomination.value) {
                route::CASHBOX
            } else {
                route::PAYOUT
            };
            self.command(route_payload(denomination, route)?).await?;
        }
        debug!(count = accepted.len(), "Denomination routes set");

        for denomination in &accepted {
            self.command(accept_payload(denomination)?).await?;
        }

        self.command(self.options_payload()).await?;
        self.command(vec![command::ENABLE]).await?;
        Ok(())
    }
}

#[async_trait]
impl CashDevice for CoinHandler {
    fn kind(&self) -> DeviceKind {
        DeviceKind::CoinHandler
    }

    fn address(&self) -> u8 {
        COIN_HANDLER_ADDRESS
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn initialize(&mut self) -> SspResult<()> {
        self.ready = false;
        match self.run_init_sequence().await {
            Ok(()) => {
                self.ready = true;
                info!("Coin handler ready");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Coin handler initialization failed");
                Err(e)
            }
        }
    }

    async fn enable(&mut self) -> SspResult<()> {
        self.ensure_ready()?;
        self.command(vec![command::ENABLE]).await?;
        debug!("Coin handler enabled");
        Ok(())
    }

    async fn disable(&mut self) -> SspResult<()> {
        self.ensure_ready()?;
        self.command(vec![command::DISABLE]).await?;
        debug!("Coin handler disabled");
        Ok(())
    }

    async fn reset(&mut self) -> SspResult<()> {
        self.command(vec![command::RESET]).await?;
        self.ready = false;
        info!("Coin handler reset requested");
        Ok(())
    }

    async fn handle_incoming_events(&mut self, frame: &Frame) -> Vec<DeviceEvent> {
        let mut events = decode_coin_events(frame.data());

        if events.iter().any(|e| matches!(e, DeviceEvent::Reset { .. })) {
            warn!("Coin handler reset itself, re-initializing");
            let reinitialized = self.initialize().await.is_ok();
            for event in events.iter_mut() {
                if let DeviceEvent::Reset { reinitialized: slot } = event {
                    *slot = reinitialized;
                }
            }
        }

        events
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, BusConfig};
    use crate::sim::{coin_setup_response, SimBus, SimDevice};

    async fn ready_handler(sim: &SimBus, options: CoinHandlerOptions) -> CoinHandler {
        let (bus, _polls) = Bus::spawn(sim.link(), BusConfig::default());
        let mut handler = CoinHandler::new(bus, options);
        handler.initialize().await.unwrap();
        handler
    }

    #[test]
    fn test_parse_setup() {
        let reply = coin_setup_response(&[(10, "EUR"), (200, "EUR"), (25, "USD")], 7);
        let setup = parse_coin_setup(&reply[1..]).unwrap();
        assert_eq!(setup.firmware, "0620");
        assert_eq!(setup.protocol_version, 7);
        assert_eq!(setup.denominations.len(), 3);
        assert_eq!(setup.denominations[1].value, Money::from_cents(200));
        assert_eq!(setup.denominations[2].currency.as_str(), "USD");
    }

    #[test]
    fn test_parse_setup_rejects_short_reply() {
        let reply = coin_setup_response(&[(10, "EUR"), (20, "EUR")], 8);
        assert!(parse_coin_setup(&reply[1..reply.len() - 2]).is_err());
    }

    #[test]
    fn test_parse_setup_reads_expanded_entries() {
        // Two channels: 0.50 EUR and 2.00 EUR, protocol 7.
        let data = vec![
            0x09, b'0', b'6', b'2', b'0', b'E', b'U', b'R', 0x00, 0x00, 0x01, 0x02,
            0x32, 0xC8, // one-byte values
            0x02, 0x02, // security
            0x00, 0x00, 0x01, // multiplier
            0x07, // protocol
            0x32, 0x00, 0x00, 0x00, b'E', b'U', b'R',
            0xC8, 0x00, 0x00, 0x00, b'E', b'U', b'R',
        ];
        let setup = parse_coin_setup(&data).unwrap();
        assert_eq!(setup.unit_type, 0x09);
        assert_eq!(setup.country.as_str(), "EUR");
        assert_eq!(setup.protocol_version, 7);
        assert_eq!(
            setup.denominations,
            vec![
                Denomination { value: Money::from_cents(50), currency: CurrencyCode::from_bytes(*b"EUR") },
                Denomination { value: Money::from_cents(200), currency: CurrencyCode::from_bytes(*b"EUR") },
            ]
        );
        assert!(parse_coin_setup(&data[..data.len() - 1]).is_err());
        assert!(parse_coin_setup(&data[..11]).is_err());
    }

    #[test]
    fn test_accept_payload_rejects_values_beyond_u16() {
        let coin = Denomination {
            value: Money::from_cents(100),
            currency: CurrencyCode::from_bytes(*b"EUR"),
        };
        assert_eq!(accept_payload(&coin).unwrap(), vec![0x40, 0x01, 100, 0, b'E', b'U', b'R']);

        let oversized = Denomination { value: Money::from_cents(70_000), ..coin };
        assert!(matches!(accept_payload(&oversized), Err(SspError::InvalidArgument(_))));
        assert_eq!(route_payload(&oversized, route::PAYOUT).unwrap()[2..6], 70_000u32.to_le_bytes());
    }

    #[test]
    fn test_parse_levels() {
        let mut data = vec![0x02];
        data.extend_from_slice(&12u16.to_le_bytes());
        data.extend_from_slice(&50u32.to_le_bytes());
        data.extend_from_slice(b"EUR");
        data.extend_from_slice(&3u16.to_le_bytes());
        data.extend_from_slice(&200u32.to_le_bytes());
        data.extend_from_slice(b"EUR");

        let levels = parse_levels(&data).unwrap();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].count, 12);
        assert_eq!(levels[1].value, Money::from_cents(200));
        assert!(parse_levels(&data[..10]).is_err());
        assert!(parse_levels(&[]).is_err());
    }

    #[test]
    fn test_payout_error_codes() {
        assert!(matches!(PayoutError::from_code(1), PayoutError::InsufficientValue));
        assert!(matches!(PayoutError::from_code(2), PayoutError::CannotPayExact));
        assert!(matches!(PayoutError::from_code(3), PayoutError::Busy));
        assert!(matches!(PayoutError::from_code(4), PayoutError::Disabled));
        assert!(matches!(PayoutError::from_code(9), PayoutError::Unknown(9)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_routes_and_enables_denominations() {
        let sim = SimBus::new();
        let device = SimDevice::coin_handler();
        sim.attach(device.clone());

        let options = CoinHandlerOptions {
            cashbox_denominations: vec![Money::from_cents(200)],
            ..Default::default()
        };
        let handler = ready_handler(&sim, options).await;
        assert!(handler.is_ready());

        let commands = device.commands();
        assert_eq!(&commands[..3], &[command::SYNC, command::HOST_PROTOCOL_VERSION, command::SETUP_REQUEST]);
        assert_eq!(&commands[3..8], &[command::SET_DENOMINATION_ROUTE; 5]);
        assert_eq!(&commands[8..13], &[command::SET_COIN_MECH_INHIBITS; 5]);
        assert_eq!(&commands[13..], &[command::SET_OPTIONS, command::ENABLE]);

        let routes = device.requests(command::SET_DENOMINATION_ROUTE);
        assert_eq!(routes[0], vec![0x3B, 0x00, 10, 0, 0, 0, b'E', b'U', b'R']);
        assert_eq!(routes[4], vec![0x3B, 0x01, 200, 0, 0, 0, b'E', b'U', b'R']);

        let inhibits = device.requests(command::SET_COIN_MECH_INHIBITS);
        assert_eq!(inhibits[3], vec![0x40, 0x01, 100, 0, b'E', b'U', b'R']);

        assert_eq!(device.requests(command::SET_OPTIONS), vec![vec![0x50, 0x06, 0x11]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_denominations_are_skipped() {
        let sim = SimBus::new();
        let device = SimDevice::new(COIN_HANDLER_ADDRESS);
        device.respond(
            command::SETUP_REQUEST,
            coin_setup_response(&[(10, "EUR"), (25, "USD"), (50, "EUR")], 8),
        );
        sim.attach(device.clone());

        let handler = ready_handler(&sim, CoinHandlerOptions::default()).await;
        assert_eq!(device.count(command::SET_DENOMINATION_ROUTE), 2);
        assert_eq!(device.count(command::SET_COIN_MECH_INHIBITS), 2);
        assert_eq!(handler.denominations().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_fails_on_denomination_beyond_coin_mech_range() {
        let sim = SimBus::new();
        let device = SimDevice::new(COIN_HANDLER_ADDRESS);
        device.respond(
            command::SETUP_REQUEST,
            coin_setup_response(&[(100, "EUR"), (70_000, "EUR")], 8),
        );
        sim.attach(device.clone());

        let (bus, _polls) = Bus::spawn(sim.link(), BusConfig::default());
        let mut handler = CoinHandler::new(bus, CoinHandlerOptions::default());
        let err = handler.initialize().await.unwrap_err();

        assert!(matches!(err, SspError::InvalidArgument(_)));
        assert!(!handler.is_ready());
        assert_eq!(device.count(command::SET_COIN_MECH_INHIBITS), 1);
        assert_eq!(device.count(command::ENABLE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_payout_payload() {
        let sim = SimBus::new();
        let device = SimDevice::coin_handler();
        sim.attach(device.clone());

        let mut handler = ready_handler(&sim, CoinHandlerOptions::default()).await;
        handler.payout_amount(Money::from_cents(50)).await.unwrap();

        assert_eq!(
            device.requests(command::PAYOUT_AMOUNT),
            vec![vec![0x33, 50, 0, 0, 0, b'E', b'U', b'R', 0x58]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_payout_uses_test_option() {
        let sim = SimBus::new();
        let device = SimDevice::coin_handler();
        sim.attach(device.clone());

        let options = CoinHandlerOptions {
            dry_run_payouts: true,
            ..Default::default()
        };
        let mut handler = ready_handler(&sim, options).await;
        handler.payout_amount(Money::from_cents(120)).await.unwrap();

        let request = &device.requests(command::PAYOUT_AMOUNT)[0];
        assert_eq!(request.last(), Some(&0x19));
    }

    #[tokio::test(start_paused = true)]
    async fn test_payout_refusal_maps_reason() {
        let sim = SimBus::new();
        let device = SimDevice::coin_handler();
        device.respond(command::PAYOUT_AMOUNT, vec![0xF5, 0x02]);
        sim.attach(device.clone());

        let mut handler = ready_handler(&sim, CoinHandlerOptions::default()).await;
        let err = handler.payout_amount(Money::from_cents(30)).await.unwrap_err();
        assert!(matches!(err, PayoutError::CannotPayExact));
    }

    #[tokio::test(start_paused = true)]
    async fn test_payout_rejects_non_positive_amount() {
        let sim = SimBus::new();
        let device = SimDevice::coin_handler();
        sim.attach(device.clone());

        let mut handler = ready_handler(&sim, CoinHandlerOptions::default()).await;
        assert!(matches!(
            handler.payout_amount(Money::zero()).await,
            Err(PayoutError::InvalidAmount(_))
        ));
        assert_eq!(device.count(command::PAYOUT_AMOUNT), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_payout_before_init_fails() {
        let sim = SimBus::new();
        sim.attach(SimDevice::coin_handler());
        let (bus, _polls) = Bus::spawn(sim.link(), BusConfig::default());
        let mut handler = CoinHandler::new(bus, CoinHandlerOptions::default());

        assert!(matches!(
            handler.payout_amount(Money::from_cents(10)).await,
            Err(PayoutError::Bus(SspError::DeviceNotReady { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_levels_query() {
        let sim = SimBus::new();
        let device = SimDevice::coin_handler();
        let mut reply = vec![0xF0, 0x01];
        reply.extend_from_slice(&7u16.to_le_bytes());
        reply.extend_from_slice(&100u32.to_le_bytes());
        reply.extend_from_slice(b"EUR");
        device.respond(command::GET_ALL_LEVELS, reply);
        sim.attach(device);

        let handler = ready_handler(&sim, CoinHandlerOptions::default()).await;
        let levels = handler.levels().await.unwrap();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].count, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_event_reinitializes() {
        let sim = SimBus::new();
        let device = SimDevice::coin_handler();
        sim.attach(device.clone());

        let mut handler = ready_handler(&sim, CoinHandlerOptions::default()).await;
        device.clear_received();

        let frame = Frame {
            address: COIN_HANDLER_ADDRESS,
            sequence_bit: true,
            payload: vec![0xF0, 0xF1, 0xD3],
            valid: true,
        };
        let events = handler.handle_incoming_events(&frame).await;
        assert_eq!(
            events,
            vec![DeviceEvent::Reset { reinitialized: true }, DeviceEvent::CoinsLow]
        );
        assert_eq!(device.count(command::SYNC), 1);
        assert_eq!(device.count(command::ENABLE), 1);
    }
}
