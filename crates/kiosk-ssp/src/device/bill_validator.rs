//! # Bill Validator Driver
//!
//! Banknote validator at address 0x00.
//!
//! ## Init Sequence
//! ```text
//! ┌──────┐   ┌───────────────────┐   ┌───────────────┐   ┌──────────────┐   ┌────────┐
//! │ SYNC │──►│ HOST_PROTOCOL (v) │──►│ SETUP_REQUEST │──►│ SET_INHIBITS │──►│ ENABLE │
//! └──────┘   └───────────────────┘   └───────┬───────┘   └──────────────┘   └────────┘
//!                                            │
//!                               channel table (value per channel)
//!                               + configured overrides
//! ```
//!
//! ## SETUP_REQUEST Reply (after status)
//! ```text
//!  [0]        unit type
//!  [1..5]     firmware (ASCII)
//!  [5..8]     country code
//!  [8..11]    value multiplier
//!  [11]       n = number of channels
//!  [12..12+n] channel values
//!  [+n]       channel security levels
//!  [+3]       real value multiplier (big endian)
//!  [+1]       protocol version
//!  protocol >= 6: n × 3 country codes, then n × 4 expanded values (LE)
//! ```

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use kiosk_core::{CurrencyCode, DeviceKind, Money};

use super::{decode_bill_events, exchange, CashDevice, ChannelTable, DeviceEvent};
use crate::bus::BusHandle;
use crate::error::{SspError, SspResult};
use crate::packet::Frame;
use crate::protocol::{command, BILL_VALIDATOR_ADDRESS, DEFAULT_PROTOCOL_VERSION};

/// Driver settings.
#[derive(Debug, Clone)]
pub struct BillValidatorOptions {
    pub protocol_version: u8,
    pub currency: CurrencyCode,
    /// `(channel, value)` pairs replacing what the device reports.
    pub channel_overrides: Vec<(u8, Money)>,
}

impl Default for BillValidatorOptions {
    fn default() -> Self {
        Self {
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            currency: CurrencyCode::from_bytes(*b"EUR"),
            channel_overrides: Vec::new(),
        }
    }
}

/// What the validator reported during setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillSetup {
    pub unit_type: u8,
    pub firmware: String,
    pub country: CurrencyCode,
    pub protocol_version: u8,
    pub real_multiplier: u32,
    pub channels: ChannelTable,
}

// =============================================================================
// Setup Parsing
// =============================================================================

fn malformed(reason: impl Into<String>) -> SspError {
    SspError::MalformedResponse {
        address: BILL_VALIDATOR_ADDRESS,
        opcode: command::SETUP_REQUEST,
        reason: reason.into(),
    }
}

/// Parses the SETUP_REQUEST data into a channel table.
///
/// A channel's value is its expanded value when present and non-zero,
/// otherwise its one-byte value, times the real multiplier (0 counts as 1).
pub fn parse_bill_setup(data: &[u8]) -> SspResult<BillSetup> {
    if data.len() < 12 {
        return Err(malformed(format!("setup reply of {} bytes", data.len())));
    }
    let n = usize::from(data[11]);
    let fixed_len = 16 + 2 * n;
    if data.len() < fixed_len {
        return Err(malformed(format!(
            "{} channels need {} bytes, got {}",
            n,
            fixed_len,
            data.len()
        )));
    }

    let firmware = String::from_utf8_lossy(&data[1..5]).trim().to_string();
    let country = CurrencyCode::from_bytes([data[5], data[6], data[7]]);
    let channel_values = &data[12..12 + n];
    let real_multiplier = u32::from_be_bytes([0, data[12 + 2 * n], data[13 + 2 * n], data[14 + 2 * n]]);
    let protocol_version = data[15 + 2 * n];

    let expanded_start = 16 + 5 * n;
    let expanded: Option<&[u8]> = if protocol_version >= 6 && data.len() >= expanded_start + 4 * n {
        Some(&data[expanded_start..expanded_start + 4 * n])
    } else {
        None
    };

    let multiplier = real_multiplier.max(1);
    let values = channel_values
        .iter()
        .enumerate()
        .map(|(i, &base)| {
            let expanded_value = expanded
                .map(|e| u32::from_le_bytes([e[4 * i], e[4 * i + 1], e[4 * i + 2], e[4 * i + 3]]))
                .filter(|&v| v > 0);
            let unit = expanded_value.unwrap_or(u32::from(base));
            Money::from_cents(i64::from(unit) * i64::from(multiplier))
        })
        .collect();

    Ok(BillSetup {
        unit_type: data[0],
        firmware,
        country,
        protocol_version,
        real_multiplier,
        channels: ChannelTable::new(values),
    })
}

/// SET_INHIBITS payload enabling channels 1..=n.
pub fn inhibit_payload(channel_count: usize) -> Vec<u8> {
    let mask: u16 = if channel_count >= 16 {
        0xFFFF
    } else {
        (1u16 << channel_count) - 1
    };
    let [low, high] = mask.to_le_bytes();
    vec![command::SET_INHIBITS, low, high]
}

// =============================================================================
// Driver
// =============================================================================

pub struct BillValidator {
    bus: BusHandle,
    options: BillValidatorOptions,
    ready: bool,
    setup: Option<BillSetup>,
}

impl BillValidator {
    pub fn new(bus: BusHandle, options: BillValidatorOptions) -> Self {
        Self {
            bus,
            options,
            ready: false,
            setup: None,
        }
    }

    /// Setup data from the last successful initialization.
    pub fn setup(&self) -> Option<&BillSetup> {
        self.setup.as_ref()
    }

    /// Returns a note held in escrow to the customer.
    pub async fn reject_note(&mut self) -> SspResult<()> {
        self.ensure_ready()?;
        self.command(vec![command::REJECT_BANKNOTE]).await?;
        info!("Note in escrow rejected");
        Ok(())
    }

    fn channels(&self) -> ChannelTable {
        self.setup
            .as_ref()
            .map(|s| s.channels.clone())
            .unwrap_or_default()
    }

    fn ensure_ready(&self) -> SspResult<()> {
        if self.ready {
            Ok(())
        } else {
            Err(SspError::DeviceNotReady {
                address: BILL_VALIDATOR_ADDRESS,
            })
        }
    }

    async fn command(&self, payload: Vec<u8>) -> SspResult<Vec<u8>> {
        exchange(&self.bus, BILL_VALIDATOR_ADDRESS, payload).await
    }

    async fn run_init_sequence(&mut self) -> SspResult<()> {
        self.command(vec![command::SYNC]).await?;
        debug!("Bill validator SYNC ok");

        self.command(vec![command::HOST_PROTOCOL_VERSION, self.options.protocol_version])
            .await?;

        let data = self.command(vec![command::SETUP_REQUEST]).await?;
        let mut setup = parse_bill_setup(&data)?;
        for &(channel, value) in &self.options.channel_overrides {
            if !setup.channels.set(channel, value) {
                warn!(channel, "Override for a channel the validator does not have");
            }
        }
        if setup.country != self.options.currency {
            warn!(
                device = %setup.country,
                configured = %self.options.currency,
                "Bill validator country differs from configured currency"
            );
        }
        info!(
            firmware = %setup.firmware,
            country = %setup.country,
            channels = setup.channels.len(),
            protocol = setup.protocol_version,
            "Bill validator setup"
        );

        self.command(inhibit_payload(setup.channels.len())).await?;
        self.setup = Some(setup);

        self.command(vec![command::ENABLE]).await?;
        Ok(())
    }
}

#[async_trait]
impl CashDevice for BillValidator {
    fn kind(&self) -> DeviceKind {
        DeviceKind::BillValidator
    }

    fn address(&self) -> u8 {
        BILL_VALIDATOR_ADDRESS
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn initialize(&mut self) -> SspResult<()> {
        self.ready = false;
        match self.run_init_sequence().await {
            Ok(()) => {
                self.ready = true;
                info!("Bill validator ready");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Bill validator initialization failed");
                Err(e)
            }
        }
    }

    async fn enable(&mut self) -> SspResult<()> {
        self.ensure_ready()?;
        self.command(vec![command::ENABLE]).await?;
        debug!("Bill validator enabled");
        Ok(())
    }

    async fn disable(&mut self) -> SspResult<()> {
        self.ensure_ready()?;
        self.command(vec![command::DISABLE]).await?;
        debug!("Bill validator disabled");
        Ok(())
    }

    async fn reset(&mut self) -> SspResult<()> {
        self.command(vec![command::RESET]).await?;
        self.ready = false;
        info!("Bill validator reset requested");
        Ok(())
    }

    async fn handle_incoming_events(&mut self, frame: &Frame) -> Vec<DeviceEvent> {
        let mut events = decode_bill_events(frame.data(), &self.channels());

        if events.iter().any(|e| matches!(e, DeviceEvent::Reset { .. })) {
            warn!("Bill validator reset itself, re-initializing");
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
    use crate::sim::{bill_setup_response, SimBus, SimDevice};

    fn validator_on(sim: &SimBus, options: BillValidatorOptions) -> BillValidator {
        let (bus, _polls) = Bus::spawn(sim.link(), BusConfig::default());
        BillValidator::new(bus, options)
    }

    fn poll_frame(data: &[u8]) -> Frame {
        let mut payload = vec![0xF0];
        payload.extend_from_slice(data);
        Frame {
            address: BILL_VALIDATOR_ADDRESS,
            sequence_bit: false,
            payload,
            valid: true,
        }
    }

    #[test]
    fn test_parse_setup_with_expanded_values() {
        let reply = bill_setup_response("EUR", &[5, 10, 20], 100, 8);
        let setup = parse_bill_setup(&reply[1..]).unwrap();
        assert_eq!(setup.firmware, "0430");
        assert_eq!(setup.country.as_str(), "EUR");
        assert_eq!(setup.protocol_version, 8);
        assert_eq!(setup.real_multiplier, 100);
        assert_eq!(setup.channels.value(1), Some(Money::from_cents(500)));
        assert_eq!(setup.channels.value(3), Some(Money::from_cents(2000)));
    }

    #[test]
    fn test_parse_setup_without_expanded_values() {
        let reply = bill_setup_response("USD", &[1, 5], 0, 4);
        let setup = parse_bill_setup(&reply[1..]).unwrap();
        // Multiplier 0 counts as 1.
        assert_eq!(setup.channels.value(1), Some(Money::from_cents(1)));
        assert_eq!(setup.channels.value(2), Some(Money::from_cents(5)));
    }

    #[test]
    fn test_parse_setup_rejects_short_reply() {
        let reply = bill_setup_response("EUR", &[5, 10, 20], 100, 8);
        assert!(matches!(
            parse_bill_setup(&reply[1..14]),
            Err(SspError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn test_inhibit_mask() {
        assert_eq!(inhibit_payload(4), vec![0x02, 0x0F, 0x00]);
        assert_eq!(inhibit_payload(9), vec![0x02, 0xFF, 0x01]);
        assert_eq!(inhibit_payload(16), vec![0x02, 0xFF, 0xFF]);
        assert_eq!(inhibit_payload(24), vec![0x02, 0xFF, 0xFF]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_runs_full_sequence() {
        let sim = SimBus::new();
        let device = SimDevice::bill_validator();
        sim.attach(device.clone());

        let mut validator = validator_on(&sim, BillValidatorOptions::default());
        assert!(!validator.is_ready());
        validator.initialize().await.unwrap();

        assert!(validator.is_ready());
        assert_eq!(
            device.commands(),
            vec![
                command::SYNC,
                command::HOST_PROTOCOL_VERSION,
                command::SETUP_REQUEST,
                command::SET_INHIBITS,
                command::ENABLE,
            ]
        );
        assert_eq!(device.requests(command::HOST_PROTOCOL_VERSION), vec![vec![0x06, 8]]);
        assert_eq!(device.requests(command::SET_INHIBITS), vec![vec![0x02, 0x0F, 0x00]]);
        assert_eq!(validator.setup().unwrap().channels.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_overrides_replace_device_values() {
        let sim = SimBus::new();
        sim.attach(SimDevice::bill_validator());

        let options = BillValidatorOptions {
            channel_overrides: vec![(1, Money::from_cents(700)), (12, Money::from_cents(1))],
            ..Default::default()
        };
        let mut validator = validator_on(&sim, options);
        validator.initialize().await.unwrap();

        let events = validator.handle_incoming_events(&poll_frame(&[0xEE, 0x01])).await;
        assert_eq!(events[0].credit(), Some(Money::from_cents(700)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_require_initialization() {
        let sim = SimBus::new();
        let device = SimDevice::bill_validator();
        sim.attach(device.clone());

        let mut validator = validator_on(&sim, BillValidatorOptions::default());
        assert!(matches!(
            validator.enable().await,
            Err(SspError::DeviceNotReady { address: 0x00 })
        ));
        assert!(matches!(
            validator.reject_note().await,
            Err(SspError::DeviceNotReady { .. })
        ));
        assert!(device.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_step_leaves_driver_not_ready() {
        let sim = SimBus::new();
        let device = SimDevice::bill_validator();
        device.respond(command::SET_INHIBITS, vec![0xF3]);
        sim.attach(device.clone());

        let mut validator = validator_on(&sim, BillValidatorOptions::default());
        let err = validator.initialize().await.unwrap_err();
        assert!(err.is_protocol_error());
        assert!(!validator.is_ready());
        assert_eq!(device.count(command::ENABLE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_event_reinitializes() {
        let sim = SimBus::new();
        let device = SimDevice::bill_validator();
        sim.attach(device.clone());

        let mut validator = validator_on(&sim, BillValidatorOptions::default());
        validator.initialize().await.unwrap();
        device.clear_received();

        let events = validator.handle_incoming_events(&poll_frame(&[0xF1])).await;
        assert_eq!(events, vec![DeviceEvent::Reset { reinitialized: true }]);
        assert!(validator.is_ready());
        assert_eq!(
            device.commands(),
            vec![
                command::SYNC,
                command::HOST_PROTOCOL_VERSION,
                command::SETUP_REQUEST,
                command::SET_INHIBITS,
                command::ENABLE,
            ]
        );

        validator.disable().await.unwrap();
        assert_eq!(device.count(command::DISABLE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_event_with_failed_reinit() {
        let sim = SimBus::new();
        let device = SimDevice::bill_validator();
        sim.attach(device.clone());

        let mut validator = validator_on(&sim, BillValidatorOptions::default());
        validator.initialize().await.unwrap();
        device.respond_once(command::SYNC, vec![0xF8]);

        let events = validator.handle_incoming_events(&poll_frame(&[0xF1])).await;
        assert_eq!(events, vec![DeviceEvent::Reset { reinitialized: false }]);
        assert!(!validator.is_ready());
        assert!(matches!(validator.disable().await, Err(SspError::DeviceNotReady { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reject_note() {
        let sim = SimBus::new();
        let device = SimDevice::bill_validator();
        sim.attach(device.clone());

        let mut validator = validator_on(&sim, BillValidatorOptions::default());
        validator.initialize().await.unwrap();
        validator.reject_note().await.unwrap();
        assert_eq!(device.count(command::REJECT_BANKNOTE), 1);
    }
}
