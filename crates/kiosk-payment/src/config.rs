//! # Kiosk Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     KIOSK_SERIAL_PORT=/dev/ttyUSB0                                     │
//! │     KIOSK_BAUD_RATE=9600                                               │
//! │     KIOSK_CURRENCY=EUR                                                 │
//! │     KIOSK_POLL_INTERVAL_MS=200                                         │
//! │     KIOSK_SETTLE_INTERVAL_MS=50                                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/kiosk/kiosk.toml (Linux)                                 │
//! │     ~/Library/Application Support/com.kiosk.cash/kiosk.toml (macOS)    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     no serial port (no-hardware mode), EUR, 200 ms poll                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"   # omit to run without cash hardware
//! baud_rate = 9600
//!
//! [bus]
//! poll_interval_ms = 200
//! response_timeout_ms = 2000
//! max_retries = 3
//! settle_interval_ms = 50
//!
//! [currency]
//! code = "EUR"
//!
//! [bill_validator]
//! protocol_version = 8
//!
//! [[bill_validator.channel_overrides]]
//! channel = 4
//! value_cents = 5000
//!
//! [coin_handler]
//! protocol_version = 8
//! cashbox_denominations = [200]   # cents; everything else is recycled
//! level_check = true
//! high_speed = true
//! dry_run_payouts = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use kiosk_core::{CurrencyCode, Money};
use kiosk_ssp::{BillValidatorOptions, BusConfig, CoinHandlerOptions, SerialSettings};

use crate::error::{PaymentError, PaymentResult};

/// Protocol versions the drivers understand.
const SUPPORTED_PROTOCOL_VERSIONS: std::ops::RangeInclusive<u8> = 6..=9;

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSection {
    /// Serial device path. `None` means no-hardware mode.
    #[serde(default)]
    pub port: Option<String>,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_baud_rate() -> u32 {
    9600
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
        }
    }
}

/// Bus timing. Hardware tuning only; protocol behavior does not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusSection {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Minimum gap between two commands to the same device.
    #[serde(default = "default_settle_interval")]
    pub settle_interval_ms: u64,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_poll_interval() -> u64 {
    200
}
fn default_response_timeout() -> u64 {
    2000
}
fn default_max_retries() -> u32 {
    3
}
fn default_settle_interval() -> u64 {
    50
}
fn default_initial_backoff() -> u64 {
    100
}
fn default_max_backoff() -> u64 {
    1000
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            response_timeout_ms: default_response_timeout(),
            max_retries: default_max_retries(),
            settle_interval_ms: default_settle_interval(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencySection {
    #[serde(default = "default_currency")]
    pub code: CurrencyCode,
}

fn default_currency() -> CurrencyCode {
    CurrencyCode::from_bytes(*b"EUR")
}

impl Default for CurrencySection {
    fn default() -> Self {
        Self {
            code: default_currency(),
        }
    }
}

/// Replaces the value the validator reports for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOverride {
    pub channel: u8,
    pub value_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillValidatorSection {
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,

    #[serde(default)]
    pub channel_overrides: Vec<ChannelOverride>,
}

fn default_protocol_version() -> u8 {
    kiosk_ssp::protocol::DEFAULT_PROTOCOL_VERSION
}

impl Default for BillValidatorSection {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            channel_overrides: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinHandlerSection {
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,

    /// Coin values (cents) sent to the cashbox instead of being recycled.
    #[serde(default)]
    pub cashbox_denominations: Vec<i64>,

    #[serde(default = "default_true")]
    pub level_check: bool,

    #[serde(default = "default_true")]
    pub high_speed: bool,

    /// Payouts are checked by the device but no coins move.
    #[serde(default)]
    pub dry_run_payouts: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CoinHandlerSection {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            cashbox_denominations: Vec::new(),
            level_check: true,
            high_speed: true,
            dry_run_payouts: false,
        }
    }
}

// =============================================================================
// Kiosk Config
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KioskConfig {
    #[serde(default)]
    pub serial: SerialSection,

    #[serde(default)]
    pub bus: BusSection,

    #[serde(default)]
    pub currency: CurrencySection,

    #[serde(default)]
    pub bill_validator: BillValidatorSection,

    #[serde(default)]
    pub coin_handler: CoinHandlerSection,
}

impl KioskConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (kiosk.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> PaymentResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading kiosk config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load kiosk config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> PaymentResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| PaymentError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PaymentError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| PaymentError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Kiosk config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> PaymentResult<()> {
        if self.serial.baud_rate == 0 {
            return Err(PaymentError::InvalidConfig("baud_rate must be greater than 0".into()));
        }
        if matches!(self.serial.port.as_deref(), Some(p) if p.trim().is_empty()) {
            return Err(PaymentError::InvalidConfig("serial port must not be empty".into()));
        }

        let bus = &self.bus;
        if bus.poll_interval_ms == 0 || bus.response_timeout_ms == 0 {
            return Err(PaymentError::InvalidConfig(
                "poll_interval_ms and response_timeout_ms must be greater than 0".into(),
            ));
        }
        if bus.initial_backoff_ms > bus.max_backoff_ms {
            return Err(PaymentError::InvalidConfig(format!(
                "initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                bus.initial_backoff_ms, bus.max_backoff_ms
            )));
        }

        for (device, version) in [
            ("bill_validator", self.bill_validator.protocol_version),
            ("coin_handler", self.coin_handler.protocol_version),
        ] {
            if !SUPPORTED_PROTOCOL_VERSIONS.contains(&version) {
                return Err(PaymentError::InvalidConfig(format!(
                    "{}.protocol_version {} not in {}..={}",
                    device,
                    version,
                    SUPPORTED_PROTOCOL_VERSIONS.start(),
                    SUPPORTED_PROTOCOL_VERSIONS.end()
                )));
            }
        }

        for entry in &self.bill_validator.channel_overrides {
            if entry.channel == 0 || entry.value_cents <= 0 {
                return Err(PaymentError::InvalidConfig(format!(
                    "channel override {} = {} is invalid",
                    entry.channel, entry.value_cents
                )));
            }
        }

        if let Some(bad) = self.coin_handler.cashbox_denominations.iter().find(|&&v| v <= 0) {
            return Err(PaymentError::InvalidConfig(format!(
                "cashbox denomination {} must be positive",
                bad
            )));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("KIOSK_SERIAL_PORT") {
            debug!(port = %port, "Overriding serial port from environment");
            self.serial.port = Some(port).filter(|p| !p.is_empty());
        }

        if let Ok(baud) = std::env::var("KIOSK_BAUD_RATE") {
            match baud.parse::<u32>() {
                Ok(b) => self.serial.baud_rate = b,
                Err(_) => warn!(value = %baud, "Ignoring invalid KIOSK_BAUD_RATE"),
            }
        }

        if let Ok(code) = std::env::var("KIOSK_CURRENCY") {
            match CurrencyCode::parse(&code) {
                Ok(c) => {
                    debug!(currency = %c, "Overriding currency from environment");
                    self.currency.code = c;
                }
                Err(e) => warn!(value = %code, error = %e, "Ignoring invalid KIOSK_CURRENCY"),
            }
        }

        if let Ok(ms) = std::env::var("KIOSK_POLL_INTERVAL_MS") {
            if let Ok(v) = ms.parse::<u64>() {
                self.bus.poll_interval_ms = v;
            }
        }

        if let Ok(ms) = std::env::var("KIOSK_SETTLE_INTERVAL_MS") {
            if let Ok(v) = ms.parse::<u64>() {
                self.bus.settle_interval_ms = v;
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "kiosk", "cash")
            .map(|dirs| dirs.config_dir().join("kiosk.toml"))
    }

    // =========================================================================
    // Conversions
    // =========================================================================

    /// Serial settings, `None` in no-hardware mode.
    pub fn serial_settings(&self) -> Option<SerialSettings> {
        self.serial
            .port
            .as_ref()
            .map(|port| SerialSettings::new(port.clone()).with_baud_rate(self.serial.baud_rate))
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            poll_interval: Duration::from_millis(self.bus.poll_interval_ms),
            response_timeout: Duration::from_millis(self.bus.response_timeout_ms),
            max_retries: self.bus.max_retries,
            settle_interval: Duration::from_millis(self.bus.settle_interval_ms),
            initial_backoff: Duration::from_millis(self.bus.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.bus.max_backoff_ms),
        }
    }

    pub fn currency(&self) -> CurrencyCode {
        self.currency.code
    }

    pub fn bill_validator_options(&self) -> BillValidatorOptions {
        BillValidatorOptions {
            protocol_version: self.bill_validator.protocol_version,
            currency: self.currency.code,
            channel_overrides: self
                .bill_validator
                .channel_overrides
                .iter()
                .map(|o| (o.channel, Money::from_cents(o.value_cents)))
                .collect(),
        }
    }

    pub fn coin_handler_options(&self) -> CoinHandlerOptions {
        CoinHandlerOptions {
            protocol_version: self.coin_handler.protocol_version,
            currency: self.currency.code,
            cashbox_denominations: self
                .coin_handler
                .cashbox_denominations
                .iter()
                .map(|&c| Money::from_cents(c))
                .collect(),
            level_check: self.coin_handler.level_check,
            high_speed: self.coin_handler.high_speed,
            dry_run_payouts: self.coin_handler.dry_run_payouts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KioskConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.serial_settings().is_none());
        assert_eq!(config.currency().as_str(), "EUR");
        assert_eq!(config.bus_config().poll_interval, Duration::from_millis(200));
        assert_eq!(config.bus_config().max_retries, 3);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: KioskConfig = toml::from_str(
            r#"
            [serial]
            port = "/dev/ttyUSB0"

            [currency]
            code = "usd"

            [[bill_validator.channel_overrides]]
            channel = 2
            value_cents = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.currency().as_str(), "USD");
        assert_eq!(config.bus.settle_interval_ms, 50);
        assert_eq!(
            config.bill_validator_options().channel_overrides,
            vec![(2, Money::from_cents(1000))]
        );
        let settings = config.serial_settings().unwrap();
        assert_eq!(settings.port, "/dev/ttyUSB0");
    }

    #[test]
    fn test_invalid_currency_rejected_at_parse() {
        let result: Result<KioskConfig, _> = toml::from_str("[currency]\ncode = \"EURO\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = KioskConfig::default();

        config.bill_validator.protocol_version = 5;
        assert!(config.validate().unwrap_err().is_config_error());
        config.bill_validator.protocol_version = 8;

        config.serial.baud_rate = 0;
        assert!(config.validate().is_err());
        config.serial.baud_rate = 9600;

        config.bus.initial_backoff_ms = 5000;
        assert!(config.validate().is_err());
        config.bus.initial_backoff_ms = 100;

        config.coin_handler.cashbox_denominations = vec![200, 0];
        assert!(config.validate().is_err());
        config.coin_handler.cashbox_denominations = vec![200];

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_coin_handler_options() {
        let mut config = KioskConfig::default();
        config.coin_handler.cashbox_denominations = vec![200];
        config.coin_handler.dry_run_payouts = true;

        let options = config.coin_handler_options();
        assert_eq!(options.cashbox_denominations, vec![Money::from_cents(200)]);
        assert!(options.dry_run_payouts);
        assert!(options.level_check);
    }

    #[test]
    fn test_toml_roundtrip_and_save() {
        let mut config = KioskConfig::default();
        config.serial.port = Some("/dev/ttyS1".into());
        config.bus.max_retries = 5;

        let path = std::env::temp_dir().join(format!("kiosk-config-{}.toml", std::process::id()));
        config.save(Some(path.clone())).unwrap();
        let loaded = KioskConfig::load(Some(path.clone())).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.bus.max_retries, 5);
        assert_eq!(loaded.bill_validator, config.bill_validator);
        assert_eq!(loaded.coin_handler, config.coin_handler);
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("KIOSK_SETTLE_INTERVAL_MS", "120");
        std::env::set_var("KIOSK_BAUD_RATE", "not-a-number");

        let mut config = KioskConfig::default();
        config.apply_env_overrides();

        std::env::remove_var("KIOSK_SETTLE_INTERVAL_MS");
        std::env::remove_var("KIOSK_BAUD_RATE");

        assert_eq!(config.bus.settle_interval_ms, 120);
        assert_eq!(config.serial.baud_rate, 9600);
    }
}
