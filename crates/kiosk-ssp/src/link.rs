//! # Serial Link
//!
//! The bus talks to any byte stream that is `AsyncRead + AsyncWrite`.
//! A [`Connector`] produces one; [`SerialConnector`] opens a real port with
//! the fixed SSP line settings (8 data bits, no parity, 2 stop bits).
//!
//! ```text
//!   Bus::open(&connector) ──► connector.open() ──► Box<dyn SerialLink>
//!                                   │
//!                    ┌──────────────┴──────────────┐
//!                    ▼                             ▼
//!            SerialConnector                 SimConnector (tests)
//!            tokio-serial, 8N2               tokio::io::duplex
//! ```

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, error, info};

use crate::error::{SspError, SspResult};

/// Default SSP line speed.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// A bidirectional byte stream the bus can own.
pub trait SerialLink: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> SerialLink for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Opens a serial link.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Short description for logs (port name, "simulator", ...).
    fn describe(&self) -> String;

    async fn open(&self) -> SspResult<Box<dyn SerialLink>>;
}

/// Port name and speed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
}

impl SerialSettings {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

/// Opens a physical serial port through tokio-serial.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    settings: SerialSettings,
}

impl SerialConnector {
    pub fn new(settings: SerialSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }
}

#[async_trait]
impl Connector for SerialConnector {
    fn describe(&self) -> String {
        format!("{} @ {} baud", self.settings.port, self.settings.baud_rate)
    }

    async fn open(&self) -> SspResult<Box<dyn SerialLink>> {
        debug!("Opening serial port: {}", self.settings.port);

        let port = tokio_serial::new(&self.settings.port, self.settings.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::Two)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                error!("Failed to open serial port {}: {e}", self.settings.port);
                SspError::PortOpenFailed {
                    port: self.settings.port.clone(),
                    reason: e.to_string(),
                }
            })?;

        info!("Opened serial port: {}", self.describe());
        Ok(Box::new(port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_settings_defaults() {
        let settings = SerialSettings::new("/dev/ttyUSB0");
        assert_eq!(settings.baud_rate, 9600);

        let settings = settings.with_baud_rate(38400);
        assert_eq!(settings.baud_rate, 38400);
        assert_eq!(
            SerialConnector::new(settings).describe(),
            "/dev/ttyUSB0 @ 38400 baud"
        );
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let connector = SerialConnector::new(SerialSettings::new("/dev/kiosk-no-such-port"));
        match connector.open().await {
            Err(SspError::PortOpenFailed { port, .. }) => {
                assert_eq!(port, "/dev/kiosk-no-such-port");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("opened a port that does not exist"),
        }
    }
}
