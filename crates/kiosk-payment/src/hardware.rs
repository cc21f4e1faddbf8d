//! # Cash Hardware
//!
//! The bus plus both drivers, owned by the coordinator task.
//!
//! ## Bring-up
//! ```text
//! open link ─► register 0x00, 0x10 ─► init bill validator ─► init coin handler ─► start polling
//!                                      (sequential: one exchange on the line at a time)
//! ```
//!
//! Any failure closes the bus again and leaves the caller without hardware.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use kiosk_core::{DeviceKind, Money};
use kiosk_ssp::{
    BillValidator, Bus, BusHandle, CashDevice, CoinHandler, Connector, DeviceEvent, PayoutError,
    PollResponse, SspError, SspResult, BILL_VALIDATOR_ADDRESS, COIN_HANDLER_ADDRESS,
};

use crate::config::KioskConfig;
use crate::error::{PaymentError, PaymentResult};

pub struct Hardware {
    bus: BusHandle,
    bill: BillValidator,
    coin: CoinHandler,
}

impl Hardware {
    /// Opens the bus and initializes both devices, leaving them enabled.
    ///
    /// Returns the poll receiver separately so the owner can select on it
    /// while holding `&mut Hardware`.
    pub async fn bring_up(
        connector: &dyn Connector,
        config: &KioskConfig,
    ) -> PaymentResult<(Self, mpsc::UnboundedReceiver<PollResponse>)> {
        info!(link = %connector.describe(), "Bringing up cash hardware");

        let (bus, polls) = Bus::open(connector, config.bus_config()).await?;
        let mut hardware = Hardware {
            bill: BillValidator::new(bus.clone(), config.bill_validator_options()),
            coin: CoinHandler::new(bus.clone(), config.coin_handler_options()),
            bus,
        };

        match hardware.initialize().await {
            Ok(()) => {
                info!("Cash hardware ready");
                Ok((hardware, polls))
            }
            Err(e) => {
                hardware.bus.close().await;
                Err(PaymentError::HardwareUnavailable(e.to_string()))
            }
        }
    }

    async fn initialize(&mut self) -> SspResult<()> {
        self.bus.register_address(BILL_VALIDATOR_ADDRESS).await?;
        self.bus.register_address(COIN_HANDLER_ADDRESS).await?;

        self.bill.initialize().await?;
        self.coin.initialize().await?;

        self.bus.start_polling().await
    }

    fn device_mut(&mut self, kind: DeviceKind) -> &mut dyn CashDevice {
        match kind {
            DeviceKind::BillValidator => &mut self.bill,
            DeviceKind::CoinHandler => &mut self.coin,
        }
    }

    /// Routes a poll reply to the driver at its address.
    pub async fn handle_poll(&mut self, response: &PollResponse) -> Option<(DeviceKind, Vec<DeviceEvent>)> {
        let kind = match response.address {
            BILL_VALIDATOR_ADDRESS => DeviceKind::BillValidator,
            COIN_HANDLER_ADDRESS => DeviceKind::CoinHandler,
            other => {
                debug!(address = %format!("0x{:02X}", other), "Poll reply from unknown address");
                return None;
            }
        };
        let events = self.device_mut(kind).handle_incoming_events(&response.frame).await;
        Some((kind, events))
    }

    /// Enables both devices, re-initializing any that lost its setup.
    pub async fn enable_all(&mut self) -> Result<(), (DeviceKind, SspError)> {
        for kind in [DeviceKind::BillValidator, DeviceKind::CoinHandler] {
            let device = self.device_mut(kind);
            let result = if device.is_ready() {
                device.enable().await
            } else {
                info!(device = %kind, "Device not ready, re-initializing");
                device.initialize().await
            };
            result.map_err(|e| (kind, e))?;
        }
        Ok(())
    }

    /// Disables one device. Failures are logged and returned.
    pub async fn disable(&mut self, kind: DeviceKind) -> SspResult<()> {
        let result = self.device_mut(kind).disable().await;
        if let Err(e) = &result {
            warn!(device = %kind, error = %e, "Failed to disable device");
        }
        result
    }

    /// Disables both devices, bill validator first. Returns the failures.
    pub async fn disable_all(&mut self) -> Vec<(DeviceKind, SspError)> {
        let mut failures = Vec::new();
        for kind in [DeviceKind::BillValidator, DeviceKind::CoinHandler] {
            if let Err(e) = self.disable(kind).await {
                failures.push((kind, e));
            }
        }
        failures
    }

    /// Returns a note held in escrow. Best-effort.
    pub async fn reject_note(&mut self) {
        if let Err(e) = self.bill.reject_note().await {
            debug!(error = %e, "No note returned from escrow");
        }
    }

    pub async fn payout(&mut self, amount: Money) -> Result<(), PayoutError> {
        self.coin.payout_amount(amount).await
    }

    /// True once the bus task has exited, for instance after the link died.
    pub fn is_closed(&self) -> bool {
        self.bus.is_closed()
    }

    /// Disables devices, stops polling and closes the bus.
    pub async fn shutdown(mut self) {
        self.disable_all().await;
        if let Err(e) = self.bus.stop_polling().await {
            debug!(error = %e, "Polling already stopped");
        }
        self.bus.close().await;
        info!("Cash hardware shut down");
    }
}
