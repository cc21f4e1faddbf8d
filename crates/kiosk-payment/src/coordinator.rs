//! # Payment Session Coordinator
//!
//! One task owns the session state and the cash hardware. Control requests
//! and poll replies are multiplexed with `tokio::select!`, so no lock is
//! ever taken on either.
//!
//! ## Session Flow
//! ```text
//!   start_session ──► bring-up (first call) ──► enable both ──► Active ──► SessionStarted
//!                                                                  │
//!        credit (note / coin) ──► CreditReceived ◄─────────────────┤
//!                                                                  │ accumulated ≥ target
//!                                                                  ▼
//!        disable both ──► PaymentComplete ──► payout change ──► ChangeDispensed | ChangeError ──► Idle
//!
//!   cancel_session ──► reject escrow ──► disable both ──► refund ──► PaymentCancelled ──► Idle
//!
//!   stop ──► disable both ──► stop polling ──► close bus   (no events)
//! ```
//!
//! ## Credit Attribution
//! A credit is applied only while a session is Active and only in the
//! configured currency. Anything else becomes `UnattributedCredit`; cash is
//! never silently dropped.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use kiosk_core::{
    Cancellation, Completion, CoreError, CurrencyCode, DeviceKind, HardwareFault, Money, PaymentEvent,
    PaymentSession, SessionSnapshot,
};
use kiosk_ssp::{Connector, DeviceEvent, PayoutError, PollResponse, SerialConnector, SspError};

use crate::config::KioskConfig;
use crate::emitter::{NoOpEmitter, PaymentEventEmitter};
use crate::error::{PaymentError, PaymentResult};
use crate::hardware::Hardware;

const REQUEST_CHANNEL_CAPACITY: usize = 32;

// =============================================================================
// Requests and Handle
// =============================================================================

/// Answer to `start_session`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionAck {
    pub snapshot: SessionSnapshot,
    /// False means the session will never receive credit.
    pub hardware_available: bool,
}

enum CoordinatorRequest {
    StartSession {
        order_id: String,
        target: Money,
        reply: oneshot::Sender<PaymentResult<SessionAck>>,
    },
    CancelSession {
        reply: oneshot::Sender<PaymentResult<Cancellation>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Handle for controlling the coordinator task.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordinatorRequest>,
}

impl CoordinatorHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> CoordinatorRequest,
    ) -> PaymentResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| PaymentError::ShuttingDown)?;
        rx.await
            .map_err(|_| PaymentError::ChannelError("Coordinator dropped reply".into()))
    }

    /// Starts collecting cash for an order.
    pub async fn start_session(&self, order_id: impl Into<String>, target: Money) -> PaymentResult<SessionAck> {
        let order_id = order_id.into();
        self.request(|reply| CoordinatorRequest::StartSession {
            order_id,
            target,
            reply,
        })
        .await?
    }

    /// Cancels the active session and refunds what was inserted.
    pub async fn cancel_session(&self) -> PaymentResult<Cancellation> {
        self.request(|reply| CoordinatorRequest::CancelSession { reply })
            .await?
    }

    pub async fn snapshot(&self) -> PaymentResult<SessionSnapshot> {
        self.request(|reply| CoordinatorRequest::Snapshot { reply })
            .await
    }

    /// Shuts the hardware down and ends the task. No-op once stopped.
    pub async fn stop(&self) -> PaymentResult<()> {
        match self.request(|reply| CoordinatorRequest::Stop { reply }).await {
            Err(PaymentError::ShuttingDown) => Ok(()),
            other => other,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.tx.is_closed()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builds a coordinator from configuration.
///
/// The connector defaults to the configured serial port; without one the
/// coordinator runs in no-hardware mode.
pub struct CoordinatorBuilder {
    config: KioskConfig,
    connector: Option<Arc<dyn Connector>>,
    emitter: Arc<dyn PaymentEventEmitter>,
}

impl CoordinatorBuilder {
    pub fn new(config: KioskConfig) -> Self {
        let connector = config
            .serial_settings()
            .map(|settings| Arc::new(SerialConnector::new(settings)) as Arc<dyn Connector>);
        Self {
            config,
            connector,
            emitter: Arc::new(NoOpEmitter),
        }
    }

    /// Replaces the serial connector (simulator, alternate transport).
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Forces no-hardware mode.
    pub fn without_hardware(mut self) -> Self {
        self.connector = None;
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn PaymentEventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn spawn(self) -> CoordinatorHandle {
        Coordinator::spawn(self.config, self.connector, self.emitter)
    }
}

// =============================================================================
// Coordinator
// =============================================================================

pub struct Coordinator {
    config: KioskConfig,
    connector: Option<Arc<dyn Connector>>,
    emitter: Arc<dyn PaymentEventEmitter>,
    requests: mpsc::Receiver<CoordinatorRequest>,
    session: PaymentSession,
    hardware: Option<Hardware>,
    polls: Option<mpsc::UnboundedReceiver<PollResponse>>,
}

impl Coordinator {
    /// Spawns the coordinator task. `connector = None` means no-hardware mode.
    pub fn spawn(
        config: KioskConfig,
        connector: Option<Arc<dyn Connector>>,
        emitter: Arc<dyn PaymentEventEmitter>,
    ) -> CoordinatorHandle {
        let (tx, requests) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);

        let coordinator = Coordinator {
            config,
            connector,
            emitter,
            requests,
            session: PaymentSession::new(),
            hardware: None,
            polls: None,
        };
        tokio::spawn(coordinator.run());

        CoordinatorHandle { tx }
    }

    async fn run(mut self) {
        let hardware = self
            .connector
            .as_ref()
            .map(|c| c.describe())
            .unwrap_or_else(|| "none".to_string());
        info!(
            hardware = %hardware,
            currency = %self.config.currency(),
            "Payment coordinator started"
        );

        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(CoordinatorRequest::Stop { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(request) => self.handle_request(request).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                polled = next_poll(&mut self.polls) => match polled {
                    Some(response) => self.handle_poll(response).await,
                    None => self.hardware_lost(),
                },
            }
        }

        info!("Payment coordinator stopped");
    }

    async fn handle_request(&mut self, request: CoordinatorRequest) {
        match request {
            CoordinatorRequest::StartSession {
                order_id,
                target,
                reply,
            } => {
                let result = self.start_session(order_id, target).await;
                let _ = reply.send(result);
            }
            CoordinatorRequest::CancelSession { reply } => {
                let result = self.cancel_session().await;
                let _ = reply.send(result);
            }
            CoordinatorRequest::Snapshot { reply } => {
                let _ = reply.send(self.session.snapshot());
            }
            // Handled in `run`.
            CoordinatorRequest::Stop { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn emit(&self, event: PaymentEvent) {
        trace!(event = event.name(), "Emitting payment event");
        self.emitter.emit(&event);
    }

    // =========================================================================
    // Session Control
    // =========================================================================

    async fn start_session(&mut self, order_id: String, target: Money) -> PaymentResult<SessionAck> {
        self.session.check_can_start(&order_id, target)?;

        self.ensure_hardware().await;

        let hardware_available = match self.hardware.as_mut() {
            Some(hardware) => match hardware.enable_all().await {
                Ok(()) => true,
                Err((device, e)) => {
                    error!(device = %device, error = %e, "Failed to enable device for session");
                    self.report_bus_error(device, &e);
                    false
                }
            },
            None => false,
        };

        let snapshot = self.session.start(&order_id, target)?;
        info!(
            order_id = %order_id,
            target = %target,
            hardware_available,
            "Payment session started"
        );
        self.emit(PaymentEvent::SessionStarted {
            order_id: snapshot.order_id.clone().unwrap_or_default(),
            total_cents: target,
            hardware_available,
        });

        Ok(SessionAck {
            snapshot,
            hardware_available,
        })
    }

    async fn cancel_session(&mut self) -> PaymentResult<Cancellation> {
        let cancellation = self.session.cancel()?;
        info!(
            order_id = %cancellation.order_id,
            refunded = %cancellation.refunded,
            "Cancelling payment session"
        );

        if let Some(hardware) = self.hardware.as_mut() {
            hardware.reject_note().await;
        }
        self.disable_devices().await;

        if cancellation.refunded.is_positive() {
            self.pay_out(cancellation.refunded).await;
        }

        self.emit(PaymentEvent::PaymentCancelled {
            order_id: cancellation.order_id.clone(),
            refunded: cancellation.refunded,
        });
        self.session.reset()?;

        Ok(cancellation)
    }

    async fn complete(&mut self, completion: Completion) {
        self.disable_devices().await;

        info!(
            order_id = %completion.order_id,
            total_paid = %completion.total_paid,
            change = %completion.change,
            "Payment complete"
        );
        self.emit(PaymentEvent::PaymentComplete {
            order_id: completion.order_id.clone(),
            total_paid: completion.total_paid,
            change: completion.change,
        });

        if completion.change.is_positive() {
            self.pay_out(completion.change).await;
        }

        if let Err(e) = self.session.finish().and_then(|()| self.session.reset()) {
            error!(error = %e, "Session did not return to idle after completion");
        }
    }

    /// Pays out change or a refund, reporting the outcome as an event.
    async fn pay_out(&mut self, amount: Money) {
        let result = match self.hardware.as_mut() {
            Some(hardware) => hardware.payout(amount).await,
            None => Err(PayoutError::Bus(SspError::BusClosed)),
        };

        match result {
            Ok(()) => {
                info!(amount = %amount, "Change dispensed");
                self.emit(PaymentEvent::ChangeDispensed { amount });
            }
            Err(e) => {
                error!(amount = %amount, error = %e, "Payout failed, amount still owed");
                if let PayoutError::Bus(bus_error) = &e {
                    self.report_bus_error(DeviceKind::CoinHandler, bus_error);
                }
                self.emit(PaymentEvent::ChangeError {
                    change: amount,
                    reason: e.to_string(),
                });
            }
        }
    }

    // =========================================================================
    // Hardware
    // =========================================================================

    /// Brings the hardware up if it is not running. Failure leaves the
    /// coordinator in no-hardware mode until the next session start.
    async fn ensure_hardware(&mut self) {
        if self.hardware.as_ref().is_some_and(Hardware::is_closed) {
            self.hardware_lost();
        }
        if self.hardware.is_some() {
            return;
        }
        let Some(connector) = self.connector.clone() else {
            debug!("No serial port configured, running without cash hardware");
            return;
        };

        match Hardware::bring_up(connector.as_ref(), &self.config).await {
            Ok((hardware, polls)) => {
                self.hardware = Some(hardware);
                self.polls = Some(polls);
                self.emit(PaymentEvent::DeviceReady {
                    device: DeviceKind::BillValidator,
                });
                self.emit(PaymentEvent::DeviceReady {
                    device: DeviceKind::CoinHandler,
                });
            }
            Err(e) => {
                error!(
                    link = %connector.describe(),
                    error = %e,
                    "Cash hardware bring-up failed, continuing without hardware"
                );
            }
        }
    }

    async fn disable_devices(&mut self) {
        let Some(hardware) = self.hardware.as_mut() else {
            return;
        };
        for (device, e) in hardware.disable_all().await {
            self.report_bus_error(device, &e);
        }
    }

    /// Surfaces a transport failure as a fault. Protocol refusals are not
    /// faults; they stay in the log.
    fn report_bus_error(&self, device: DeviceKind, err: &SspError) {
        if matches!(err, SspError::DeviceUnresponsive { .. }) || err.is_link_down() {
            self.emit(PaymentEvent::HardwareFault {
                device,
                fault: HardwareFault::BusError {
                    message: err.to_string(),
                },
            });
        }
    }

    fn hardware_lost(&mut self) {
        self.polls = None;
        if self.hardware.take().is_some() {
            error!("SSP bus stopped, cash hardware offline");
            for device in [DeviceKind::BillValidator, DeviceKind::CoinHandler] {
                self.emit(PaymentEvent::HardwareFault {
                    device,
                    fault: HardwareFault::BusError {
                        message: SspError::BusClosed.to_string(),
                    },
                });
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Some(abandoned) = self.session.abandon() {
            warn!(
                order_id = %abandoned.order_id,
                collected = %abandoned.refunded,
                "Shutting down with a session in progress"
            );
        }
        self.polls = None;
        if let Some(hardware) = self.hardware.take() {
            hardware.shutdown().await;
        }
    }

    // =========================================================================
    // Device Events
    // =========================================================================

    async fn handle_poll(&mut self, response: PollResponse) {
        let Some(hardware) = self.hardware.as_mut() else {
            return;
        };
        let Some((device, events)) = hardware.handle_poll(&response).await else {
            return;
        };
        for event in events {
            self.handle_device_event(device, event).await;
        }
    }

    async fn handle_device_event(&mut self, device: DeviceKind, event: DeviceEvent) {
        match event {
            DeviceEvent::Reset { reinitialized } => {
                if reinitialized && !self.session.is_active() {
                    let result = match self.hardware.as_mut() {
                        Some(hardware) => hardware.disable(device).await,
                        None => Ok(()),
                    };
                    if let Err(e) = result {
                        self.report_bus_error(device, &e);
                    }
                }
                if !reinitialized {
                    error!(device = %device, "Device did not come back after reset");
                }
                self.emit(PaymentEvent::DeviceReset {
                    device,
                    reinitialized,
                });
            }
            DeviceEvent::Disabled => {
                trace!(device = %device, "Device reports disabled");
            }
            event => {
                if let Some(value) = event.credit() {
                    self.apply_credit(device, value, event.currency()).await;
                } else if let Some(fault) = event.fault() {
                    self.report_fault(device, fault).await;
                } else if let Some(activity) = event.activity() {
                    debug!(device = %device, ?activity, "Device activity");
                    self.emit(PaymentEvent::DeviceActivity { device, activity });
                }
            }
        }
    }

    async fn apply_credit(&mut self, device: DeviceKind, value: Money, currency: Option<CurrencyCode>) {
        let expected = self.config.currency();
        if let Some(currency) = currency.filter(|c| *c != expected) {
            self.unattributed(device, value, format!("credit in {}, expected {}", currency, expected));
            return;
        }

        match self.session.apply_credit(value) {
            Ok(outcome) => {
                info!(
                    device = %device,
                    value = %value,
                    accumulated = %outcome.accumulated,
                    remaining = %outcome.remaining,
                    "Credit received"
                );
                self.emit(PaymentEvent::CreditReceived {
                    device,
                    value,
                    accumulated: outcome.accumulated,
                    remaining: outcome.remaining,
                });
                if let Some(completion) = outcome.completion {
                    self.complete(completion).await;
                }
            }
            Err(CoreError::NoActiveSession) => {
                self.unattributed(device, value, "no active session".to_string());
            }
            Err(e) => {
                self.unattributed(device, value, e.to_string());
            }
        }
    }

    fn unattributed(&self, device: DeviceKind, value: Money, reason: String) {
        warn!(device = %device, value = %value, reason = %reason, "Unattributed credit");
        self.emit(PaymentEvent::UnattributedCredit {
            device,
            value,
            reason,
        });
    }

    async fn report_fault(&mut self, device: DeviceKind, fault: HardwareFault) {
        warn!(device = %device, fault = %fault, "Hardware fault");
        self.emit(PaymentEvent::HardwareFault { device, fault });

        if !self.session.is_active() {
            self.disable_devices().await;
        }
    }
}

/// Next poll reply, or pending forever while there is no hardware.
async fn next_poll(polls: &mut Option<mpsc::UnboundedReceiver<PollResponse>>) -> Option<PollResponse> {
    match polls {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
