//! # Bus Transport
//!
//! One task owns the serial link and performs every exchange on it.
//!
//! ## Task Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            Bus Task                                     │
//! │                                                                         │
//! │  BusHandle::send ──mpsc──► ┌──────────────┐                             │
//! │  BusHandle::send ──mpsc──► │ FIFO queue   │── front ──► exchange()      │
//! │                            │ (VecDeque)   │◄── retry ──┘   │            │
//! │                            └──────────────┘ push_front      │            │
//! │                                                             ▼            │
//! │   poll tick ──► queue empty? ──► POLL each address ──► link (one        │
//! │                 (re-checked before every address)           exchange    │
//! │                                                             at a time)  │
//! │                                                                         │
//! │  OWNED STATE:                                                          │
//! │  • link, receive buffer (FrameDecoder)                                 │
//! │  • sequence bit per address (starts true, toggles on success only)    │
//! │  • last exchange per address (settle interval)                        │
//! │  • registered addresses, in registration order (poll order)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Exchange
//! ```text
//!   wait settle ─► clear rx buffer ─► write frame ─► read until deadline
//!                                                       │
//!          invalid CRC / other address / stale seq bit ─┤ skip, keep reading
//!                                                       │
//!                              matching valid frame ────┴─► toggle seq bit
//! ```
//!
//! Retryable failures (timeout, write or read error) go back to the front
//! of the queue with the same sequence bit after an exponential backoff.
//! When the retry budget is spent the caller gets
//! [`SspError::DeviceUnresponsive`].
//!
//! A link that reports end of file or a broken pipe is gone for good: the
//! task fails every queued command with [`SspError::LinkClosed`] and exits,
//! which closes the handle and ends the poll response stream.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep, sleep_until, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::error::{SspError, SspResult};
use crate::link::{Connector, SerialLink};
use crate::packet::{encode, Frame, FrameDecoder};
use crate::protocol::{command, ResponseStatus};

/// Capacity of the request channel.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Read chunk size.
const READ_BUFFER_SIZE: usize = 256;

// =============================================================================
// Configuration
// =============================================================================

/// Timing and retry parameters of the bus.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Interval between poll cycles.
    pub poll_interval: Duration,

    /// Deadline for one exchange.
    pub response_timeout: Duration,

    /// Retransmissions after the first attempt.
    pub max_retries: u32,

    /// Minimum gap between two exchanges with the same device.
    pub settle_interval: Duration,

    /// First retry delay.
    pub initial_backoff: Duration,

    /// Retry delay cap.
    pub max_backoff: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            poll_interval: Duration::from_millis(200),
            response_timeout: Duration::from_secs(2),
            max_retries: 3,
            settle_interval: Duration::from_millis(50),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
        }
    }
}

// =============================================================================
// Messages
// =============================================================================

/// A non-empty poll response from a registered device.
#[derive(Debug, Clone)]
pub struct PollResponse {
    pub address: u8,
    pub frame: Frame,
}

struct Command {
    address: u8,
    payload: Vec<u8>,
    retries_remaining: u32,
    attempts: u32,
    reply: oneshot::Sender<SspResult<Frame>>,
}

impl Command {
    fn opcode(&self) -> u8 {
        self.payload.first().copied().unwrap_or_default()
    }
}

enum BusRequest {
    Send(Command),
    RegisterAddress(u8),
    StartPolling,
    StopPolling,
    SequenceBit {
        address: u8,
        reply: oneshot::Sender<Option<bool>>,
    },
    Close(oneshot::Sender<()>),
}

// =============================================================================
// Bus Handle
// =============================================================================

/// Cloneable handle to the bus task.
#[derive(Clone)]
pub struct BusHandle {
    tx: mpsc::Sender<BusRequest>,
    max_retries: u32,
}

impl BusHandle {
    /// Queues `payload` for `address` and waits for the matching response.
    ///
    /// Resolves with the response frame whatever its status byte; the
    /// drivers interpret the status.
    pub async fn send(&self, address: u8, payload: Vec<u8>) -> SspResult<Frame> {
        let (reply, reply_rx) = oneshot::channel();
        let command = Command {
            address,
            payload,
            retries_remaining: self.max_retries,
            attempts: 0,
            reply,
        };
        self.tx
            .send(BusRequest::Send(command))
            .await
            .map_err(|_| SspError::BusClosed)?;
        reply_rx.await.map_err(|_| SspError::BusClosed)?
    }

    /// Adds an address to the poll rotation.
    pub async fn register_address(&self, address: u8) -> SspResult<()> {
        self.request(BusRequest::RegisterAddress(address)).await
    }

    pub async fn start_polling(&self) -> SspResult<()> {
        self.request(BusRequest::StartPolling).await
    }

    pub async fn stop_polling(&self) -> SspResult<()> {
        self.request(BusRequest::StopPolling).await
    }

    /// Sequence bit the next command to `address` will carry, `None` if the
    /// address has never been used.
    pub async fn sequence_bit(&self, address: u8) -> SspResult<Option<bool>> {
        let (reply, reply_rx) = oneshot::channel();
        self.request(BusRequest::SequenceBit { address, reply }).await?;
        reply_rx.await.map_err(|_| SspError::BusClosed)
    }

    /// Stops the task. Queued commands fail with [`SspError::BusClosed`].
    /// Closing an already closed bus is a no-op.
    pub async fn close(&self) {
        let (reply, reply_rx) = oneshot::channel();
        if self.tx.send(BusRequest::Close(reply)).await.is_ok() {
            let _ = reply_rx.await;
        }
    }

    /// True once the task has exited, after [`BusHandle::close`] or a lost link.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request(&self, request: BusRequest) -> SspResult<()> {
        self.tx.send(request).await.map_err(|_| SspError::BusClosed)
    }
}

// =============================================================================
// Bus Task
// =============================================================================

/// The bus task. Created through [`Bus::spawn`] or [`Bus::open`].
pub struct Bus {
    config: BusConfig,
    link: Box<dyn SerialLink>,
    requests: mpsc::Receiver<BusRequest>,
    poll_tx: mpsc::UnboundedSender<PollResponse>,
    queue: VecDeque<Command>,
    sequence: HashMap<u8, bool>,
    addresses: Vec<u8>,
    last_exchange: HashMap<u8, Instant>,
    decoder: FrameDecoder,
    backoff: ExponentialBackoff,
    polling: bool,
    running: bool,
    link_lost: bool,
    close_waiters: Vec<oneshot::Sender<()>>,
}

impl Bus {
    /// Starts the bus task on an already open link.
    ///
    /// Returns the handle and the receiver of poll responses.
    pub fn spawn(
        link: Box<dyn SerialLink>,
        config: BusConfig,
    ) -> (BusHandle, mpsc::UnboundedReceiver<PollResponse>) {
        let (tx, requests) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();

        let backoff = ExponentialBackoff {
            initial_interval: config.initial_backoff,
            max_interval: config.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };

        let handle = BusHandle {
            tx,
            max_retries: config.max_retries,
        };

        let bus = Bus {
            config,
            link,
            requests,
            poll_tx,
            queue: VecDeque::new(),
            sequence: HashMap::new(),
            addresses: Vec::new(),
            last_exchange: HashMap::new(),
            decoder: FrameDecoder::new(),
            backoff,
            polling: false,
            running: true,
            link_lost: false,
            close_waiters: Vec::new(),
        };

        tokio::spawn(bus.run());

        (handle, poll_rx)
    }

    /// Opens a link through `connector` and starts the bus on it.
    pub async fn open(
        connector: &dyn Connector,
        config: BusConfig,
    ) -> SspResult<(BusHandle, mpsc::UnboundedReceiver<PollResponse>)> {
        let link = connector.open().await?;
        info!(link = %connector.describe(), "SSP bus opened");
        Ok(Self::spawn(link, config))
    }

    async fn run(mut self) {
        debug!(
            poll_ms = self.config.poll_interval.as_millis() as u64,
            timeout_ms = self.config.response_timeout.as_millis() as u64,
            max_retries = self.config.max_retries,
            "Bus task starting"
        );

        let mut poll_timer = interval(self.config.poll_interval);
        poll_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.running {
            self.drain_requests();
            if !self.running {
                break;
            }

            if let Some(command) = self.queue.pop_front() {
                self.execute(command).await;
                continue;
            }

            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => self.running = false,
                },
                _ = poll_timer.tick(), if self.polling => {
                    self.poll_cycle().await;
                }
            }
        }

        self.shutdown().await;
    }

    /// Applies every request already waiting in the channel.
    fn drain_requests(&mut self) {
        while self.running {
            match self.requests.try_recv() {
                Ok(request) => self.handle_request(request),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => self.running = false,
            }
        }
    }

    fn handle_request(&mut self, request: BusRequest) {
        match request {
            BusRequest::Send(command) => {
                trace!(
                    address = %format!("0x{:02X}", command.address),
                    opcode = command::name(command.opcode()),
                    queued = self.queue.len(),
                    "Command queued"
                );
                self.queue.push_back(command);
            }
            BusRequest::RegisterAddress(address) => {
                if !self.addresses.contains(&address) {
                    debug!(address = %format!("0x{:02X}", address), "Address registered");
                    self.addresses.push(address);
                }
                self.sequence.entry(address).or_insert(true);
            }
            BusRequest::StartPolling => {
                if !self.polling {
                    debug!("Polling started");
                }
                self.polling = true;
            }
            BusRequest::StopPolling => {
                if self.polling {
                    debug!("Polling stopped");
                }
                self.polling = false;
            }
            BusRequest::SequenceBit { address, reply } => {
                let _ = reply.send(self.sequence.get(&address).copied());
            }
            BusRequest::Close(reply) => {
                self.close_waiters.push(reply);
                self.running = false;
            }
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    async fn execute(&mut self, mut command: Command) {
        command.attempts += 1;
        let address = command.address;
        let opcode = command.opcode();

        match self.exchange(address, &command.payload).await {
            Ok(frame) => {
                self.backoff.reset();
                let _ = command.reply.send(Ok(frame));
            }
            Err(err) if err.is_retryable() && command.retries_remaining > 0 => {
                command.retries_remaining -= 1;
                let delay = self
                    .backoff
                    .next_backoff()
                    .unwrap_or(self.config.max_backoff);
                warn!(
                    address = %format!("0x{:02X}", address),
                    opcode = command::name(opcode),
                    attempt = command.attempts,
                    retries_left = command.retries_remaining,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Exchange failed, retrying"
                );
                sleep(delay).await;
                self.queue.push_front(command);
            }
            Err(err) if err.is_retryable() => {
                error!(
                    address = %format!("0x{:02X}", address),
                    opcode = command::name(opcode),
                    attempts = command.attempts,
                    error = %err,
                    "Device unresponsive, giving up"
                );
                self.backoff.reset();
                let _ = command.reply.send(Err(SspError::DeviceUnresponsive {
                    address,
                    opcode,
                    attempts: command.attempts,
                    last_error: err.to_string(),
                }));
            }
            Err(err) => {
                debug!(
                    address = %format!("0x{:02X}", address),
                    opcode = command::name(opcode),
                    error = %err,
                    "Exchange failed"
                );
                let lost = matches!(err, SspError::LinkClosed);
                let _ = command.reply.send(Err(err));
                if lost {
                    self.lose_link();
                }
            }
        }
    }

    /// Stops the task after the link went away underneath it.
    fn lose_link(&mut self) {
        error!(queued = self.queue.len(), "Serial link lost, closing bus");
        self.link_lost = true;
        self.running = false;
    }

    /// One request/response exchange. Toggles the sequence bit on success.
    async fn exchange(&mut self, address: u8, payload: &[u8]) -> SspResult<Frame> {
        let sequence_bit = if payload.first() == Some(&command::SYNC) {
            true
        } else {
            *self.sequence.entry(address).or_insert(true)
        };
        let bytes = encode(address, sequence_bit, payload)?;

        if let Some(last) = self.last_exchange.get(&address) {
            sleep_until(*last + self.config.settle_interval).await;
        }

        self.decoder.clear();
        let result = self.transmit(address, sequence_bit, &bytes).await;
        self.last_exchange.insert(address, Instant::now());

        if result.is_ok() {
            self.sequence.insert(address, !sequence_bit);
        }
        result
    }

    async fn transmit(&mut self, address: u8, sequence_bit: bool, bytes: &[u8]) -> SspResult<Frame> {
        trace!(address = %format!("0x{:02X}", address), tx = ?bytes, "Frame out");

        self.link.write_all(bytes).await.map_err(write_error)?;
        self.link.flush().await.map_err(write_error)?;

        let deadline = Instant::now() + self.config.response_timeout;
        let mut buf = [0u8; READ_BUFFER_SIZE];

        loop {
            while let Some(frame) = self.decoder.next_frame() {
                if !frame.valid {
                    debug!(address = %format!("0x{:02X}", address), "Discarding frame with bad CRC");
                    continue;
                }
                if frame.address != address || frame.sequence_bit != sequence_bit {
                    debug!(
                        expected = %format!("0x{:02X}", address),
                        got = %format!("0x{:02X}", frame.address),
                        seq = frame.sequence_bit,
                        "Discarding unexpected frame"
                    );
                    continue;
                }
                trace!(address = %format!("0x{:02X}", address), rx = ?frame.payload, "Frame in");
                return Ok(frame);
            }

            match timeout_at(deadline, self.link.read(&mut buf)).await {
                Err(_) => {
                    return Err(SspError::Timeout {
                        address,
                        timeout_ms: self.config.response_timeout.as_millis() as u64,
                    })
                }
                Ok(Ok(0)) => return Err(SspError::LinkClosed),
                Ok(Ok(n)) => self.decoder.extend(&buf[..n]),
                Ok(Err(e)) => return Err(SspError::from(e)),
            }
        }
    }

    // =========================================================================
    // Polling
    // =========================================================================

    /// Polls every registered address once, yielding to queued commands.
    async fn poll_cycle(&mut self) {
        let addresses = self.addresses.clone();
        for address in addresses {
            self.drain_requests();
            if !self.running || !self.polling || !self.queue.is_empty() {
                return;
            }

            match self.exchange(address, &[command::POLL]).await {
                Ok(frame) => {
                    if frame.status() == Some(ResponseStatus::Ok) && !frame.data().is_empty() {
                        let _ = self.poll_tx.send(PollResponse { address, frame });
                    }
                }
                Err(SspError::LinkClosed) => {
                    self.lose_link();
                    return;
                }
                Err(err) => {
                    trace!(address = %format!("0x{:02X}", address), error = %err, "Poll failed");
                }
            }
        }
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    async fn shutdown(mut self) {
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            match request {
                BusRequest::Send(command) => self.queue.push_back(command),
                BusRequest::Close(reply) => self.close_waiters.push(reply),
                BusRequest::SequenceBit { reply, .. } => {
                    let _ = reply.send(None);
                }
                _ => {}
            }
        }

        let pending = self.queue.len();
        for command in self.queue.drain(..) {
            let err = if self.link_lost { SspError::LinkClosed } else { SspError::BusClosed };
            let _ = command.reply.send(Err(err));
        }

        if let Err(e) = self.link.shutdown().await {
            debug!(error = %e, "Link shutdown failed");
        }

        info!(pending_failed = pending, "SSP bus closed");

        for waiter in self.close_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }
}

fn write_error(err: std::io::Error) -> SspError {
    match err.kind() {
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::UnexpectedEof => SspError::LinkClosed,
        _ => SspError::WriteFailed(err.to_string()),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
