//! # Simulated Devices
//!
//! In-memory SSP slaves for tests. A [`SimBus`] serves any number of
//! [`SimDevice`]s over a `tokio::io::duplex` pipe, so the real bus task,
//! codec and drivers run unchanged on top of it.
//!
//! ```text
//!   Bus task ──► DuplexStream ══ DuplexStream ──► serve task
//!                                                   │ decode, route by address
//!                                                   ▼
//!                                       SimDevice (scripted replies,
//!                                       poll event queue, mute/corrupt)
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;

use crate::error::{SspError, SspResult};
use crate::link::{Connector, SerialLink};
use crate::packet::{crc16, encode, seq_id, stuff, FrameDecoder, STX};
use crate::protocol::{command, BILL_VALIDATOR_ADDRESS, COIN_HANDLER_ADDRESS};

const OK: u8 = 0xF0;

/// One request as seen by a simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimRequest {
    pub sequence_bit: bool,
    pub payload: Vec<u8>,
}

impl SimRequest {
    pub fn opcode(&self) -> u8 {
        self.payload.first().copied().unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    defaults: HashMap<u8, Vec<u8>>,
    once: HashMap<u8, VecDeque<Vec<u8>>>,
    events: VecDeque<Vec<u8>>,
    mute: u32,
    ignored: HashSet<u8>,
    corrupt: u32,
    received: Vec<SimRequest>,
}

// =============================================================================
// Simulated Device
// =============================================================================

/// A scripted SSP slave. Clones share state, so a test keeps one clone to
/// script and inspect while the bus owns another.
///
/// Every command answers `OK` unless scripted otherwise. POLL answers
/// `OK` followed by the next queued event block, if any.
#[derive(Debug, Clone)]
pub struct SimDevice {
    address: u8,
    state: Arc<Mutex<DeviceState>>,
}

impl SimDevice {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            state: Arc::new(Mutex::new(DeviceState::default())),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Sets the reply (status byte included) for every `opcode` request.
    pub fn respond(&self, opcode: u8, response: Vec<u8>) {
        self.lock().defaults.insert(opcode, response);
    }

    /// Queues a reply used for the next `opcode` request only.
    pub fn respond_once(&self, opcode: u8, response: Vec<u8>) {
        self.lock().once.entry(opcode).or_default().push_back(response);
    }

    /// Queues event bytes for a future POLL reply.
    pub fn push_event(&self, data: Vec<u8>) {
        self.lock().events.push_back(data);
    }

    /// Drops the next `count` requests without replying.
    pub fn mute(&self, count: u32) {
        self.lock().mute = count;
    }

    /// Never answers `opcode` from now on.
    pub fn ignore(&self, opcode: u8) {
        self.lock().ignored.insert(opcode);
    }

    /// Sends the next `count` replies with a broken CRC.
    pub fn corrupt(&self, count: u32) {
        self.lock().corrupt = count;
    }

    /// All requests received, in order.
    pub fn received(&self) -> Vec<SimRequest> {
        self.lock().received.clone()
    }

    /// Opcodes received, skipping POLL.
    pub fn commands(&self) -> Vec<u8> {
        self.lock()
            .received
            .iter()
            .map(SimRequest::opcode)
            .filter(|&op| op != command::POLL)
            .collect()
    }

    /// Requests received that carried `opcode`.
    pub fn count(&self, opcode: u8) -> usize {
        self.lock()
            .received
            .iter()
            .filter(|r| r.opcode() == opcode)
            .count()
    }

    /// Requests with a given opcode, payload included.
    pub fn requests(&self, opcode: u8) -> Vec<Vec<u8>> {
        self.lock()
            .received
            .iter()
            .filter(|r| r.opcode() == opcode)
            .map(|r| r.payload.clone())
            .collect()
    }

    pub fn clear_received(&self) {
        self.lock().received.clear();
    }

    /// Encoded reply bytes, `None` while muted.
    fn reply_to(&self, sequence_bit: bool, payload: &[u8]) -> Option<Vec<u8>> {
        let mut state = self.lock();
        state.received.push(SimRequest {
            sequence_bit,
            payload: payload.to_vec(),
        });

        if state.mute > 0 {
            state.mute -= 1;
            return None;
        }

        let opcode = payload.first().copied().unwrap_or_default();
        if state.ignored.contains(&opcode) {
            return None;
        }
        let response = if let Some(reply) = state.once.get_mut(&opcode).and_then(VecDeque::pop_front) {
            reply
        } else if opcode == command::POLL {
            let mut reply = vec![OK];
            if let Some(events) = state.events.pop_front() {
                reply.extend(events);
            }
            reply
        } else {
            state.defaults.get(&opcode).cloned().unwrap_or_else(|| vec![OK])
        };

        if state.corrupt > 0 {
            state.corrupt -= 1;
            return Some(corrupted_frame(self.address, sequence_bit, &response));
        }

        encode(self.address, sequence_bit, &response).ok()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A well-framed reply whose CRC does not match.
fn corrupted_frame(address: u8, sequence_bit: bool, payload: &[u8]) -> Vec<u8> {
    let mut raw = vec![seq_id(address, sequence_bit), payload.len() as u8];
    raw.extend_from_slice(payload);
    let crc = crc16(&raw) ^ 0x0101;
    raw.push((crc & 0xFF) as u8);
    raw.push((crc >> 8) as u8);

    let mut out = vec![STX];
    out.extend(stuff(&raw));
    out
}

// =============================================================================
// Presets
// =============================================================================

impl SimDevice {
    /// Bill validator at 0x00 with EUR channels 5, 10, 20, 50 (values in
    /// euros, real multiplier 100).
    pub fn bill_validator() -> Self {
        let device = SimDevice::new(BILL_VALIDATOR_ADDRESS);
        device.respond(
            command::SETUP_REQUEST,
            bill_setup_response("EUR", &[5, 10, 20, 50], 100, 8),
        );
        device
    }

    /// Coin handler at 0x10 with EUR coins 10, 20, 50, 100, 200 cents.
    pub fn coin_handler() -> Self {
        let device = SimDevice::new(COIN_HANDLER_ADDRESS);
        device.respond(
            command::SETUP_REQUEST,
            coin_setup_response(&[(10, "EUR"), (20, "EUR"), (50, "EUR"), (100, "EUR"), (200, "EUR")], 8),
        );
        device
    }
}

/// Builds a bill validator SETUP_REQUEST reply.
pub fn bill_setup_response(currency: &str, values: &[u8], multiplier: u32, protocol: u8) -> Vec<u8> {
    let n = values.len();
    let mut reply = vec![OK, 0x00];
    reply.extend_from_slice(b"0430");
    reply.extend_from_slice(currency.as_bytes());
    reply.extend_from_slice(&[0x00, 0x00, 0x01]);
    reply.push(n as u8);
    reply.extend_from_slice(values);
    reply.extend(std::iter::repeat(0x02).take(n));
    reply.extend_from_slice(&multiplier.to_be_bytes()[1..]);
    reply.push(protocol);
    if protocol >= 6 {
        for _ in 0..n {
            reply.extend_from_slice(currency.as_bytes());
        }
        for &value in values {
            reply.extend_from_slice(&u32::from(value).to_le_bytes());
        }
    }
    reply
}

/// Builds a coin handler SETUP_REQUEST reply.
pub fn coin_setup_response(coins: &[(u32, &str)], protocol: u8) -> Vec<u8> {
    let n = coins.len();
    let mut reply = vec![OK, 0x09];
    reply.extend_from_slice(b"0620");
    reply.extend_from_slice(coins.first().map(|(_, c)| c.as_bytes()).unwrap_or(b"EUR"));
    reply.extend_from_slice(&[0x00, 0x00, 0x01]);
    reply.push(n as u8);
    reply.extend(coins.iter().map(|(value, _)| u8::try_from(*value).unwrap_or(0)));
    reply.extend(std::iter::repeat(0x02).take(n));
    reply.extend_from_slice(&[0x00, 0x00, 0x01]);
    reply.push(protocol);
    for (value, currency) in coins {
        reply.extend_from_slice(&value.to_le_bytes());
        reply.extend_from_slice(currency.as_bytes());
    }
    reply
}

/// VALUE_ADDED event block with one total per currency.
pub fn value_added_event(totals: &[(u32, &str)]) -> Vec<u8> {
    let mut event = vec![0xBF, totals.len() as u8];
    for (value, currency) in totals {
        event.extend_from_slice(&value.to_le_bytes());
        event.extend_from_slice(currency.as_bytes());
    }
    event
}

// =============================================================================
// Simulated Bus
// =============================================================================

#[derive(Debug, Default)]
struct BusState {
    devices: HashMap<u8, SimDevice>,
    log: Vec<(u8, Vec<u8>)>,
}

/// The shared line. Each [`SimBus::link`] call starts a fresh serve task.
#[derive(Debug, Clone)]
pub struct SimBus {
    state: Arc<Mutex<BusState>>,
    opens: Arc<AtomicUsize>,
    /// Bumped by [`SimBus::disconnect`]; every serve task alive at that
    /// moment drops its end of the pipe.
    cuts: Arc<watch::Sender<u64>>,
}

impl Default for SimBus {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            opens: Arc::default(),
            cuts: Arc::new(watch::channel(0).0),
        }
    }
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cuts every link handed out so far, like an unplugged cable. The
    /// host side sees end of file on read and a broken pipe on write.
    /// Links opened afterwards work normally.
    pub fn disconnect(&self) {
        self.cuts.send_modify(|generation| *generation += 1);
    }

    pub fn attach(&self, device: SimDevice) {
        self.lock().devices.insert(device.address(), device);
    }

    /// Every request seen on the line as `(address, payload)`.
    pub fn log(&self) -> Vec<(u8, Vec<u8>)> {
        self.lock().log.clone()
    }

    /// Number of links handed out.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn connector(&self) -> SimConnector {
        SimConnector {
            bus: self.clone(),
            fail: false,
        }
    }

    /// Host end of a new duplex pipe served by this bus.
    pub fn link(&self) -> Box<dyn SerialLink> {
        let (host, mut device_end) = tokio::io::duplex(1024);
        let bus = self.clone();
        let mut cut = self.cuts.subscribe();
        self.opens.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            let mut buf = [0u8; 256];
            loop {
                let n = tokio::select! {
                    read = device_end.read(&mut buf) => match read {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    },
                    _ = cut.changed() => break,
                };
                decoder.extend(&buf[..n]);

                while let Some(frame) = decoder.next_frame() {
                    if !frame.valid {
                        continue;
                    }
                    let device = {
                        let mut state = bus.lock();
                        state.log.push((frame.address, frame.payload.clone()));
                        state.devices.get(&frame.address).cloned()
                    };
                    let reply = device.and_then(|d| d.reply_to(frame.sequence_bit, &frame.payload));
                    if let Some(bytes) = reply {
                        if device_end.write_all(&bytes).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Box::new(host)
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Connector handing out [`SimBus`] links.
#[derive(Debug, Clone)]
pub struct SimConnector {
    bus: SimBus,
    fail: bool,
}

impl SimConnector {
    /// A connector whose `open` always fails, like a missing port.
    pub fn failing() -> Self {
        Self {
            bus: SimBus::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl Connector for SimConnector {
    fn describe(&self) -> String {
        "simulator".to_string()
    }

    async fn open(&self) -> SspResult<Box<dyn SerialLink>> {
        if self.fail {
            self.bus.opens.fetch_add(1, Ordering::SeqCst);
            return Err(SspError::PortOpenFailed {
                port: "sim".to_string(),
                reason: "no such device".to_string(),
            });
        }
        Ok(self.bus.link())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{decode, DecodeOutcome};

    #[test]
    fn test_corrupted_frame_fails_crc() {
        let bytes = corrupted_frame(0x00, true, &[0xF0]);
        match decode(&bytes) {
            DecodeOutcome::Frame { frame, .. } => assert!(!frame.valid),
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[test]
    fn test_scripted_replies() {
        let device = SimDevice::new(0x10);
        device.respond(command::ENABLE, vec![0xF5]);
        device.respond_once(command::ENABLE, vec![0xF0]);

        let first = device.reply_to(true, &[command::ENABLE]).unwrap();
        let second = device.reply_to(false, &[command::ENABLE]).unwrap();
        assert_eq!(first, encode(0x10, true, &[0xF0]).unwrap());
        assert_eq!(second, encode(0x10, false, &[0xF5]).unwrap());
        assert_eq!(device.count(command::ENABLE), 2);
    }

    #[test]
    fn test_bill_setup_layout() {
        let reply = bill_setup_response("EUR", &[5, 10], 100, 8);
        let data = &reply[1..];
        assert_eq!(data[11], 2);
        assert_eq!(&data[12..14], &[5, 10]);
        assert_eq!(&data[16..19], &[0x00, 0x00, 0x64]);
        assert_eq!(data[19], 8);
        assert_eq!(data.len(), 16 + 9 * 2);
    }
}
