//! # Packet Codec
//!
//! Frame encoding/decoding for the SSP serial protocol.
//!
//! ## Frame Format
//! ```text
//! ┌──────┬───────────────────────────────────────────────────────────────┐
//! │ STX  │ stuffed( SEQID │ LENGTH │ DATA (LENGTH) │ CRC_L │ CRC_H )      │
//! │ 0x7F │          │        │                                           │
//! └──────┴──────────┼────────┼───────────────────────────────────────────┘
//!                   │        └── number of DATA bytes
//!                   └── address (7 bits) | sequence bit << 7
//!
//!  CRC-16: poly 0x8005, seed 0xFFFF, MSB first, over SEQID..DATA (unstuffed)
//!  Stuffing: every 0x7F after the leading STX is sent twice
//! ```
//!
//! ## Streaming
//! Bytes arrive from the serial port in arbitrary chunks. [`FrameDecoder`]
//! buffers them and yields complete frames one by one:
//!
//! ```text
//!   chunk 1: 7F 80 01          → None (need more)
//!   chunk 2: 11 65 82 7F 90    → Some(frame #1), then None
//!   chunk 3: 01 11 26 03       → Some(frame #2)
//!
//!   garbage: 00 13 7F 80 ...   → 00 13 discarded, decoding resumes at 7F
//! ```
//!
//! A lone 0x7F inside frame content can only be the start of a new frame,
//! so the partial frame before it is dropped.

use crate::error::{SspError, SspResult};
use crate::protocol::ResponseStatus;

/// Frame start marker.
pub const STX: u8 = 0x7F;

/// CRC seed.
pub const CRC_SEED: u16 = 0xFFFF;

/// CRC polynomial.
pub const CRC_POLY: u16 = 0x8005;

/// Largest DATA section a frame can carry.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

/// Unstuffed bytes needed before a frame is considered well-formed.
pub const MIN_FRAME_LEN: usize = 5;

// =============================================================================
// CRC and Stuffing
// =============================================================================

/// CRC-16 (poly 0x8005, seed 0xFFFF), one bit at a time, MSB first.
///
/// ## Example
/// ```rust
/// use kiosk_ssp::packet::crc16;
///
/// // SYNC to address 0 with the sequence bit set
/// assert_eq!(crc16(&[0x80, 0x01, 0x11]), 0x8265);
/// ```
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc = CRC_SEED;
    for &byte in bytes {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ CRC_POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Duplicates every marker byte.
pub fn stuff(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 4);
    for &byte in bytes {
        out.push(byte);
        if byte == STX {
            out.push(STX);
        }
    }
    out
}

/// Collapses each doubled marker back into one.
pub fn unstuff(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        out.push(bytes[i]);
        if bytes[i] == STX && bytes.get(i + 1) == Some(&STX) {
            i += 1;
        }
        i += 1;
    }
    out
}

// =============================================================================
// Encode
// =============================================================================

/// Builds the transmitted bytes for one frame.
///
/// ## Example
/// ```rust
/// use kiosk_ssp::packet::encode;
///
/// let bytes = encode(0x00, true, &[0x11]).unwrap();
/// assert_eq!(bytes, vec![0x7F, 0x80, 0x01, 0x11, 0x65, 0x82]);
/// ```
pub fn encode(address: u8, sequence_bit: bool, payload: &[u8]) -> SspResult<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(SspError::InvalidArgument(format!(
            "payload of {} bytes exceeds {}",
            payload.len(),
            MAX_PAYLOAD_LEN
        )));
    }

    let mut raw = Vec::with_capacity(payload.len() + 4);
    raw.push(seq_id(address, sequence_bit));
    raw.push(payload.len() as u8);
    raw.extend_from_slice(payload);

    let crc = crc16(&raw);
    raw.push((crc & 0xFF) as u8);
    raw.push((crc >> 8) as u8);

    let mut out = Vec::with_capacity(raw.len() + 2);
    out.push(STX);
    out.extend(stuff(&raw));
    Ok(out)
}

/// Combines address and sequence bit into the SEQID byte.
#[inline]
pub fn seq_id(address: u8, sequence_bit: bool) -> u8 {
    (address & 0x7F) | if sequence_bit { 0x80 } else { 0x00 }
}

// =============================================================================
// Frame
// =============================================================================

/// A decoded frame. `valid` is false when the checksum did not match or
/// the frame was too short to carry one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub address: u8,
    pub sequence_bit: bool,
    pub payload: Vec<u8>,
    pub valid: bool,
}

impl Frame {
    /// Generic response status (first payload byte).
    pub fn status(&self) -> Option<ResponseStatus> {
        self.payload.first().copied().and_then(ResponseStatus::from_byte)
    }

    /// Payload after the status byte.
    pub fn data(&self) -> &[u8] {
        self.payload.get(1..).unwrap_or(&[])
    }
}

// =============================================================================
// Decode
// =============================================================================

/// Result of one decode attempt over a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// A full frame was found; `consumed` bytes (including any garbage
    /// before its marker) can be dropped from the buffer.
    Frame { frame: Frame, consumed: usize },
    /// No full frame yet. The first `discard` bytes can never be part of
    /// one and should be dropped.
    Incomplete { discard: usize },
}

/// Finds and decodes the first frame in `bytes`.
pub fn decode(bytes: &[u8]) -> DecodeOutcome {
    let start = match bytes.iter().position(|&b| b == STX) {
        Some(pos) => pos,
        None => return DecodeOutcome::Incomplete { discard: bytes.len() },
    };

    let mut raw: Vec<u8> = Vec::with_capacity(16);
    let mut i = start + 1;

    while i < bytes.len() {
        let byte = bytes[i];
        if byte == STX {
            match bytes.get(i + 1) {
                // Can't tell a stuffed marker from a new frame yet.
                None => break,
                Some(&STX) => {
                    raw.push(STX);
                    i += 2;
                }
                // Unpaired marker: a new frame starts here.
                Some(_) => return DecodeOutcome::Incomplete { discard: i },
            }
        } else {
            raw.push(byte);
            i += 1;
        }

        if raw.len() >= 2 && raw.len() == raw[1] as usize + 4 {
            return DecodeOutcome::Frame {
                frame: frame_from_raw(&raw),
                consumed: i,
            };
        }
    }

    DecodeOutcome::Incomplete { discard: start }
}

/// Builds a frame from unstuffed `SEQID LENGTH DATA CRC_L CRC_H`.
fn frame_from_raw(raw: &[u8]) -> Frame {
    let seq = raw[0];
    let len = raw[1] as usize;
    let payload = raw[2..2 + len].to_vec();
    let received = u16::from(raw[2 + len]) | (u16::from(raw[3 + len]) << 8);
    let computed = crc16(&raw[..2 + len]);

    Frame {
        address: seq & 0x7F,
        sequence_bit: seq & 0x80 != 0,
        payload,
        valid: raw.len() >= MIN_FRAME_LEN && received == computed,
    }
}

// =============================================================================
// Streaming Decoder
// =============================================================================

/// Receive buffer that turns a byte stream into frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns the next complete frame, discarding garbage on the way.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match decode(&self.buffer) {
                DecodeOutcome::Frame { frame, consumed } => {
                    self.buffer.drain(..consumed);
                    return Some(frame);
                }
                DecodeOutcome::Incomplete { discard: 0 } => return None,
                DecodeOutcome::Incomplete { discard } => {
                    self.buffer.drain(..discard);
                }
            }
        }
    }

    /// Drops everything buffered.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Bytes waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(bytes: &[u8]) -> Frame {
        match decode(bytes) {
            DecodeOutcome::Frame { frame, consumed } => {
                assert_eq!(consumed, bytes.len());
                frame
            }
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[test]
    fn test_crc_check_value() {
        assert_eq!(crc16(b"123456789"), 0xAEE7);
    }

    #[test]
    fn test_encode_known_frames() {
        assert_eq!(
            encode(0x00, true, &[0x11]).unwrap(),
            vec![0x7F, 0x80, 0x01, 0x11, 0x65, 0x82]
        );
        assert_eq!(
            encode(0x10, true, &[0x11]).unwrap(),
            vec![0x7F, 0x90, 0x01, 0x11, 0x26, 0x03]
        );
        assert_eq!(
            encode(0x00, false, &[0x07]).unwrap(),
            vec![0x7F, 0x00, 0x01, 0x07, 0x11, 0x88]
        );
    }

    #[test]
    fn test_encode_stuffs_crc_byte() {
        // CRC low byte of this frame is 0x7F and must be doubled.
        let bytes = encode(0x00, false, &[0xF0, 0xEA]).unwrap();
        assert_eq!(bytes, vec![0x7F, 0x00, 0x02, 0xF0, 0xEA, 0x7F, 0x7F, 0xA2]);

        let frame = decode_one(&bytes);
        assert!(frame.valid);
        assert_eq!(frame.payload, vec![0xF0, 0xEA]);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            encode(0x00, false, &payload),
            Err(SspError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_roundtrip_recovers_fields() {
        let payloads: Vec<Vec<u8>> = vec![
            vec![0xF0],
            vec![0x7F],
            vec![0x7F, 0x7F, 0x7F],
            vec![0xF0, 0xEE, 0x02, 0x7F, 0x00],
            (0..=254u8).collect(),
            vec![0x7F; MAX_PAYLOAD_LEN],
        ];
        for payload in payloads {
            for (address, bit) in [(0x00, true), (0x10, false), (0x7F, true)] {
                let frame = decode_one(&encode(address, bit, &payload).unwrap());
                assert!(frame.valid);
                assert_eq!(frame.address, address);
                assert_eq!(frame.sequence_bit, bit);
                assert_eq!(frame.payload, payload);
            }
        }
    }

    #[test]
    fn test_single_bit_flip_never_yields_valid_frame() {
        let bytes = encode(0x10, true, &[0xF0, 0xBF, 0x01, 0x32, 0x00, 0x00, 0x00]).unwrap();

        for index in 1..bytes.len() {
            for bit in 0..8 {
                let mut corrupted = bytes.clone();
                corrupted[index] ^= 1 << bit;
                if let DecodeOutcome::Frame { frame, .. } = decode(&corrupted) {
                    assert!(!frame.valid, "flip at byte {index} bit {bit} decoded as valid");
                }
            }
        }
    }

    #[test]
    fn test_payload_bit_flip_reports_invalid() {
        // No byte here is one bit away from the marker, so every flip in
        // DATA or CRC still frames correctly and must fail the checksum.
        let bytes = encode(0x00, false, &[0xF0, 0x01, 0x02, 0x10]).unwrap();
        assert!(!bytes[1..].contains(&STX));

        for index in 3..bytes.len() {
            for bit in 0..8 {
                let mut corrupted = bytes.clone();
                corrupted[index] ^= 1 << bit;
                if corrupted[index] == STX {
                    continue;
                }
                let frame = decode_one(&corrupted);
                assert!(!frame.valid, "flip at byte {index} bit {bit}");
            }
        }
    }

    #[test]
    fn test_stuff_unstuff_inverse() {
        let samples: Vec<Vec<u8>> = vec![
            vec![],
            vec![0x7F],
            vec![0x7F, 0x7F],
            vec![0x7F, 0x7F, 0x7F, 0x7F, 0x7F],
            vec![0x00, 0x7F, 0x01, 0x7F, 0x7F, 0x02],
            (0..=255u8).collect(),
        ];
        for sample in samples {
            let stuffed = stuff(&sample);
            assert_eq!(stuffed.len(), sample.len() + sample.iter().filter(|&&b| b == STX).count());
            assert_eq!(unstuff(&stuffed), sample);
        }
    }

    #[test]
    fn test_zero_length_frame_is_invalid() {
        // SEQID 00, LENGTH 00 and a matching CRC: still too short to count.
        let bytes = encode(0x00, false, &[]).unwrap();
        let frame = decode_one(&bytes);
        assert!(!frame.valid);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_partial_input_needs_more_data() {
        let bytes = encode(0x00, true, &[0x11]).unwrap();
        for cut in 1..bytes.len() {
            assert_eq!(
                decode(&bytes[..cut]),
                DecodeOutcome::Incomplete { discard: 0 }
            );
        }
        assert_eq!(decode(&[]), DecodeOutcome::Incomplete { discard: 0 });
    }

    #[test]
    fn test_decoder_byte_by_byte_with_stuffed_tail() {
        let bytes = encode(0x00, false, &[0xF0, 0xEA]).unwrap();
        let mut decoder = FrameDecoder::new();

        for (i, byte) in bytes.iter().enumerate() {
            decoder.extend(&[*byte]);
            let frame = decoder.next_frame();
            if i + 1 < bytes.len() {
                assert!(frame.is_none(), "frame yielded early at byte {i}");
            } else {
                assert_eq!(frame.unwrap().payload, vec![0xF0, 0xEA]);
            }
        }
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_coalesced_frames() {
        let mut stream = encode(0x00, true, &[0xF0]).unwrap();
        stream.extend(encode(0x10, false, &[0xF0, 0xD3]).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream);

        let first = decoder.next_frame().unwrap();
        assert_eq!(first.address, 0x00);
        let second = decoder.next_frame().unwrap();
        assert_eq!(second.address, 0x10);
        assert_eq!(second.data(), &[0xD3]);
        assert!(decoder.next_frame().is_none());
    }

    #[test]
    fn test_decoder_resyncs_after_garbage() {
        let mut stream = vec![0x00, 0x13, 0xAA];
        stream.extend(encode(0x10, true, &[0xF0]).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream);
        let frame = decoder.next_frame().unwrap();
        assert!(frame.valid);
        assert_eq!(frame.address, 0x10);
    }

    #[test]
    fn test_decoder_drops_truncated_frame_at_new_marker() {
        // A frame cut off mid-way, then a complete one.
        let mut stream = vec![0x7F, 0x80, 0x05, 0xF0];
        stream.extend(encode(0x10, true, &[0x11]).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream);
        let frame = decoder.next_frame().unwrap();
        assert!(frame.valid);
        assert_eq!(frame.address, 0x10);
        assert_eq!(frame.payload, vec![0x11]);
    }

    #[test]
    fn test_decoder_discards_pure_noise() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0x01, 0x02, 0x03]);
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_frame_status_and_data() {
        let frame = decode_one(&encode(0x00, true, &[0xF0, 0xEE, 0x02]).unwrap());
        assert_eq!(frame.status(), Some(ResponseStatus::Ok));
        assert_eq!(frame.data(), &[0xEE, 0x02]);

        let empty = Frame {
            address: 0,
            sequence_bit: false,
            payload: vec![],
            valid: false,
        };
        assert_eq!(empty.status(), None);
        assert!(empty.data().is_empty());
    }
}
