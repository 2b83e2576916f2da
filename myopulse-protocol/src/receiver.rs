//! Byte-stream receiver: assembles validated frames out of a ring buffer.
//!
//! The transport driver pushes received bytes in from its interrupt
//! context via [`Receiver::feed`]; the main loop calls
//! [`Receiver::poll`] once per iteration. `poll` never blocks: when a
//! frame header has been seen but fewer than LENGTH bytes are buffered
//! it returns `None` and is simply re-entered on the next iteration. A
//! truncated frame is abandoned after 200 ms so a lost byte cannot stall
//! the protocol indefinitely.
//!
//! All framing failures (bad header, unknown token, bad length, CRC
//! mismatch, timeout) are silent: the receiver resynchronizes on the
//! next 0xAA and the host times out on the missing acknowledgment.

use heapless::Deque;

use crate::frame::{crc8_step, Frame, Token, HEAD1, HEAD2, MAX_PAYLOAD_SIZE};

/// Ring buffer capacity in bytes
pub const RX_BUFFER_SIZE: usize = 128;

/// How long to wait for LENGTH bytes before abandoning a frame
pub const LENGTH_TIMEOUT_MS: u32 = 200;

// LENGTH counts TYPE + PAYLOAD + CRC slot
const MIN_WIRE_LENGTH: u8 = 2;
const MAX_WIRE_LENGTH: u8 = (2 + MAX_PAYLOAD_SIZE) as u8;

/// Receiver state
///
/// Mirrors the frame layout: each header byte is its own state so a
/// corrupted stream can resynchronize on the next 0xAA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    /// Scanning for HEAD1
    Idle,
    /// HEAD1 consumed, expecting HEAD2
    Head1Seen,
    /// HEAD2 consumed, expecting a valid token
    Head2Seen,
    /// Token captured, expecting the LENGTH byte
    TokenValid(Token),
    /// LENGTH captured; waiting for that many further bytes, then the
    /// checksum check runs over the buffered bytes without consuming
    LengthCheck {
        token: Token,
        length: u8,
        started_ms: u32,
    },
}

/// Frame receiver with internal ring buffer
#[derive(Debug)]
pub struct Receiver {
    buf: Deque<u8, RX_BUFFER_SIZE>,
    state: RxState,
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Receiver {
    /// Create a new receiver
    pub fn new() -> Self {
        Self {
            buf: Deque::new(),
            state: RxState::Idle,
        }
    }

    /// Push one received byte into the ring buffer
    ///
    /// Safe to call from the transport interrupt context relative to
    /// this struct alone; callers sharing the receiver with the main
    /// loop must wrap it in their critical-section cell. A full buffer
    /// drops the byte; the damaged frame then fails its CRC or length
    /// wait and is discarded.
    pub fn feed(&mut self, byte: u8) {
        let _ = self.buf.push_back(byte);
    }

    /// Push a slice of received bytes
    pub fn feed_slice(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.feed(byte);
        }
    }

    /// Number of bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop all buffered bytes and resynchronize
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = RxState::Idle;
    }

    /// Run the framing state machine over the buffered bytes
    ///
    /// `now_ms` is a monotonic millisecond tick used only for the
    /// length-wait timeout. Returns the next complete, CRC-validated
    /// frame, or `None` when more bytes are needed.
    pub fn poll(&mut self, now_ms: u32) -> Option<Frame> {
        loop {
            match self.state {
                RxState::Idle => {
                    let byte = self.buf.pop_front()?;
                    if byte == HEAD1 {
                        self.state = RxState::Head1Seen;
                    }
                }
                RxState::Head1Seen => {
                    let byte = self.buf.pop_front()?;
                    if byte == HEAD2 {
                        self.state = RxState::Head2Seen;
                    } else if byte != HEAD1 {
                        // A repeated 0xAA keeps us here (re-sync);
                        // anything else drops back to scanning
                        self.state = RxState::Idle;
                    }
                }
                RxState::Head2Seen => {
                    let byte = self.buf.pop_front()?;
                    if let Some(token) = Token::from_byte(byte) {
                        self.state = RxState::TokenValid(token);
                    } else if byte == HEAD1 {
                        self.state = RxState::Head1Seen;
                    } else {
                        self.state = RxState::Idle;
                    }
                }
                RxState::TokenValid(token) => {
                    let length = self.buf.pop_front()?;
                    if (MIN_WIRE_LENGTH..=MAX_WIRE_LENGTH).contains(&length) {
                        self.state = RxState::LengthCheck {
                            token,
                            length,
                            started_ms: now_ms,
                        };
                    } else {
                        self.state = RxState::Idle;
                    }
                }
                RxState::LengthCheck {
                    token,
                    length,
                    started_ms,
                } => {
                    if self.buf.len() < length as usize {
                        if now_ms.wrapping_sub(started_ms) > LENGTH_TIMEOUT_MS {
                            // Truncated frame; abandon it and rescan
                            // whatever bytes did arrive
                            self.state = RxState::Idle;
                            continue;
                        }
                        return None;
                    }

                    if let Some(frame) = self.checksum_check(token, length) {
                        self.state = RxState::Idle;
                        return Some(frame);
                    }
                    self.state = RxState::Idle;
                }
            }
        }
    }

    /// Verify the buffered frame body and consume it on success
    ///
    /// The CRC runs over the already-consumed prefix (HEAD1, HEAD2,
    /// TOKEN, LENGTH) and then over `length` buffered bytes in place.
    /// Only when the result is zero are the type and payload popped;
    /// the trailing CRC byte is consumed but never exposed as payload.
    fn checksum_check(&mut self, token: Token, length: u8) -> Option<Frame> {
        let mut crc = 0;
        for byte in [HEAD1, HEAD2, token.to_byte(), length] {
            crc = crc8_step(crc, byte);
        }
        for &byte in self.buf.iter().take(length as usize) {
            crc = crc8_step(crc, byte);
        }
        if crc != 0 {
            return None;
        }

        let frame_type = self.buf.pop_front()?;
        let mut payload = heapless::Vec::new();
        for _ in 0..length - MIN_WIRE_LENGTH {
            let byte = self.buf.pop_front()?;
            // Capacity is MAX_PAYLOAD_SIZE and length is range-checked
            let _ = payload.push(byte);
        }
        // CRC slot counted by LENGTH, already verified above
        let _ = self.buf.pop_front();

        Some(Frame {
            token,
            frame_type,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameError;

    fn encoded(token: Token, frame_type: u8, payload: &[u8]) -> heapless::Vec<u8, 64> {
        let frame = Frame::new(token, frame_type, payload).unwrap();
        let mut out = heapless::Vec::new();
        out.extend_from_slice(&frame.encode_to_vec().unwrap()).unwrap();
        out
    }

    #[test]
    fn test_roundtrip() {
        let bytes = encoded(Token::Device, 0x92, &[1, 45]);
        let mut rx = Receiver::new();
        rx.feed_slice(&bytes);

        let frame = rx.poll(0).unwrap();
        assert_eq!(frame.token, Token::Device);
        assert_eq!(frame.frame_type, 0x92);
        assert_eq!(&frame.payload[..], &[1, 45]);
        // CRC slot is not exposed as payload
        assert_eq!(frame.payload.len(), 2);
        assert_eq!(rx.buffered(), 0);
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let bytes = encoded(Token::General, 0xA3, &[]);
        let mut rx = Receiver::new();
        rx.feed_slice(&bytes);

        let frame = rx.poll(0).unwrap();
        assert_eq!(frame.token, Token::General);
        assert_eq!(frame.frame_type, 0xA3);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_single_bit_flip_rejected() {
        // Payload chosen without 0xAA so a corrupted frame cannot
        // accidentally resynchronize into a second valid frame
        let bytes = encoded(Token::Device, 0x91, &[1, 2, 3, 4]);

        for i in 0..bytes.len() {
            for bit in 0..8 {
                let mut corrupted = bytes.clone();
                corrupted[i] ^= 1 << bit;

                let mut rx = Receiver::new();
                rx.feed_slice(&corrupted);
                assert_eq!(
                    rx.poll(0),
                    None,
                    "flip of byte {} bit {} was accepted",
                    i,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_recovers_after_corrupt_frame() {
        let mut corrupt = encoded(Token::Device, 0x93, &[]);
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;
        let good = encoded(Token::Device, 0x95, &[]);

        let mut rx = Receiver::new();
        rx.feed_slice(&corrupt);
        rx.feed_slice(&good);

        let frame = rx.poll(0).unwrap();
        assert_eq!(frame.frame_type, 0x95);
    }

    #[test]
    fn test_resync_after_garbage() {
        let bytes = encoded(Token::Device, 0x94, &[]);
        let mut rx = Receiver::new();
        // Garbage including a lone 0xAA and a repeated 0xAA before a
        // real header
        rx.feed_slice(&[0x00, 0xAA, 0x12, 0xFF, 0xAA]);
        rx.feed_slice(&bytes);

        let frame = rx.poll(0).unwrap();
        assert_eq!(frame.frame_type, 0x94);
    }

    #[test]
    fn test_repeated_head1_resyncs() {
        let bytes = encoded(Token::Device, 0x93, &[0b11]);
        let mut rx = Receiver::new();
        rx.feed(HEAD1); // stray first header byte
        rx.feed_slice(&bytes);

        let frame = rx.poll(0).unwrap();
        assert_eq!(frame.frame_type, 0x93);
    }

    #[test]
    fn test_unknown_token_discarded() {
        let mut rx = Receiver::new();
        rx.feed_slice(&[HEAD1, HEAD2, 0x42, 0x02, 0x93, 0x00]);
        assert_eq!(rx.poll(0), None);
    }

    #[test]
    fn test_length_out_of_range_discarded() {
        let mut rx = Receiver::new();
        rx.feed_slice(&[HEAD1, HEAD2, 0x69, 0xFF]);
        assert_eq!(rx.poll(0), None);
        // Receiver is back in Idle and accepts a following frame
        rx.feed_slice(&encoded(Token::Device, 0x95, &[]));
        assert!(rx.poll(0).is_some());
    }

    #[test]
    fn test_length_wait_is_cooperative() {
        let bytes = encoded(Token::Device, 0x91, &[10, 20, 30]);
        let (head, tail) = bytes.split_at(5);

        let mut rx = Receiver::new();
        rx.feed_slice(head);
        // Not enough bytes yet: poll returns control to the caller
        assert_eq!(rx.poll(0), None);
        assert_eq!(rx.poll(100), None);

        // Rest arrives within the timeout
        rx.feed_slice(tail);
        let frame = rx.poll(150).unwrap();
        assert_eq!(&frame.payload[..], &[10, 20, 30]);
    }

    #[test]
    fn test_length_timeout_abandons_frame() {
        let bytes = encoded(Token::Device, 0x91, &[10, 20, 30]);

        let mut rx = Receiver::new();
        rx.feed_slice(&bytes[..5]); // header + token + length, one body byte
        assert_eq!(rx.poll(0), None);

        // More than 200 ms without the remaining bytes
        assert_eq!(rx.poll(201), None);

        // A complete frame afterwards still parses
        rx.feed_slice(&encoded(Token::Device, 0x95, &[]));
        let frame = rx.poll(202).unwrap();
        assert_eq!(frame.frame_type, 0x95);
    }

    #[test]
    fn test_max_payload_roundtrip() {
        let payload = [0x5Au8; MAX_PAYLOAD_SIZE];
        let frame = Frame::new(Token::Device, 0x91, &payload).unwrap();
        let bytes = frame.encode_to_vec().unwrap();

        let mut rx = Receiver::new();
        rx.feed_slice(&bytes);
        let parsed = rx.poll(0).unwrap();
        assert_eq!(parsed.payload.len(), MAX_PAYLOAD_SIZE);

        // One byte past the cap cannot even be constructed
        let too_big = [0u8; MAX_PAYLOAD_SIZE + 1];
        assert_eq!(
            Frame::new(Token::Device, 0x91, &too_big),
            Err(FrameError::PayloadTooLarge)
        );
    }
}
