//! Frame encoding and the CRC-8 used by the wire protocol.
//!
//! Frame format:
//! - HEAD1 (1 byte): 0xAA synchronization byte
//! - HEAD2 (1 byte): 0x55 synchronization byte
//! - TOKEN (1 byte): command namespace (general or device-specific)
//! - LENGTH (1 byte): 2 + payload length (TYPE + PAYLOAD + CRC slot)
//! - TYPE (1 byte): command/ack code
//! - PAYLOAD (0-57 bytes): type-specific data
//! - CRC8 (1 byte): CRC over HEAD1..PAYLOAD, see [`crc8`]

use heapless::Vec;

/// First frame synchronization byte
pub const HEAD1: u8 = 0xAA;

/// Second frame synchronization byte
pub const HEAD2: u8 = 0x55;

/// Maximum payload size in bytes
pub const MAX_PAYLOAD_SIZE: usize = 57;

/// Maximum complete frame size (HEAD1 + HEAD2 + TOKEN + LENGTH + TYPE + MAX_PAYLOAD + CRC)
pub const MAX_FRAME_SIZE: usize = 2 + 1 + 1 + 1 + MAX_PAYLOAD_SIZE + 1;

/// Command namespace discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Token {
    /// Common commands shared by the product family (version, serial, battery)
    General,
    /// Stimulation and EMG commands specific to this device
    Device,
}

// Wire format values
const TOKEN_GENERAL: u8 = 0xF0;
const TOKEN_DEVICE: u8 = 0x69;

impl Token {
    /// Parse a token from its wire format byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            TOKEN_GENERAL => Some(Token::General),
            TOKEN_DEVICE => Some(Token::Device),
            _ => None,
        }
    }

    /// Convert to wire format byte
    pub fn to_byte(self) -> u8 {
        match self {
            Token::General => TOKEN_GENERAL,
            Token::Device => TOKEN_DEVICE,
        }
    }
}

/// Errors that can occur during frame construction or encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Payload exceeds maximum allowed size
    PayloadTooLarge,
    /// Buffer too small for encoding
    BufferTooSmall,
}

/// Advance a running CRC-8 by one byte
///
/// Polynomial 0x07, MSB first, zero initial value, no final XOR. With
/// this construction the CRC of a message followed by its own CRC byte
/// is zero, so the receiver can validate a buffered frame without
/// copying it first.
#[inline]
pub fn crc8_step(crc: u8, byte: u8) -> u8 {
    let mut crc = crc ^ byte;
    for _ in 0..8 {
        crc = if crc & 0x80 != 0 {
            (crc << 1) ^ 0x07
        } else {
            crc << 1
        };
    }
    crc
}

/// CRC-8 over a byte slice, seeded at zero
pub fn crc8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |crc, &b| crc8_step(crc, b))
}

/// A validated, checksum-passed unit of the wire protocol
///
/// A `Frame` is only materialized after the CRC check succeeds (when
/// decoding) or from well-formed fields (when encoding a response). It
/// is transient: produced by the [`Receiver`](crate::Receiver) or a
/// handler, consumed immediately, never retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command namespace
    pub token: Token,
    /// Command/ack code
    pub frame_type: u8,
    /// Payload data (CRC slot excluded)
    pub payload: Vec<u8, MAX_PAYLOAD_SIZE>,
}

impl Frame {
    /// Create a new frame with the given token, type, and payload
    pub fn new(token: Token, frame_type: u8, payload: &[u8]) -> Result<Self, FrameError> {
        let mut payload_vec = Vec::new();
        payload_vec
            .extend_from_slice(payload)
            .map_err(|_| FrameError::PayloadTooLarge)?;

        Ok(Self {
            token,
            frame_type,
            payload: payload_vec,
        })
    }

    /// Create a frame with no payload
    pub fn empty(token: Token, frame_type: u8) -> Self {
        Self {
            token,
            frame_type,
            payload: Vec::new(),
        }
    }

    /// Wire value of the LENGTH field: TYPE + PAYLOAD + CRC slot
    pub fn wire_length(&self) -> u8 {
        (2 + self.payload.len()) as u8
    }

    /// Encode this frame into a byte buffer
    ///
    /// Returns the number of bytes written.
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, FrameError> {
        let frame_len = 5 + self.payload.len() + 1;
        if buffer.len() < frame_len {
            return Err(FrameError::BufferTooSmall);
        }

        buffer[0] = HEAD1;
        buffer[1] = HEAD2;
        buffer[2] = self.token.to_byte();
        buffer[3] = self.wire_length();
        buffer[4] = self.frame_type;
        buffer[5..5 + self.payload.len()].copy_from_slice(&self.payload);
        buffer[5 + self.payload.len()] = crc8(&buffer[..5 + self.payload.len()]);

        Ok(frame_len)
    }

    /// Encode this frame into a heapless Vec
    pub fn encode_to_vec(&self) -> Result<Vec<u8, MAX_FRAME_SIZE>, FrameError> {
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        let len = self.encode(&mut buffer)?;
        let mut vec = Vec::new();
        vec.extend_from_slice(&buffer[..len])
            .map_err(|_| FrameError::BufferTooSmall)?;
        Ok(vec)
    }
}
