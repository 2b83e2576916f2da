//! Command and acknowledgment codes for the Myopulse protocol
//!
//! Commands are divided into two namespaces by the frame token:
//! - General (0xF0): queries shared across the product family
//! - Device (0x69): stimulation and EMG commands
//!
//! Every host command has a distinct acknowledgment type whose first
//! payload byte is a status code. Device-originated pushes (lead-off,
//! low battery) have no request counterpart.

use crate::frame::{Frame, FrameError, Token};

// Device-specific command codes (token 0x69)
pub const CMD_START_EMG: u8 = 0x81;
pub const CMD_STOP_EMG: u8 = 0x82;
pub const CMD_SET_PARAMETERS: u8 = 0x91;
pub const CMD_SET_INTENSITY: u8 = 0x92;
pub const CMD_START_STIM: u8 = 0x93;
pub const CMD_PAUSE_STIM: u8 = 0x94;
pub const CMD_STOP_STIM: u8 = 0x95;
pub const CMD_QUERY_PARAMETERS: u8 = 0x9D;
pub const CMD_QUERY_INTENSITY: u8 = 0x9E;

// Device-specific acknowledgment codes
pub const ACK_START_EMG: u8 = 0x01;
pub const ACK_STOP_EMG: u8 = 0x02;
pub const ACK_SET_INTENSITY: u8 = 0x07;
pub const ACK_QUERY_INTENSITY: u8 = 0x08;
pub const ACK_SET_PARAMETERS: u8 = 0x11;
pub const ACK_START_STIM: u8 = 0x13;
pub const ACK_PAUSE_STIM: u8 = 0x14;
pub const ACK_STOP_STIM: u8 = 0x15;
pub const ACK_QUERY_PARAMETERS: u8 = 0x1D;

// General command codes (token 0xF0)
pub const CMD_QUERY_VERSION: u8 = 0xA1;
pub const CMD_QUERY_SERIAL: u8 = 0xA2;
pub const CMD_QUERY_BATTERY: u8 = 0xA3;
pub const ACK_QUERY_VERSION: u8 = 0x21;
pub const ACK_QUERY_SERIAL: u8 = 0x22;
pub const ACK_QUERY_BATTERY: u8 = 0x23;

// Device-originated pushes (no request counterpart)
pub const PUSH_LEAD_OFF: u8 = 0x04;
pub const PUSH_LOW_BATTERY: u8 = 0x1B;

/// Ack status byte: command accepted
pub const STATUS_OK: u8 = 0x00;
/// Ack status byte: payload field out of range or malformed
pub const STATUS_PARAM_ERROR: u8 = 0xF1;

/// Every command the device understands, keyed by (token, type)
///
/// Dispatch goes through [`Command::from_wire`]; an unregistered
/// (token, type) pair yields `None` and is never acknowledged. This
/// replaces the fixed dispatch table indexed by raw type offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    SetParameters,
    QueryParameters,
    SetIntensity,
    QueryIntensity,
    StartStim,
    PauseStim,
    StopStim,
    StartEmg,
    StopEmg,
    QueryVersion,
    QuerySerial,
    QueryBattery,
}

impl Command {
    /// Look up the command for a received (token, type) pair
    pub fn from_wire(token: Token, frame_type: u8) -> Option<Self> {
        match (token, frame_type) {
            (Token::Device, CMD_SET_PARAMETERS) => Some(Command::SetParameters),
            (Token::Device, CMD_QUERY_PARAMETERS) => Some(Command::QueryParameters),
            (Token::Device, CMD_SET_INTENSITY) => Some(Command::SetIntensity),
            (Token::Device, CMD_QUERY_INTENSITY) => Some(Command::QueryIntensity),
            (Token::Device, CMD_START_STIM) => Some(Command::StartStim),
            (Token::Device, CMD_PAUSE_STIM) => Some(Command::PauseStim),
            (Token::Device, CMD_STOP_STIM) => Some(Command::StopStim),
            (Token::Device, CMD_START_EMG) => Some(Command::StartEmg),
            (Token::Device, CMD_STOP_EMG) => Some(Command::StopEmg),
            (Token::General, CMD_QUERY_VERSION) => Some(Command::QueryVersion),
            (Token::General, CMD_QUERY_SERIAL) => Some(Command::QuerySerial),
            (Token::General, CMD_QUERY_BATTERY) => Some(Command::QueryBattery),
            _ => None,
        }
    }

    /// Command namespace
    pub fn token(self) -> Token {
        match self {
            Command::QueryVersion | Command::QuerySerial | Command::QueryBattery => Token::General,
            _ => Token::Device,
        }
    }

    /// Wire code of the request
    pub fn request_type(self) -> u8 {
        match self {
            Command::SetParameters => CMD_SET_PARAMETERS,
            Command::QueryParameters => CMD_QUERY_PARAMETERS,
            Command::SetIntensity => CMD_SET_INTENSITY,
            Command::QueryIntensity => CMD_QUERY_INTENSITY,
            Command::StartStim => CMD_START_STIM,
            Command::PauseStim => CMD_PAUSE_STIM,
            Command::StopStim => CMD_STOP_STIM,
            Command::StartEmg => CMD_START_EMG,
            Command::StopEmg => CMD_STOP_EMG,
            Command::QueryVersion => CMD_QUERY_VERSION,
            Command::QuerySerial => CMD_QUERY_SERIAL,
            Command::QueryBattery => CMD_QUERY_BATTERY,
        }
    }

    /// Wire code of the acknowledgment for this command
    pub fn ack_type(self) -> u8 {
        match self {
            Command::SetParameters => ACK_SET_PARAMETERS,
            Command::QueryParameters => ACK_QUERY_PARAMETERS,
            Command::SetIntensity => ACK_SET_INTENSITY,
            Command::QueryIntensity => ACK_QUERY_INTENSITY,
            Command::StartStim => ACK_START_STIM,
            Command::PauseStim => ACK_PAUSE_STIM,
            Command::StopStim => ACK_STOP_STIM,
            Command::StartEmg => ACK_START_EMG,
            Command::StopEmg => ACK_STOP_EMG,
            Command::QueryVersion => ACK_QUERY_VERSION,
            Command::QuerySerial => ACK_QUERY_SERIAL,
            Command::QueryBattery => ACK_QUERY_BATTERY,
        }
    }
}

/// Wire layout of the set-parameters payload (8 bytes)
///
/// `[freq][pw lo][pw hi][rise ds][hold s][fall ds][rest s][flags]`,
/// pulse width little-endian in microseconds, flags bit 0 = ramp the
/// intensity envelope from zero instead of half the target. Field
/// *ranges* are the engine's concern; this type only handles layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ParameterPayload {
    pub frequency_hz: u8,
    pub pulse_width_us: u16,
    pub rise_time_ds: u8,
    pub hold_time_s: u8,
    pub fall_time_ds: u8,
    pub rest_time_s: u8,
    pub ramp_from_zero: bool,
}

/// Encoded size of [`ParameterPayload`]
pub const PARAMETER_PAYLOAD_LEN: usize = 8;

const FLAG_RAMP_FROM_ZERO: u8 = 0x01;

impl ParameterPayload {
    /// Decode from a set-parameters request payload
    ///
    /// Returns `None` unless the payload is exactly 8 bytes.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        if payload.len() != PARAMETER_PAYLOAD_LEN {
            return None;
        }
        Some(Self {
            frequency_hz: payload[0],
            pulse_width_us: u16::from_le_bytes([payload[1], payload[2]]),
            rise_time_ds: payload[3],
            hold_time_s: payload[4],
            fall_time_ds: payload[5],
            rest_time_s: payload[6],
            ramp_from_zero: payload[7] & FLAG_RAMP_FROM_ZERO != 0,
        })
    }

    /// Encode for a set-parameters request or query-parameters ack
    pub fn encode(&self) -> [u8; PARAMETER_PAYLOAD_LEN] {
        let pw = self.pulse_width_us.to_le_bytes();
        [
            self.frequency_hz,
            pw[0],
            pw[1],
            self.rise_time_ds,
            self.hold_time_s,
            self.fall_time_ds,
            self.rest_time_s,
            if self.ramp_from_zero {
                FLAG_RAMP_FROM_ZERO
            } else {
                0
            },
        ]
    }
}

/// Build a lead-off push frame (payload = affected channel mask)
pub fn lead_off_push(channel_mask: u8) -> Result<Frame, FrameError> {
    Frame::new(Token::Device, PUSH_LEAD_OFF, &[channel_mask])
}

/// Build a low-battery push frame (payload = remaining percent)
///
/// Emitted by the firmware glue's battery monitor, not by the control
/// core itself.
pub fn low_battery_push(percent: u8) -> Result<Frame, FrameError> {
    Frame::new(Token::General, PUSH_LOW_BATTERY, &[percent])
}
