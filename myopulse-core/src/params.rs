//! Validated stimulation parameters
//!
//! One `StimParameters` instance is shared by both output channels. It
//! is only constructed through [`StimParameters::validated`]; the
//! set-parameters handler replaces the store atomically inside the
//! shared cell after validation, so the pulse scheduler never observes
//! an out-of-range or half-updated value.

use myopulse_protocol::ParameterPayload;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 50 µs pulse scheduler tick, the unit of all derived tick values
pub const PULSE_TICK_US: u32 = 50;

/// Valid frequency range (Hz)
pub const FREQUENCY_MIN_HZ: u8 = 1;
pub const FREQUENCY_MAX_HZ: u8 = 120;

/// Valid pulse width range (µs)
pub const PULSE_WIDTH_MIN_US: u16 = 50;
pub const PULSE_WIDTH_MAX_US: u16 = 450;

/// Valid rise/fall time range (deciseconds, 0.1 s units, max 18.0 s)
pub const RAMP_TIME_MAX_DS: u8 = 180;

/// Valid hold time range (seconds)
pub const HOLD_TIME_MAX_S: u8 = 60;

/// Sentinel hold value meaning "hold until stopped"
pub const HOLD_UNLIMITED: u8 = 99;

/// Valid rest time range (seconds)
pub const REST_TIME_MAX_S: u8 = 120;

/// First out-of-range field found during validation
///
/// Checks run in field order and short-circuit; the wire-level result
/// is always a single 0xF1 status byte, the variant exists for logging
/// and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParamError {
    Frequency,
    PulseWidth,
    RiseTime,
    HoldTime,
    FallTime,
    RestTime,
    /// rise, hold, and fall are all zero: the burst would be empty
    EmptyBurst,
}

/// Stimulation parameters shared by both channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StimParameters {
    /// Pulse repetition frequency (Hz, 1-120)
    pub frequency_hz: u8,
    /// Active pulse phase width (µs, 50-450)
    pub pulse_width_us: u16,
    /// Intensity rise time (deciseconds, 0-180)
    pub rise_time_ds: u8,
    /// Hold time at target intensity (seconds, 0-60 or [`HOLD_UNLIMITED`])
    pub hold_time_s: u8,
    /// Intensity fall time (deciseconds, 0-180)
    pub fall_time_ds: u8,
    /// Rest between bursts (seconds, 0-120)
    pub rest_time_s: u8,
    /// Start the rise from zero instead of half the target intensity
    pub ramp_from_zero: bool,
}

impl Default for StimParameters {
    /// Conservative power-on defaults; output stays disabled until the
    /// host sends a start command regardless.
    fn default() -> Self {
        Self {
            frequency_hz: 20,
            pulse_width_us: 200,
            rise_time_ds: 30,
            hold_time_s: 10,
            fall_time_ds: 30,
            rest_time_s: 10,
            ramp_from_zero: false,
        }
    }
}

impl StimParameters {
    /// Validate a decoded set-parameters payload
    ///
    /// Range checks short-circuit in field order; the empty-burst
    /// invariant (rise + hold + fall must not all be zero) is checked
    /// last.
    pub fn validated(payload: &ParameterPayload) -> Result<Self, ParamError> {
        if !(FREQUENCY_MIN_HZ..=FREQUENCY_MAX_HZ).contains(&payload.frequency_hz) {
            return Err(ParamError::Frequency);
        }
        if !(PULSE_WIDTH_MIN_US..=PULSE_WIDTH_MAX_US).contains(&payload.pulse_width_us) {
            return Err(ParamError::PulseWidth);
        }
        if payload.rise_time_ds > RAMP_TIME_MAX_DS {
            return Err(ParamError::RiseTime);
        }
        if payload.hold_time_s > HOLD_TIME_MAX_S && payload.hold_time_s != HOLD_UNLIMITED {
            return Err(ParamError::HoldTime);
        }
        if payload.fall_time_ds > RAMP_TIME_MAX_DS {
            return Err(ParamError::FallTime);
        }
        if payload.rest_time_s > REST_TIME_MAX_S {
            return Err(ParamError::RestTime);
        }
        if payload.rise_time_ds == 0 && payload.hold_time_s == 0 && payload.fall_time_ds == 0 {
            return Err(ParamError::EmptyBurst);
        }

        Ok(Self {
            frequency_hz: payload.frequency_hz,
            pulse_width_us: payload.pulse_width_us,
            rise_time_ds: payload.rise_time_ds,
            hold_time_s: payload.hold_time_s,
            fall_time_ds: payload.fall_time_ds,
            rest_time_s: payload.rest_time_s,
            ramp_from_zero: payload.ramp_from_zero,
        })
    }

    /// Convert back to the wire payload (query-parameters ack)
    pub fn to_payload(&self) -> ParameterPayload {
        ParameterPayload {
            frequency_hz: self.frequency_hz,
            pulse_width_us: self.pulse_width_us,
            rise_time_ds: self.rise_time_ds,
            hold_time_s: self.hold_time_s,
            fall_time_ds: self.fall_time_ds,
            rest_time_s: self.rest_time_s,
            ramp_from_zero: self.ramp_from_zero,
        }
    }

    /// Active pulse phase width in 50 µs scheduler ticks
    pub fn half_width_ticks(&self) -> u16 {
        (self.pulse_width_us as u32 / PULSE_TICK_US) as u16
    }

    /// Full pulse period in 50 µs scheduler ticks
    pub fn period_ticks(&self) -> u16 {
        ((1_000_000 / self.frequency_hz as u32) / PULSE_TICK_US) as u16
    }

    /// Rise envelope duration in 50 ms ramp ticks
    pub fn rise_ticks(&self) -> u16 {
        self.rise_time_ds as u16 * 2
    }

    /// Fall envelope duration in 50 ms ramp ticks
    pub fn fall_ticks(&self) -> u16 {
        self.fall_time_ds as u16 * 2
    }

    /// Inter-burst rest duration in 50 ms ramp ticks
    pub fn rest_ticks(&self) -> u16 {
        self.rest_time_s as u16 * 20
    }

    /// Whether the hold phase runs until explicitly stopped
    pub fn hold_unlimited(&self) -> bool {
        self.hold_time_s == HOLD_UNLIMITED
    }

    /// Total burst duration in seconds: hold plus the rise time
    ///
    /// Zero when the hold is unlimited; callers check
    /// [`hold_unlimited`](Self::hold_unlimited) first.
    pub fn burst_seconds(&self) -> u16 {
        if self.hold_unlimited() {
            0
        } else {
            self.hold_time_s as u16 + self.rise_time_ds as u16 / 10
        }
    }
}
