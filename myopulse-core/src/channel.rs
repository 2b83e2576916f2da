//! Per-channel stimulation state
//!
//! Two instances exist, one per output channel. `intensity` is the
//! host-set target; `intensity_dac` is the instantaneous ramped value
//! actually driven to the output stage. `ramp_phase` and
//! `intensity_dac` are mutated only by the pulse scheduler and the
//! intensity ramp controller; the command handlers touch the rest,
//! always inside the shared cell.

use crate::params::StimParameters;

/// Maximum host-settable intensity
pub const INTENSITY_MAX: u8 = 90;

/// Lead-off debounce window length (samples)
pub const LEAD_OFF_WINDOW: u8 = 7;

/// Open-circuit reads within the window required to assert lead-off
pub const LEAD_OFF_THRESHOLD: u32 = 5;

/// Output channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelId {
    #[default]
    A,
    B,
}

impl ChannelId {
    /// Array index of this channel
    pub fn index(self) -> usize {
        match self {
            ChannelId::A => 0,
            ChannelId::B => 1,
        }
    }

    /// Parse a wire channel byte (0 = A, 1 = B)
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(ChannelId::A),
            1 => Some(ChannelId::B),
            _ => None,
        }
    }

    /// Bit in a channel mask
    pub fn mask(self) -> u8 {
        1 << self.index()
    }

    /// The other channel
    pub fn other(self) -> Self {
        match self {
            ChannelId::A => ChannelId::B,
            ChannelId::B => ChannelId::A,
        }
    }
}

/// A channel's position in its stimulation envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RampPhase {
    /// No burst in progress
    #[default]
    Idle,
    /// Intensity rising toward the target
    Rising,
    /// Holding at target intensity
    Holding,
    /// Intensity falling toward the resting value
    Falling,
}

impl RampPhase {
    /// Whether a burst envelope is in progress
    pub fn in_burst(self) -> bool {
        !matches!(self, RampPhase::Idle)
    }
}

/// Debounced electrode-disconnect detector
///
/// Asserts only once the window holds a full 7 samples with at least 5
/// of them reading open; a shorter history never asserts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeadOffWindow {
    history: u8,
    len: u8,
}

impl LeadOffWindow {
    /// Record one comparator sample; returns the debounced verdict
    pub fn sample(&mut self, open: bool) -> bool {
        self.history = ((self.history << 1) | open as u8) & 0x7F;
        if self.len < LEAD_OFF_WINDOW {
            self.len += 1;
        }
        self.len == LEAD_OFF_WINDOW && self.history.count_ones() >= LEAD_OFF_THRESHOLD
    }

    /// Clear the sample history
    pub fn reset(&mut self) {
        self.history = 0;
        self.len = 0;
    }
}

/// State of one stimulation channel
#[derive(Debug, Clone, Default)]
pub struct ChannelState {
    /// Host-set target amplitude (0-90)
    pub intensity: u8,
    /// Instantaneous ramped output value driven to the output stage
    pub intensity_dac: u8,
    /// Position in the stimulation envelope
    pub ramp_phase: RampPhase,
    /// Progress counter within the current ramp phase (ramp ticks)
    pub phase_tick_count: u16,
    /// Countdown until the current burst must end (seconds)
    pub remaining_period_s: u16,
    /// Hold runs until explicitly stopped
    pub hold_unlimited: bool,
    /// Inter-burst rest countdown (ramp ticks)
    pub rest_remaining_ticks: u16,
    /// Active pulse phase width (50 µs ticks), derived from parameters
    pub pulse_half_width_ticks: u16,
    /// Full pulse period (50 µs ticks), derived from parameters
    pub pulse_period_ticks: u16,
    /// Debounced electrode-disconnect flag; latches until the next
    /// start command
    pub lead_off: bool,
    /// Target intensity changed; consumed by the ramp controller
    pub intensity_changed: bool,
    /// Channel selected by the last start command and not yet stopped
    pub enabled: bool,
    lead_off_window: LeadOffWindow,
}

impl ChannelState {
    /// Safe power-on state: output disabled, intensity zero
    pub fn new() -> Self {
        let mut state = Self::default();
        state.apply_parameters(&StimParameters::default());
        state
    }

    /// Re-derive per-channel timing from a freshly validated parameter
    /// store and reset the burst countdown
    pub fn apply_parameters(&mut self, params: &StimParameters) {
        self.pulse_half_width_ticks = params.half_width_ticks();
        self.pulse_period_ticks = params.period_ticks();
        self.remaining_period_s = params.burst_seconds();
        self.hold_unlimited = params.hold_unlimited();
    }

    /// Set the target intensity, clamped to the valid range
    ///
    /// The dirty flag makes the ramp controller recompute its per-tick
    /// delta from the current output value instead of restarting the
    /// ramp.
    pub fn set_intensity(&mut self, value: u8) {
        self.intensity = value.min(INTENSITY_MAX);
        self.intensity_changed = true;
    }

    /// Nudge the target intensity by one step (local up/down control)
    pub fn nudge_intensity(&mut self, up: bool) {
        let next = if up {
            self.intensity.saturating_add(1)
        } else {
            self.intensity.saturating_sub(1)
        };
        self.set_intensity(next);
    }

    /// Begin a stimulation burst
    ///
    /// Clears the lead-off latch and debounce history; a disconnect
    /// detected in an earlier session must not block a fresh start with
    /// re-seated electrodes.
    pub fn start_burst(&mut self, params: &StimParameters) {
        self.enabled = true;
        self.lead_off = false;
        self.lead_off_window.reset();
        self.remaining_period_s = params.burst_seconds();
        self.hold_unlimited = params.hold_unlimited();
        self.rest_remaining_ticks = 0;
        self.ramp_phase = RampPhase::Rising;
        self.phase_tick_count = 0;
    }

    /// Request a cooperative stop
    ///
    /// Only zeroes the countdowns; the pulse scheduler observes the
    /// exhausted burst at its next full-period boundary and turns the
    /// envelope to Falling, so cancellation is bounded by one period.
    pub fn request_stop(&mut self) {
        self.enabled = false;
        self.remaining_period_s = 0;
        self.hold_unlimited = false;
        self.rest_remaining_ticks = 0;
    }

    /// Whether this channel still needs scheduler service
    pub fn is_active(&self) -> bool {
        self.ramp_phase.in_burst() || self.rest_remaining_ticks > 0
    }

    /// Whether this channel should be emitting pulses right now
    pub fn is_pulsing(&self) -> bool {
        self.ramp_phase.in_burst() && !self.lead_off
    }

    /// Record one lead-off comparator sample
    ///
    /// Returns true exactly once, when the debounced flag newly
    /// asserts; the caller forces the envelope to Falling and emits the
    /// push frame.
    pub fn sample_lead_off(&mut self, open: bool) -> bool {
        if self.lead_off_window.sample(open) && !self.lead_off {
            self.lead_off = true;
            return true;
        }
        false
    }
}
