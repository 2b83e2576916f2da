//! 50 µs pulse scheduler
//!
//! Hard-real-time state machine that alternates the two channels'
//! bi-phasic output pulses within a shared period. Each channel's slot
//! is {Prepare, Up, Delay}: one tick to enable the output driver and
//! gain stage, `pulse_half_width_ticks` of active pulse (during which
//! the lead-off comparator is sampled once per tick), then output low
//! until the slot's share of the period elapses - half the period when
//! both channels are pulsing, the full period otherwise.
//!
//! Every branch completes in O(1) and never blocks. All channel state
//! touched here is otherwise only written inside the shared cell, which
//! masks this interrupt for the duration of the update.

use crate::channel::{ChannelId, ChannelState, RampPhase};
use crate::traits::StimHal;

/// Scheduler ticks per second (50 µs tick)
pub const TICKS_PER_SECOND: u32 = 20_000;

/// Sub-phase of the active channel's slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum PulseStep {
    /// Enable the output driver and gain stage
    #[default]
    Prepare,
    /// Active pulse phase; amplitude pushed on entry, lead-off sampled
    /// every tick
    Up,
    /// Output low for the remainder of the slot
    Delay,
}

/// What one scheduler tick produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TickOutcome {
    /// Mid-period, keep ticking
    Busy,
    /// One full A+B period elapsed
    CycleComplete,
    /// Both channels idle with nothing pending; the caller stops the
    /// pulse timer and re-enables EMG sensing
    Stop,
}

/// The 50 µs tick state machine
///
/// All step and debounce state lives in explicit fields so the
/// scheduler can be constructed once, threaded through calls, and
/// tested without hidden globals.
#[derive(Debug, Default)]
pub struct PulseScheduler {
    step: PulseStep,
    active: ChannelId,
    /// Ticks elapsed in the active channel's slot
    slot_ticks: u16,
    /// Ticks elapsed in the Up step
    up_ticks: u16,
    /// Accumulator for once-per-second burst countdown
    second_ticks: u32,
    /// Channels whose lead-off flag newly asserted, awaiting a push
    /// frame from the main loop
    lead_off_pending: u8,
}

impl PulseScheduler {
    /// Create a new scheduler, starting with channel A
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart from channel A's Prepare step
    pub fn reset(&mut self) {
        *self = Self {
            lead_off_pending: self.lead_off_pending,
            ..Self::default()
        };
    }

    /// Take the mask of channels with a freshly asserted lead-off flag
    pub fn take_lead_off_mask(&mut self) -> u8 {
        core::mem::take(&mut self.lead_off_pending)
    }

    /// Advance the state machine by one 50 µs tick
    pub fn tick<H: StimHal>(
        &mut self,
        channels: &mut [ChannelState; 2],
        hal: &mut H,
    ) -> TickOutcome {
        if !channels[0].is_active() && !channels[1].is_active() {
            hal.disable_output(ChannelId::A);
            hal.disable_output(ChannelId::B);
            self.reset();
            return TickOutcome::Stop;
        }

        self.count_second(channels);

        let idx = self.active.index();
        match self.step {
            PulseStep::Prepare => {
                self.slot_ticks = 1;
                self.up_ticks = 0;
                if channels[idx].is_pulsing() {
                    hal.enable_output(self.active);
                    self.step = PulseStep::Up;
                } else {
                    // Nothing to emit this slot (idle or resting
                    // channel); burn the slot with the output low
                    self.step = PulseStep::Delay;
                }
                TickOutcome::Busy
            }
            PulseStep::Up => {
                if self.up_ticks == 0 {
                    // Entry: push the current ramped amplitude
                    hal.set_output_amplitude(channels[idx].intensity_dac);
                }
                self.slot_ticks += 1;
                self.up_ticks += 1;

                let open = hal.read_lead_off(self.active);
                if channels[idx].sample_lead_off(open) {
                    // Electrode disconnect while actively stimulating:
                    // force the envelope down and cut the output now
                    channels[idx].ramp_phase = RampPhase::Falling;
                    channels[idx].phase_tick_count = 0;
                    hal.disable_output(self.active);
                    self.lead_off_pending |= self.active.mask();
                    self.step = PulseStep::Delay;
                    return TickOutcome::Busy;
                }

                if self.up_ticks >= channels[idx].pulse_half_width_ticks {
                    hal.disable_output(self.active);
                    self.step = PulseStep::Delay;
                }
                TickOutcome::Busy
            }
            PulseStep::Delay => {
                self.slot_ticks += 1;
                if self.slot_ticks >= self.slot_len(channels) {
                    self.finish_slot(channels)
                } else {
                    TickOutcome::Busy
                }
            }
        }
    }

    /// Length of the active channel's slot in ticks
    fn slot_len(&self, channels: &[ChannelState; 2]) -> u16 {
        let period = channels[self.active.index()].pulse_period_ticks;
        if channels[0].is_pulsing() && channels[1].is_pulsing() {
            period / 2
        } else {
            period
        }
    }

    /// End of slot: pick the next channel and report period boundaries
    fn finish_slot(&mut self, channels: &mut [ChannelState; 2]) -> TickOutcome {
        let both = channels[0].is_pulsing() && channels[1].is_pulsing();
        let cycle_done = !both || self.active == ChannelId::B;

        let other = self.active.other();
        if channels[other.index()].is_pulsing() {
            self.active = other;
        }
        self.step = PulseStep::Prepare;
        self.slot_ticks = 0;

        if cycle_done {
            self.end_exhausted_bursts(channels);
            TickOutcome::CycleComplete
        } else {
            TickOutcome::Busy
        }
    }

    /// Once-per-second burst countdown, accumulated over 20 000 ticks
    fn count_second(&mut self, channels: &mut [ChannelState; 2]) {
        self.second_ticks += 1;
        if self.second_ticks < TICKS_PER_SECOND {
            return;
        }
        self.second_ticks = 0;
        for ch in channels.iter_mut() {
            if matches!(ch.ramp_phase, RampPhase::Rising | RampPhase::Holding)
                && !ch.hold_unlimited
                && ch.remaining_period_s > 0
            {
                ch.remaining_period_s -= 1;
            }
        }
    }

    /// Turn exhausted or stop-requested bursts to Falling
    ///
    /// Runs at the full-period boundary, which is what bounds a
    /// cooperative pause/stop to one period.
    fn end_exhausted_bursts(&mut self, channels: &mut [ChannelState; 2]) {
        for ch in channels.iter_mut() {
            let expire = match ch.ramp_phase {
                RampPhase::Holding => !ch.hold_unlimited && ch.remaining_period_s == 0,
                // A stop request mid-rise must not wait for the rise to
                // complete
                RampPhase::Rising => !ch.enabled,
                _ => false,
            };
            if expire {
                ch.ramp_phase = RampPhase::Falling;
                ch.phase_tick_count = 0;
            }
        }
    }
}
