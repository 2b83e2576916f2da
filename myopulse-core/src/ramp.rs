//! 50 ms intensity ramp controller
//!
//! Walks each channel's output value through the burst envelope
//! (rise, hold, fall, rest) in fixed steps so the patient never feels
//! an amplitude jump. The per-tick delta is carried in x100 fixed
//! point; the integer DAC value the pulse scheduler pushes is the
//! truncated accumulator, snapped exactly to the target when a phase
//! completes.
//!
//! A target change mid-rise recomputes the delta from the current
//! output value over the ticks that remain, so the ramp bends toward
//! the new target instead of restarting.

use crate::channel::{ChannelState, RampPhase};
use crate::params::StimParameters;

/// Fixed-point scale for the ramp accumulator
const SCALE: i32 = 100;

/// Per-tick delta that reaches `to` from `from` in `ticks` steps
fn step_toward(from: i32, to: i32, ticks: u16) -> i32 {
    (to - from) / i32::from(ticks.max(1))
}

/// Envelope state for both channels, advanced every 50 ms
#[derive(Debug, Default)]
pub struct RampController {
    dac_x100: [i32; 2],
    step_x100: [i32; 2],
}

impl RampController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance both channels' envelopes by one 50 ms tick
    pub fn tick(&mut self, channels: &mut [ChannelState; 2], params: &StimParameters) {
        for (index, ch) in channels.iter_mut().enumerate() {
            self.tick_channel(index, ch, params);
        }
    }

    fn tick_channel(&mut self, index: usize, ch: &mut ChannelState, params: &StimParameters) {
        match ch.ramp_phase {
            RampPhase::Idle => {
                if ch.rest_remaining_ticks > 0 {
                    ch.rest_remaining_ticks -= 1;
                    if ch.rest_remaining_ticks == 0 && ch.enabled && !ch.lead_off {
                        // Rest over, cycle into the next burst
                        ch.start_burst(params);
                    }
                }
            }
            RampPhase::Rising => {
                let target = i32::from(ch.intensity) * SCALE;
                let rise = params.rise_ticks();
                if ch.phase_tick_count == 0 {
                    let start = if params.ramp_from_zero {
                        0
                    } else {
                        i32::from(ch.intensity / 2)
                    };
                    self.dac_x100[index] = start * SCALE;
                    self.step_x100[index] = step_toward(self.dac_x100[index], target, rise);
                    ch.intensity_changed = false;
                } else if ch.intensity_changed {
                    ch.intensity_changed = false;
                    let remaining = rise.saturating_sub(ch.phase_tick_count);
                    self.step_x100[index] =
                        step_toward(self.dac_x100[index], target, remaining);
                }
                ch.phase_tick_count += 1;
                self.dac_x100[index] += self.step_x100[index];
                if ch.phase_tick_count >= rise {
                    self.dac_x100[index] = target;
                    ch.ramp_phase = RampPhase::Holding;
                    ch.phase_tick_count = 0;
                }
                ch.intensity_dac = (self.dac_x100[index] / SCALE) as u8;
            }
            RampPhase::Holding => {
                // Intensity adjustments during hold apply directly. A
                // stopped channel freezes instead: its cleared target
                // must not cut the output before the scheduler hands
                // the envelope to Falling at its period boundary.
                if ch.enabled {
                    ch.intensity_changed = false;
                    self.dac_x100[index] = i32::from(ch.intensity) * SCALE;
                    ch.intensity_dac = ch.intensity;
                }
            }
            RampPhase::Falling => {
                let fall = params.fall_ticks();
                if ch.phase_tick_count == 0 {
                    self.step_x100[index] = step_toward(self.dac_x100[index], 0, fall);
                }
                ch.phase_tick_count += 1;
                self.dac_x100[index] += self.step_x100[index];
                if ch.phase_tick_count >= fall || self.dac_x100[index] <= 0 {
                    self.dac_x100[index] = 0;
                    ch.intensity_dac = 0;
                    ch.phase_tick_count = 0;
                    if ch.enabled && !ch.lead_off {
                        if params.rest_ticks() > 0 {
                            ch.ramp_phase = RampPhase::Idle;
                            ch.rest_remaining_ticks = params.rest_ticks();
                        } else {
                            ch.start_burst(params);
                        }
                    } else {
                        // Stopped, or latched lead-off: no re-cycle
                        ch.ramp_phase = RampPhase::Idle;
                        ch.rest_remaining_ticks = 0;
                    }
                } else {
                    ch.intensity_dac = (self.dac_x100[index] / SCALE) as u8;
                }
            }
        }
    }
}
