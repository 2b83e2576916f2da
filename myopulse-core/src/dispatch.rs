//! Command dispatcher and top-level engine state
//!
//! [`StimCore`] owns everything the two interrupt contexts and the main
//! loop share: the parameter store, both channel states, the pulse
//! scheduler and the ramp controller. It lives in a [`Shared`] cell;
//! every multi-field update happens inside one critical section so the
//! 50 µs context never observes a half-applied command.
//!
//! [`dispatch`] maps one verified frame to one handler. Unknown
//! (token, type) pairs return `None` and are never acknowledged; the
//! host times out and retries.

use heapless::Vec;
use myopulse_protocol::commands::lead_off_push;
use myopulse_protocol::{
    Command, Frame, ParameterPayload, Token, MAX_PAYLOAD_SIZE, STATUS_OK, STATUS_PARAM_ERROR,
};

use crate::channel::{ChannelId, ChannelState};
use crate::params::StimParameters;
use crate::pulse::{PulseScheduler, TickOutcome};
use crate::ramp::RampController;
use crate::shared::Shared;
use crate::traits::{DeviceInfo, FrontendRoute, StimHal};

/// Valid bits in a start-command channel mask
const CHANNEL_MASK_ALL: u8 = 0b11;

/// Everything the interrupt contexts and the main loop share
#[derive(Debug, Default)]
pub struct StimCore {
    /// Validated parameter store, shared by both channels
    pub params: StimParameters,
    pub channels: [ChannelState; 2],
    pub scheduler: PulseScheduler,
    pub ramp: RampController,
    /// Host requested the EMG stream
    pub emg_streaming: bool,
    /// Pulse timer is running (set at start, cleared when the
    /// scheduler winds down)
    pub stim_running: bool,
}

impl StimCore {
    /// Safe power-on state: defaults loaded, outputs off, EMG routed
    pub fn new() -> Self {
        Self {
            params: StimParameters::default(),
            channels: [ChannelState::new(), ChannelState::new()],
            ..Self::default()
        }
    }

    /// One 50 µs timer interrupt
    ///
    /// When the scheduler reports that nothing is left to service, the
    /// timer is stopped and the analog front-end handed back to EMG
    /// sensing, so an idle device draws no pulse-timer wakeups.
    pub fn pulse_tick<H: StimHal>(&mut self, hal: &mut H) -> TickOutcome {
        let outcome = self.scheduler.tick(&mut self.channels, hal);
        if outcome == TickOutcome::Stop && self.stim_running {
            self.stim_running = false;
            hal.stop_pulse_timer();
            hal.route_frontend(FrontendRoute::Emg);
        }
        outcome
    }

    /// One 50 ms ramp tick
    pub fn ramp_tick(&mut self) {
        let params = self.params;
        self.ramp.tick(&mut self.channels, &params);
    }

    /// Build the lead-off push frame for any channel that newly
    /// asserted, at most once per assertion
    pub fn take_lead_off_push(&mut self) -> Option<Frame> {
        let mask = self.scheduler.take_lead_off_mask();
        if mask == 0 {
            None
        } else {
            lead_off_push(mask).ok()
        }
    }

    /// Local up/down control: one intensity step on one channel
    pub fn nudge_intensity(&mut self, channel: ChannelId, up: bool) {
        self.channels[channel.index()].nudge_intensity(up);
    }
}

/// Status-only acknowledgment for a command
fn ack_status(cmd: Command, status: u8) -> Option<Frame> {
    Frame::new(cmd.token(), cmd.ack_type(), &[status]).ok()
}

/// Handle one verified frame, producing its acknowledgment
///
/// Every handler touches the shared cell in a single critical section.
/// HAL calls (front-end routing, pulse timer) happen outside it; they
/// only ever run from this main-loop context.
pub fn dispatch<H: StimHal, D: DeviceInfo>(
    frame: &Frame,
    core: &Shared<StimCore>,
    hal: &mut H,
    info: &D,
) -> Option<Frame> {
    let cmd = Command::from_wire(frame.token, frame.frame_type)?;
    match cmd {
        Command::SetParameters => {
            let status = match ParameterPayload::decode(&frame.payload) {
                Some(payload) => match StimParameters::validated(&payload) {
                    Ok(params) => {
                        core.with(|c| {
                            c.params = params;
                            for ch in c.channels.iter_mut() {
                                ch.apply_parameters(&params);
                            }
                        });
                        STATUS_OK
                    }
                    Err(_) => STATUS_PARAM_ERROR,
                },
                None => STATUS_PARAM_ERROR,
            };
            ack_status(cmd, status)
        }
        Command::QueryParameters => {
            let stored = core.with(|c| c.params).to_payload().encode();
            let mut payload = [0u8; 9];
            payload[0] = STATUS_OK;
            payload[1..].copy_from_slice(&stored);
            Frame::new(cmd.token(), cmd.ack_type(), &payload).ok()
        }
        Command::SetIntensity => {
            let status = match (frame.payload.first(), frame.payload.get(1)) {
                (Some(&index), Some(&value)) if frame.payload.len() == 2 => {
                    match ChannelId::from_index(index) {
                        Some(id) => {
                            core.with(|c| c.channels[id.index()].set_intensity(value));
                            STATUS_OK
                        }
                        None => STATUS_PARAM_ERROR,
                    }
                }
                _ => STATUS_PARAM_ERROR,
            };
            ack_status(cmd, status)
        }
        Command::QueryIntensity => {
            let payload = core.with(|c| {
                [
                    STATUS_OK,
                    c.channels[0].intensity,
                    c.channels[0].intensity_dac,
                    c.channels[1].intensity,
                    c.channels[1].intensity_dac,
                ]
            });
            Frame::new(cmd.token(), cmd.ack_type(), &payload).ok()
        }
        Command::StartStim => {
            let mask = match frame.payload.first() {
                None => CHANNEL_MASK_ALL,
                Some(&m) if m & CHANNEL_MASK_ALL != 0 && m & !CHANNEL_MASK_ALL == 0 => m,
                Some(_) => return ack_status(cmd, STATUS_PARAM_ERROR),
            };
            core.with(|c| {
                let params = c.params;
                for (index, ch) in c.channels.iter_mut().enumerate() {
                    if mask & (1 << index) != 0 {
                        ch.start_burst(&params);
                    }
                }
                c.emg_streaming = false;
                c.stim_running = true;
            });
            hal.route_frontend(FrontendRoute::Stimulation);
            hal.start_pulse_timer();
            ack_status(cmd, STATUS_OK)
        }
        Command::PauseStim => {
            // Cooperative: countdowns are zeroed here, the scheduler
            // winds the envelopes down at its next period boundary.
            // Intensity targets survive a pause.
            core.with(|c| {
                for ch in c.channels.iter_mut() {
                    ch.request_stop();
                }
            });
            ack_status(cmd, STATUS_OK)
        }
        Command::StopStim => {
            core.with(|c| {
                for ch in c.channels.iter_mut() {
                    ch.request_stop();
                    ch.set_intensity(0);
                }
            });
            ack_status(cmd, STATUS_OK)
        }
        Command::StartEmg => {
            // Stimulation owns the analog front-end while it runs
            let busy = core.with(|c| {
                if c.stim_running {
                    true
                } else {
                    c.emg_streaming = true;
                    false
                }
            });
            if busy {
                ack_status(cmd, STATUS_PARAM_ERROR)
            } else {
                hal.route_frontend(FrontendRoute::Emg);
                ack_status(cmd, STATUS_OK)
            }
        }
        Command::StopEmg => {
            core.with(|c| c.emg_streaming = false);
            ack_status(cmd, STATUS_OK)
        }
        Command::QueryVersion => {
            let (major, minor) = info.firmware_version();
            Frame::new(Token::General, cmd.ack_type(), &[STATUS_OK, major, minor]).ok()
        }
        Command::QuerySerial => {
            let mut payload: Vec<u8, MAX_PAYLOAD_SIZE> = Vec::new();
            payload.push(STATUS_OK).ok()?;
            payload.extend_from_slice(info.serial()).ok()?;
            Frame::new(Token::General, cmd.ack_type(), &payload).ok()
        }
        Command::QueryBattery => {
            Frame::new(Token::General, cmd.ack_type(), &[STATUS_OK, info.battery_percent()]).ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RampPhase;
    use myopulse_protocol::commands::{
        ACK_QUERY_PARAMETERS, ACK_SET_PARAMETERS, ACK_START_STIM, CMD_PAUSE_STIM,
        CMD_QUERY_BATTERY, CMD_QUERY_INTENSITY, CMD_QUERY_PARAMETERS, CMD_QUERY_SERIAL,
        CMD_QUERY_VERSION, CMD_SET_INTENSITY, CMD_SET_PARAMETERS, CMD_START_EMG, CMD_START_STIM,
        CMD_STOP_STIM, PUSH_LEAD_OFF,
    };
    use myopulse_protocol::Receiver;

    struct MockHal {
        enabled: [bool; 2],
        amplitude: u8,
        lead_off: [bool; 2],
        timer_running: bool,
        route: FrontendRoute,
    }

    impl MockHal {
        fn new() -> Self {
            Self {
                enabled: [false; 2],
                amplitude: 0,
                lead_off: [false; 2],
                timer_running: false,
                route: FrontendRoute::Emg,
            }
        }
    }

    impl StimHal for MockHal {
        fn enable_output(&mut self, channel: ChannelId) {
            self.enabled[channel.index()] = true;
        }
        fn disable_output(&mut self, channel: ChannelId) {
            self.enabled[channel.index()] = false;
        }
        fn set_output_amplitude(&mut self, value: u8) {
            self.amplitude = value;
        }
        fn read_lead_off(&mut self, channel: ChannelId) -> bool {
            self.lead_off[channel.index()]
        }
        fn route_frontend(&mut self, route: FrontendRoute) {
            self.route = route;
        }
        fn start_pulse_timer(&mut self) {
            self.timer_running = true;
        }
        fn stop_pulse_timer(&mut self) {
            self.timer_running = false;
        }
    }

    struct MockInfo;

    impl DeviceInfo for MockInfo {
        fn firmware_version(&self) -> (u8, u8) {
            (2, 4)
        }
        fn serial(&self) -> &[u8] {
            b"MP-0042"
        }
        fn battery_percent(&self) -> u8 {
            73
        }
    }

    fn device_frame(frame_type: u8, payload: &[u8]) -> Frame {
        Frame::new(Token::Device, frame_type, payload).unwrap()
    }

    fn general_frame(frame_type: u8) -> Frame {
        Frame::empty(Token::General, frame_type)
    }

    fn valid_parameter_bytes() -> [u8; 8] {
        ParameterPayload {
            frequency_hz: 50,
            pulse_width_us: 300,
            rise_time_ds: 20,
            hold_time_s: 5,
            fall_time_ds: 20,
            rest_time_s: 2,
            ramp_from_zero: false,
        }
        .encode()
    }

    #[test]
    fn test_set_parameters_applies_to_store_and_channels() {
        let core = Shared::new(StimCore::new());
        let mut hal = MockHal::new();
        let frame = device_frame(CMD_SET_PARAMETERS, &valid_parameter_bytes());

        let ack = dispatch(&frame, &core, &mut hal, &MockInfo).unwrap();
        assert_eq!(ack.frame_type, ACK_SET_PARAMETERS);
        assert_eq!(ack.payload[0], STATUS_OK);
        core.with(|c| {
            assert_eq!(c.params.frequency_hz, 50);
            assert_eq!(c.channels[0].pulse_period_ticks, 400);
            assert_eq!(c.channels[1].pulse_half_width_ticks, 6);
        });
    }

    #[test]
    fn test_set_parameters_out_of_range_rejected() {
        let core = Shared::new(StimCore::new());
        let mut hal = MockHal::new();
        let mut bytes = valid_parameter_bytes();
        bytes[0] = 121; // frequency above range

        let ack = dispatch(
            &device_frame(CMD_SET_PARAMETERS, &bytes),
            &core,
            &mut hal,
            &MockInfo,
        )
        .unwrap();
        assert_eq!(ack.payload[0], STATUS_PARAM_ERROR);
        // Store untouched
        core.with(|c| assert_eq!(c.params.frequency_hz, 20));
    }

    #[test]
    fn test_set_parameters_wrong_length_rejected() {
        let core = Shared::new(StimCore::new());
        let mut hal = MockHal::new();
        let ack = dispatch(
            &device_frame(CMD_SET_PARAMETERS, &[1, 2, 3]),
            &core,
            &mut hal,
            &MockInfo,
        )
        .unwrap();
        assert_eq!(ack.payload[0], STATUS_PARAM_ERROR);
    }

    #[test]
    fn test_query_parameters_echoes_store() {
        let core = Shared::new(StimCore::new());
        let mut hal = MockHal::new();
        dispatch(
            &device_frame(CMD_SET_PARAMETERS, &valid_parameter_bytes()),
            &core,
            &mut hal,
            &MockInfo,
        );

        let ack = dispatch(
            &device_frame(CMD_QUERY_PARAMETERS, &[]),
            &core,
            &mut hal,
            &MockInfo,
        )
        .unwrap();
        assert_eq!(ack.frame_type, ACK_QUERY_PARAMETERS);
        assert_eq!(ack.payload[0], STATUS_OK);
        assert_eq!(&ack.payload[1..], &valid_parameter_bytes());
    }

    #[test]
    fn test_set_intensity_clamps_and_flags() {
        let core = Shared::new(StimCore::new());
        let mut hal = MockHal::new();

        let ack = dispatch(
            &device_frame(CMD_SET_INTENSITY, &[0, 200]),
            &core,
            &mut hal,
            &MockInfo,
        )
        .unwrap();
        assert_eq!(ack.payload[0], STATUS_OK);
        core.with(|c| {
            assert_eq!(c.channels[0].intensity, 90);
            assert!(c.channels[0].intensity_changed);
        });
    }

    #[test]
    fn test_set_intensity_bad_channel_rejected() {
        let core = Shared::new(StimCore::new());
        let mut hal = MockHal::new();
        let ack = dispatch(
            &device_frame(CMD_SET_INTENSITY, &[2, 50]),
            &core,
            &mut hal,
            &MockInfo,
        )
        .unwrap();
        assert_eq!(ack.payload[0], STATUS_PARAM_ERROR);
    }

    #[test]
    fn test_query_intensity_reports_both_channels() {
        let core = Shared::new(StimCore::new());
        let mut hal = MockHal::new();
        core.with(|c| {
            c.channels[0].set_intensity(40);
            c.channels[0].intensity_dac = 20;
            c.channels[1].set_intensity(60);
        });

        let ack = dispatch(
            &device_frame(CMD_QUERY_INTENSITY, &[]),
            &core,
            &mut hal,
            &MockInfo,
        )
        .unwrap();
        assert_eq!(&ack.payload[..], &[STATUS_OK, 40, 20, 60, 0]);
    }

    #[test]
    fn test_start_defaults_to_both_channels() {
        let core = Shared::new(StimCore::new());
        let mut hal = MockHal::new();

        let ack = dispatch(&device_frame(CMD_START_STIM, &[]), &core, &mut hal, &MockInfo).unwrap();
        assert_eq!(ack.frame_type, ACK_START_STIM);
        assert_eq!(ack.payload[0], STATUS_OK);
        assert!(hal.timer_running);
        assert_eq!(hal.route, FrontendRoute::Stimulation);
        core.with(|c| {
            assert!(c.stim_running);
            assert_eq!(c.channels[0].ramp_phase, RampPhase::Rising);
            assert_eq!(c.channels[1].ramp_phase, RampPhase::Rising);
        });
    }

    #[test]
    fn test_start_with_mask_selects_one_channel() {
        let core = Shared::new(StimCore::new());
        let mut hal = MockHal::new();

        dispatch(
            &device_frame(CMD_START_STIM, &[0b10]),
            &core,
            &mut hal,
            &MockInfo,
        );
        core.with(|c| {
            assert_eq!(c.channels[0].ramp_phase, RampPhase::Idle);
            assert_eq!(c.channels[1].ramp_phase, RampPhase::Rising);
        });
    }

    #[test]
    fn test_start_with_empty_mask_rejected() {
        let core = Shared::new(StimCore::new());
        let mut hal = MockHal::new();
        let ack = dispatch(
            &device_frame(CMD_START_STIM, &[0]),
            &core,
            &mut hal,
            &MockInfo,
        )
        .unwrap();
        assert_eq!(ack.payload[0], STATUS_PARAM_ERROR);
        assert!(!hal.timer_running);
    }

    #[test]
    fn test_pause_keeps_intensity_stop_clears_it() {
        let core = Shared::new(StimCore::new());
        let mut hal = MockHal::new();
        dispatch(
            &device_frame(CMD_SET_INTENSITY, &[0, 50]),
            &core,
            &mut hal,
            &MockInfo,
        );
        dispatch(&device_frame(CMD_START_STIM, &[]), &core, &mut hal, &MockInfo);

        dispatch(&device_frame(CMD_PAUSE_STIM, &[]), &core, &mut hal, &MockInfo);
        core.with(|c| {
            assert!(!c.channels[0].enabled);
            assert_eq!(c.channels[0].remaining_period_s, 0);
            assert_eq!(c.channels[0].intensity, 50);
        });

        dispatch(&device_frame(CMD_STOP_STIM, &[]), &core, &mut hal, &MockInfo);
        core.with(|c| assert_eq!(c.channels[0].intensity, 0));
    }

    #[test]
    fn test_emg_start_rejected_while_stimulating() {
        let core = Shared::new(StimCore::new());
        let mut hal = MockHal::new();
        dispatch(&device_frame(CMD_START_STIM, &[]), &core, &mut hal, &MockInfo);

        let ack = dispatch(&device_frame(CMD_START_EMG, &[]), &core, &mut hal, &MockInfo).unwrap();
        assert_eq!(ack.payload[0], STATUS_PARAM_ERROR);
        core.with(|c| assert!(!c.emg_streaming));
    }

    #[test]
    fn test_emg_start_routes_frontend_when_idle() {
        let core = Shared::new(StimCore::new());
        let mut hal = MockHal::new();

        let ack = dispatch(&device_frame(CMD_START_EMG, &[]), &core, &mut hal, &MockInfo).unwrap();
        assert_eq!(ack.payload[0], STATUS_OK);
        assert_eq!(hal.route, FrontendRoute::Emg);
        core.with(|c| assert!(c.emg_streaming));
    }

    #[test]
    fn test_unknown_type_gets_no_response() {
        let core = Shared::new(StimCore::new());
        let mut hal = MockHal::new();
        assert!(dispatch(&device_frame(0x7F, &[]), &core, &mut hal, &MockInfo).is_none());
        // Device-only commands are not valid under the general token
        assert!(dispatch(
            &general_frame(CMD_START_STIM),
            &core,
            &mut hal,
            &MockInfo
        )
        .is_none());
    }

    #[test]
    fn test_general_queries() {
        let core = Shared::new(StimCore::new());
        let mut hal = MockHal::new();

        let ack = dispatch(&general_frame(CMD_QUERY_VERSION), &core, &mut hal, &MockInfo).unwrap();
        assert_eq!(ack.token, Token::General);
        assert_eq!(&ack.payload[..], &[STATUS_OK, 2, 4]);

        let ack = dispatch(&general_frame(CMD_QUERY_SERIAL), &core, &mut hal, &MockInfo).unwrap();
        assert_eq!(ack.payload[0], STATUS_OK);
        assert_eq!(&ack.payload[1..], b"MP-0042");

        let ack = dispatch(&general_frame(CMD_QUERY_BATTERY), &core, &mut hal, &MockInfo).unwrap();
        assert_eq!(&ack.payload[..], &[STATUS_OK, 73]);
    }

    #[test]
    fn test_idle_scheduler_stops_timer_and_routes_emg() {
        let core = Shared::new(StimCore::new());
        let mut hal = MockHal::new();
        dispatch(&device_frame(CMD_START_STIM, &[]), &core, &mut hal, &MockInfo);
        dispatch(&device_frame(CMD_STOP_STIM, &[]), &core, &mut hal, &MockInfo);

        // Wind down: scheduler reaches its period boundary, the ramp
        // controller walks the envelopes to Idle, then the next pulse
        // tick reports stop.
        for _ in 0..100_000 {
            let outcome = core.with(|c| c.pulse_tick(&mut hal));
            if outcome == TickOutcome::Stop {
                break;
            }
            core.with(|c| c.ramp_tick());
        }
        assert!(!hal.timer_running);
        assert_eq!(hal.route, FrontendRoute::Emg);
        core.with(|c| assert!(!c.stim_running));
    }

    #[test]
    fn test_lead_off_push_frame() {
        let core = Shared::new(StimCore::new());
        let mut hal = MockHal::new();
        hal.lead_off[0] = true;
        dispatch(
            &device_frame(CMD_SET_INTENSITY, &[0, 50]),
            &core,
            &mut hal,
            &MockInfo,
        );
        dispatch(
            &device_frame(CMD_START_STIM, &[0b01]),
            &core,
            &mut hal,
            &MockInfo,
        );

        // Enough pulse ticks for seven comparator samples
        for _ in 0..3000 {
            core.with(|c| c.pulse_tick(&mut hal));
        }
        let push = core.with(|c| c.take_lead_off_push()).unwrap();
        assert_eq!(push.frame_type, PUSH_LEAD_OFF);
        assert_eq!(&push.payload[..], &[0b01]);
        assert!(core.with(|c| c.take_lead_off_push()).is_none());
    }

    /// Full path: encoded bytes in, decoded acks out, channel rising
    #[test]
    fn test_end_to_end_set_parameters_then_start() {
        let core = Shared::new(StimCore::new());
        let mut hal = MockHal::new();
        let mut rx = Receiver::new();

        let set = device_frame(CMD_SET_PARAMETERS, &valid_parameter_bytes());
        rx.feed_slice(&set.encode_to_vec().unwrap());
        let frame = rx.poll(0).unwrap();
        let ack = dispatch(&frame, &core, &mut hal, &MockInfo).unwrap();
        assert_eq!(ack.frame_type, ACK_SET_PARAMETERS);
        assert_eq!(ack.payload[0], STATUS_OK);

        let start = device_frame(CMD_START_STIM, &[]);
        rx.feed_slice(&start.encode_to_vec().unwrap());
        let frame = rx.poll(1).unwrap();
        let ack = dispatch(&frame, &core, &mut hal, &MockInfo).unwrap();
        assert_eq!(ack.frame_type, ACK_START_STIM);
        assert_eq!(ack.payload[0], STATUS_OK);

        // Channel A is rising and serviced on the very first tick
        core.with(|c| {
            assert_eq!(c.channels[0].ramp_phase, RampPhase::Rising);
            assert_eq!(c.pulse_tick(&mut hal), TickOutcome::Busy);
        });
    }
}
