//! Hardware abstraction traits
//!
//! These traits define the interface between the stimulation engine and
//! hardware-specific implementations. All methods are fire-and-forget
//! register writes or single-sample reads; none may block, since
//! [`StimHal`] is called from the 50 µs interrupt context.

use crate::channel::ChannelId;

/// Where the shared analog front-end is routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrontendRoute {
    /// Stimulation output stage connected to the electrodes
    Stimulation,
    /// EMG sensing chain connected to the electrodes
    Emg,
}

/// Stimulation hardware seam
///
/// Implemented by the firmware glue over the real output stage, DAC,
/// lead-off comparator, and hard-real-time timer.
pub trait StimHal {
    /// Enable a channel's output driver and gain stage
    fn enable_output(&mut self, channel: ChannelId);

    /// Disable a channel's output driver
    fn disable_output(&mut self, channel: ChannelId);

    /// Push an amplitude value to the output stage
    fn set_output_amplitude(&mut self, value: u8);

    /// Sample the lead-off comparator; true means the electrode circuit
    /// reads open
    fn read_lead_off(&mut self, channel: ChannelId) -> bool;

    /// Switch the analog front-end between stimulation and EMG sensing
    fn route_frontend(&mut self, route: FrontendRoute);

    /// Start the 50 µs pulse timer interrupt
    fn start_pulse_timer(&mut self);

    /// Stop the 50 µs pulse timer interrupt
    fn stop_pulse_timer(&mut self);
}

/// Static device identity and battery state, used by the general-token
/// query handlers
pub trait DeviceInfo {
    /// Firmware version as (major, minor)
    fn firmware_version(&self) -> (u8, u8);

    /// Device serial number bytes
    fn serial(&self) -> &[u8];

    /// Battery charge remaining, 0-100
    fn battery_percent(&self) -> u8;
}
