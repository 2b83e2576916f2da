//! Board-agnostic control core for the Myopulse EMS/EMG device
//!
//! This crate contains all stimulation-engine logic that does not depend
//! on specific hardware implementations:
//!
//! - Hardware abstraction traits (output stage, lead-off comparator,
//!   analog front-end routing, pulse timer)
//! - Validated stimulation parameters
//! - Per-channel state with lead-off debounce
//! - The 50 µs pulse scheduler state machine
//! - The 50 ms intensity ramp controller
//! - The command dispatcher for host frames
//! - An interrupt-masked shared cell for main-loop/ISR state
//!
//! Firmware glue owns a `Shared<StimCore>`: the 50 µs timer interrupt
//! calls [`StimCore::pulse_tick`], a 50 ms tick calls
//! [`StimCore::ramp_tick`], and the main loop feeds frames from the
//! protocol receiver through [`dispatch::dispatch`].

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod channel;
pub mod dispatch;
pub mod params;
pub mod pulse;
pub mod ramp;
pub mod shared;
pub mod traits;

pub use channel::{ChannelId, ChannelState, RampPhase};
pub use dispatch::StimCore;
pub use params::{ParamError, StimParameters};
pub use pulse::{PulseScheduler, TickOutcome};
pub use ramp::RampController;
pub use shared::Shared;
pub use traits::{DeviceInfo, FrontendRoute, StimHal};
