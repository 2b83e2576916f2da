//! Host command protocol for the Myopulse EMS/EMG control core
//!
//! This crate defines the framed byte protocol between the host (a mobile
//! application over a wireless link) and the stimulation engine. The
//! transport itself is out of scope; the driver feeds received bytes into
//! [`Receiver`] and sends the bytes produced by [`Frame::encode`].
//!
//! # Frame format
//!
//! ```text
//! ┌───────┬───────┬───────┬────────┬──────┬─────────┬──────┐
//! │ HEAD1 │ HEAD2 │ TOKEN │ LENGTH │ TYPE │ PAYLOAD │ CRC8 │
//! │ 0xAA  │ 0x55  │ 1B    │ 1B     │ 1B   │ 0–57B   │ 1B   │
//! └───────┴───────┴───────┴────────┴──────┴─────────┴──────┘
//! ```
//!
//! `LENGTH` counts TYPE + PAYLOAD + the CRC slot (`2 + payload_len`).
//! The CRC covers every byte from HEAD1 through the payload; running the
//! same CRC over the transmitted checksum byte yields zero for an
//! authentic frame, which is exactly how the receiver validates before
//! copying anything out of its ring buffer.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod commands;
pub mod frame;
pub mod receiver;

pub use commands::{Command, ParameterPayload, STATUS_OK, STATUS_PARAM_ERROR};
pub use frame::{Frame, FrameError, Token, HEAD1, HEAD2, MAX_PAYLOAD_SIZE};
pub use receiver::Receiver;
