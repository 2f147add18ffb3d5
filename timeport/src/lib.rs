//! Implementation of the port engine of the IEEE 1588-2019 Precision Time
//! Protocol.
//!
//! `timeport` runs the full per-interface PTP machinery: the protocol state
//! machine, exchange of the timing messages, the best master clock
//! algorithm, end to end and peer to peer delay measurement, and the gPTP
//! (IEEE 802.1AS) profile with neighbor rate estimation and asCapable
//! gating.
//!
//! The crate is sans-I/O: a [`Port`](`port::Port`) never touches sockets or
//! timers itself. Instead its `handle_*` methods return
//! [`PortAction`](`port::PortAction`)s describing the packets to send and
//! the timers to arm, and the embedding feeds packet arrivals, timer
//! expiries, and transmit timestamps back in. This makes the protocol logic
//! directly testable and portable from a Linux daemon down to bare-metal
//! targets.
//!
//! Because of the filter and clock abstractions, this library can be used
//! to sync to any clock source using any control algorithm.

#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![warn(missing_docs)]

mod bmc;
mod clock;
pub mod config;
mod datastructures;
pub mod filters;
mod float_polyfill;
pub mod port;
mod ptp_instance;
pub mod time;

pub use clock::Clock;
pub use ptp_instance::{PtpInstance, PtpInstanceState, PtpInstanceStateMutex};
