//! Implementation of the abstract clock for the linux platform

use std::path::Path;

use clock_steering::{unix::UnixClock, Clock};
use timeport::{
    config::{LeapIndicator, TimePropertiesDS},
    time::{Duration, Time},
};

/// A clock of the linux system, either the system realtime clock or a PHC
/// of a network card.
#[derive(Debug, Clone)]
pub struct LinuxClock {
    clock: UnixClock,
}

impl LinuxClock {
    /// The system-wide realtime clock
    pub const CLOCK_REALTIME: Self = Self {
        clock: UnixClock::CLOCK_REALTIME,
    };

    /// Open a hardware clock device such as `/dev/ptp0`
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let clock = UnixClock::open(path)?;
        Ok(Self { clock })
    }

    /// Open the PHC with the given index
    pub fn open_idx(idx: u32) -> std::io::Result<Self> {
        let path = format!("/dev/ptp{}", idx);
        Self::open(path)
    }
}

fn clock_timestamp_to_time(t: clock_steering::Timestamp) -> Time {
    Time::from_nanos((t.seconds as u64) * 1_000_000_000 + t.nanos as u64)
}

fn time_from_timestamp(ts: Option<timestamped_socket::socket::Timestamp>, fallback: Time) -> Time {
    let Some(ts) = ts else {
        return fallback;
    };

    Time::from_nanos((ts.seconds as u64) * 1_000_000_000 + ts.nanos as u64)
}

/// Turn a socket timestamp into a [`Time`], falling back to reading the
/// clock when the packet went without one.
pub fn port_timestamp_to_time(
    ts: Option<timestamped_socket::socket::Timestamp>,
    clock: &LinuxClock,
) -> Time {
    time_from_timestamp(ts, timeport::Clock::now(clock))
}

impl timeport::Clock for LinuxClock {
    type Error = clock_steering::unix::Error;

    fn now(&self) -> Time {
        let timestamp = self.clock.now().expect("could not read time");
        clock_timestamp_to_time(timestamp)
    }

    fn step_clock(&mut self, offset: Duration) -> Result<Time, Self::Error> {
        let offset_nanos: i64 = offset.nanos_rounded() as i64;
        let offset = clock_steering::TimeOffset {
            seconds: offset_nanos.div_euclid(1_000_000_000),
            nanos: offset_nanos.rem_euclid(1_000_000_000) as u32,
        };

        log::trace!(
            "Stepping clock {:e}ns",
            (offset.seconds as f64) * 1e9 + (offset.nanos as f64)
        );

        let timestamp = self.clock.step_clock(offset)?;
        Ok(clock_timestamp_to_time(timestamp))
    }

    fn set_frequency(&mut self, freq: f64) -> Result<Time, Self::Error> {
        log::trace!("Setting clock frequency to {:e}ppm", freq);
        let timestamp = self.clock.set_frequency(freq)?;
        Ok(clock_timestamp_to_time(timestamp))
    }

    fn set_properties(&mut self, time_properties: &TimePropertiesDS) -> Result<(), Self::Error> {
        // For clocks other than the system clock, we
        // don't do anything with the properties
        if self.clock != UnixClock::CLOCK_REALTIME {
            return Ok(());
        }

        self.clock.set_leap_seconds(match time_properties.leap_indicator() {
            LeapIndicator::NoLeap => clock_steering::LeapIndicator::NoWarning,
            LeapIndicator::Leap61 => clock_steering::LeapIndicator::Leap61,
            LeapIndicator::Leap59 => clock_steering::LeapIndicator::Leap59,
        })?;

        Ok(())
    }
}
