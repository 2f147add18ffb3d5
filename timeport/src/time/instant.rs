use core::{
    fmt,
    ops::{Add, AddAssign, Sub, SubAssign},
};

use az::Az;
use fixed::types::{I48F16, U96F32};

use super::duration::Duration;
use crate::datastructures::common::{TimeInterval, WireTimestamp};

/// Time represented with nanosecond precision
///
/// This is the central time representation fed into the measurement pipeline.
/// Sub-nanosecond resolution keeps the correction fields exact.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Time {
    /// Time in nanos since start of timescale
    inner: U96F32,
}

impl Time {
    /// Create an instance with the given amount of seconds from the origin
    pub fn from_secs(secs: u64) -> Self {
        let inner = secs.az::<U96F32>() * 1_000_000_000.az::<U96F32>();
        Self { inner }
    }

    /// Create an instance with the given amount of milliseconds from the
    /// origin
    pub fn from_millis(millis: u64) -> Self {
        let inner = millis.az::<U96F32>() * 1_000_000.az::<U96F32>();
        Self { inner }
    }

    /// Create an instance with the given amount of microseconds from the
    /// origin
    pub fn from_micros(micros: u64) -> Self {
        let inner = micros.az::<U96F32>() * 1_000.az::<U96F32>();
        Self { inner }
    }

    /// Create an instance with the given amount of nanoseconds from the origin
    pub fn from_nanos(nanos: u64) -> Self {
        let inner = nanos.az::<U96F32>();
        Self { inner }
    }

    /// Create an instance with the given amount of nanoseconds from the origin
    pub fn from_fixed_nanos<F: Into<U96F32>>(nanos: F) -> Self {
        Self {
            inner: nanos.into(),
        }
    }

    /// Get the total amount of nanoseconds since the origin
    pub fn nanos(&self) -> U96F32 {
        self.inner
    }

    /// Get all the whole seconds of the instant
    pub fn secs(&self) -> u64 {
        (self.inner / 1_000_000_000.az::<U96F32>()).az::<u64>()
    }

    /// Get the subsecond amount of nanoseconds
    pub fn subsec_nanos(&self) -> u32 {
        (self.inner % 1_000_000_000.az::<U96F32>()).az::<u32>()
    }

    /// Get the fractional part of the nanoseconds as a wire time interval
    pub fn subnano(&self) -> TimeInterval {
        let inter: I48F16 = self.inner.frac().to_num();
        TimeInterval(inter)
    }
}

impl From<WireTimestamp> for Time {
    fn from(ts: WireTimestamp) -> Self {
        Time::from_fixed_nanos(
            U96F32::from_num(ts.seconds) * 1_000_000_000.az::<U96F32>()
                + U96F32::from_num(ts.nanos),
        )
    }
}

impl From<Time> for WireTimestamp {
    fn from(time: Time) -> Self {
        WireTimestamp {
            seconds: time.secs(),
            nanos: time.subsec_nanos(),
        }
    }
}

impl Add<Duration> for Time {
    type Output = Time;

    fn add(self, rhs: Duration) -> Self::Output {
        let rhs_abs: U96F32 = rhs.nanos().unsigned_abs();
        if rhs.nanos().is_negative() {
            if self.inner < rhs_abs {
                Time::default()
            } else {
                Time::from_fixed_nanos(self.inner - rhs_abs)
            }
        } else {
            Time::from_fixed_nanos(self.inner + rhs_abs)
        }
    }
}

impl AddAssign<Duration> for Time {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl Sub<Duration> for Time {
    type Output = Time;

    fn sub(self, rhs: Duration) -> Self::Output {
        self + -rhs
    }
}

impl SubAssign<Duration> for Time {
    fn sub_assign(&mut self, rhs: Duration) {
        *self = *self - rhs;
    }
}

impl Sub<Time> for Time {
    type Output = Duration;

    fn sub(self, rhs: Time) -> Self::Output {
        Duration::from_fixed_nanos(self.inner.az::<fixed::types::I96F32>())
            - Duration::from_fixed_nanos(rhs.inner.az::<fixed::types::I96F32>())
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s{}ns", self.secs(), self.subsec_nanos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_arithmetic() {
        let a = Time::from_micros(100);
        let b = Time::from_micros(70);

        assert_eq!(a - b, Duration::from_micros(30));
        assert_eq!(b - a, Duration::from_micros(-30));
        assert_eq!(a + Duration::from_micros(5), Time::from_micros(105));
        assert_eq!(a - Duration::from_micros(5), Time::from_micros(95));
    }

    #[test]
    fn subtracting_below_zero_saturates() {
        let t = Time::from_nanos(10);
        assert_eq!(t - Duration::from_nanos(20), Time::default());
    }

    #[test]
    fn wire_timestamp_roundtrip() {
        let t = Time::from_fixed_nanos(U96F32::from_num(3_000_000_123u64));
        let wire: WireTimestamp = t.into();
        assert_eq!(wire.seconds, 3);
        assert_eq!(wire.nanos, 123);
        assert_eq!(Time::from(wire), t);
    }
}
