use core::{
    fmt,
    ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign},
};

use az::Az;
use fixed::types::I96F32;

use super::Interval;
use crate::datastructures::common::TimeInterval;

/// A duration, positive or negative, with nanosecond precision
///
/// The nanosecond fraction is stored in fixed point so corrections from the
/// wire (which carry sub-nanosecond resolution) survive arithmetic unscathed.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct Duration {
    /// Time in nanos
    inner: I96F32,
}

impl Duration {
    /// A duration of zero length
    pub const ZERO: Duration = Duration {
        inner: I96F32::ZERO,
    };

    /// Create an instance with the given amount of seconds
    pub fn from_secs(secs: i64) -> Self {
        let inner = secs.az::<I96F32>() * 1_000_000_000.az::<I96F32>();
        Self { inner }
    }

    /// Create an instance with the given amount of milliseconds
    pub fn from_millis(millis: i64) -> Self {
        let inner = millis.az::<I96F32>() * 1_000_000.az::<I96F32>();
        Self { inner }
    }

    /// Create an instance with the given amount of microseconds
    pub fn from_micros(micros: i64) -> Self {
        let inner = micros.az::<I96F32>() * 1_000.az::<I96F32>();
        Self { inner }
    }

    /// Create an instance with the given amount of nanoseconds
    pub fn from_nanos(nanos: i64) -> Self {
        let inner = nanos.az::<I96F32>();
        Self { inner }
    }

    /// Create an instance with the given amount of nanoseconds
    pub fn from_fixed_nanos<F: Into<I96F32>>(nanos: F) -> Self {
        Self {
            inner: nanos.into(),
        }
    }

    /// Create an instance from an [`Interval`] (log2 seconds)
    pub fn from_interval(interval: Interval) -> Self {
        let seconds = interval.seconds();
        Self {
            inner: I96F32::from_num(seconds * 1_000_000_000.0),
        }
    }

    /// Create an instance with the given amount of seconds
    pub fn from_seconds(secs: f64) -> Self {
        Self {
            inner: I96F32::from_num(secs * 1_000_000_000.0),
        }
    }

    /// Get the total amount of nanoseconds
    pub fn nanos(&self) -> I96F32 {
        self.inner
    }

    /// Get the total amount of nanoseconds, losing the fractional part
    pub fn nanos_rounded(&self) -> i128 {
        self.inner.round().az::<i128>()
    }

    /// Get the total amount of nanoseconds, losing precision
    pub fn nanos_lossy(&self) -> f64 {
        self.inner.az::<f64>()
    }

    /// Get the total amount of seconds
    pub fn seconds(&self) -> f64 {
        self.inner.az::<f64>() / 1e9
    }

    /// Get the absolute value of the duration
    pub fn abs(self) -> Duration {
        if self.inner.is_negative() {
            -self
        } else {
            self
        }
    }

    /// Clamp the duration to the given range
    pub fn clamp(self, min: Duration, max: Duration) -> Duration {
        Duration {
            inner: self.inner.clamp(min.inner, max.inner),
        }
    }
}

impl From<TimeInterval> for Duration {
    fn from(interval: TimeInterval) -> Self {
        Self::from_fixed_nanos(interval.0)
    }
}

impl Neg for Duration {
    type Output = Duration;

    fn neg(self) -> Self::Output {
        Self { inner: -self.inner }
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Self) -> Self::Output {
        Duration {
            inner: self.inner + rhs.inner,
        }
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Self) {
        self.inner += rhs.inner;
    }
}

impl Sub for Duration {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Self::Output {
        Duration {
            inner: self.inner - rhs.inner,
        }
    }
}

impl SubAssign for Duration {
    fn sub_assign(&mut self, rhs: Self) {
        self.inner -= rhs.inner;
    }
}

impl<T: Into<I96F32>> Mul<T> for Duration {
    type Output = Duration;

    fn mul(self, rhs: T) -> Self::Output {
        Duration {
            inner: self.inner * rhs.into(),
        }
    }
}

impl<T: Into<I96F32>> Div<T> for Duration {
    type Output = Duration;

    fn div(self, rhs: T) -> Self::Output {
        Duration {
            inner: self.inner / rhs.into(),
        }
    }
}

impl From<Duration> for core::time::Duration {
    fn from(value: Duration) -> Self {
        if value.inner.is_negative() {
            core::time::Duration::ZERO
        } else {
            core::time::Duration::from_nanos(value.nanos_rounded() as u64)
        }
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_and_sign() {
        let a = Duration::from_micros(2);
        let b = Duration::from_micros(5);

        assert_eq!(a + b, Duration::from_micros(7));
        assert_eq!(a - b, Duration::from_micros(-3));
        assert_eq!((a - b).abs(), Duration::from_micros(3));
        assert_eq!(-a, Duration::from_micros(-2));
        assert_eq!(a * 4, Duration::from_micros(8));
        assert_eq!(b / 5, Duration::from_micros(1));
    }

    #[test]
    fn interval_conversion() {
        assert_eq!(
            Duration::from_interval(Interval::from_log_2(-2)),
            Duration::from_millis(250)
        );
        assert_eq!(
            Duration::from_interval(Interval::from_log_2(4)),
            Duration::from_secs(16)
        );
    }

    #[test]
    fn negative_duration_saturates_to_zero_core_duration() {
        let d: core::time::Duration = Duration::from_micros(-10).into();
        assert_eq!(d, core::time::Duration::ZERO);
    }
}
