//! Implementation of [`BasicFilter`]

use az::Az;
use fixed::types::I96F32;

use super::{Filter, FilterUpdate, ServoState};
use crate::{port::Measurement, time::Duration, Clock};
#[allow(unused_imports)]
use crate::float_polyfill::FloatPolyfill;

#[derive(Debug)]
struct PrevStepData {
    event_time: crate::time::Time,
    offset: Duration,
    correction: Duration,
}

/// A basic filter and servo implementation that should work in most
/// circumstances
///
/// The filter dampens the raw offsets with a configurable gain, steps the
/// clock when the offset is too large to slew away, and estimates a
/// frequency correction from consecutive measurements.
#[derive(Debug)]
pub struct BasicFilter {
    last_step: Option<PrevStepData>,

    offset_confidence: Duration,
    freq_confidence: f64,

    gain: f64,
    mean_delay: Option<Duration>,
}

/// Offsets larger than this are corrected by stepping the clock
fn step_threshold() -> Duration {
    Duration::from_secs(1)
}

/// Offsets smaller than this count as locked onto the master
fn lock_threshold() -> Duration {
    Duration::from_micros(500)
}

impl Filter for BasicFilter {
    type Config = f64;

    fn new(gain: f64) -> Self {
        Self {
            last_step: None,
            offset_confidence: Duration::from_nanos(1_000_000_000),
            freq_confidence: 1e-4,
            gain,
            mean_delay: None,
        }
    }

    fn measurement<C: Clock>(&mut self, m: Measurement, clock: &mut C) -> FilterUpdate {
        let mut update = FilterUpdate::default();

        if let Some(delay) = m.delay.or(m.peer_delay) {
            self.mean_delay = Some(delay);
            update.mean_delay = Some(delay);
        }

        let Some(offset) = m.offset else {
            // Without a new offset this was a pure delay measurement
            update.state = ServoState::Locking;
            return update;
        };

        // Reset on too-large difference
        if offset.abs() > step_threshold() {
            log::debug!("Offset too large, stepping {}", offset);
            self.offset_confidence = Duration::from_nanos(1_000_000_000);
            self.freq_confidence = 1e-4;
            self.last_step = None;

            if let Err(error) = clock.step_clock(-offset) {
                log::error!("Could not step clock: {:?}", error);
                update.state = ServoState::Unlocked;
                return update;
            }

            update.state = ServoState::Jump;
            return update;
        }

        // Determine clamped offset
        let mut clamped_offset = offset;
        if clamped_offset.abs() > self.offset_confidence {
            clamped_offset =
                clamped_offset.clamp(-self.offset_confidence, self.offset_confidence);
            self.offset_confidence = self.offset_confidence * 2i32;
        } else {
            self.offset_confidence = self.offset_confidence
                - (self.offset_confidence - clamped_offset.abs()) * self.gain.az::<I96F32>();
        }

        // And decide its correction
        let correction = -clamped_offset * self.gain.az::<I96F32>();

        let freq_corr = if let Some(last_step) = &self.last_step {
            // Interval as we observed it
            let interval_local: f64 =
                (m.event_time - last_step.event_time - last_step.correction).nanos_lossy();
            // and the interval as the master observed it
            let interval_master: f64 =
                ((m.event_time - offset) - (last_step.event_time - last_step.offset)).nanos_lossy();

            let mut freq_diff = interval_local / interval_master;
            if (freq_diff - 1.0).abs() > self.freq_confidence {
                freq_diff = freq_diff.clamp(1.0 - self.freq_confidence, 1.0 + self.freq_confidence);
                self.freq_confidence *= 2.0;
            } else {
                self.freq_confidence -=
                    (self.freq_confidence - (freq_diff - 1.0).abs()) * self.gain;
            }

            (freq_diff - 1.0) * self.gain * 0.1
        } else {
            // No data, so no correction
            0.0
        };

        log::info!(
            "Offset to master: {}, corrected with phase change {} and freq change {}ppm",
            offset,
            correction,
            freq_corr * 1e6
        );

        if let Err(error) = clock.step_clock(correction) {
            log::error!("Could not adjust clock: {:?}", error);
            update.state = ServoState::Unlocked;
            return update;
        }
        if let Err(error) = clock.set_frequency(freq_corr * 1e6) {
            log::error!("Could not adjust clock frequency: {:?}", error);
            update.state = ServoState::Unlocked;
            return update;
        }

        self.last_step = Some(PrevStepData {
            event_time: m.event_time,
            offset,
            correction,
        });

        update.state = if offset.abs() < lock_threshold() {
            ServoState::Locked
        } else {
            ServoState::Locking
        };
        update
    }

    fn update<C: Clock>(&mut self, _clock: &mut C) -> FilterUpdate {
        // No periodic updates needed
        Default::default()
    }

    fn demobilize<C: Clock>(self, _clock: &mut C) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::TimePropertiesDS, time::Time};

    #[derive(Debug, Default)]
    struct TestClock {
        steps: arrayvec::ArrayVec<Duration, 8>,
    }

    impl Clock for TestClock {
        type Error = ();

        fn now(&self) -> Time {
            Time::default()
        }

        fn step_clock(&mut self, offset: Duration) -> Result<Time, Self::Error> {
            self.steps.push(offset);
            Ok(Time::default())
        }

        fn set_frequency(&mut self, _ppm: f64) -> Result<Time, Self::Error> {
            Ok(Time::default())
        }

        fn set_properties(&mut self, _: &TimePropertiesDS) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    #[test]
    fn large_offset_steps_clock() {
        let mut filter = BasicFilter::new(0.25);
        let mut clock = TestClock::default();

        let update = filter.measurement(
            Measurement {
                event_time: Time::from_secs(10),
                offset: Some(Duration::from_secs(5)),
                ..Default::default()
            },
            &mut clock,
        );

        assert_eq!(update.state, ServoState::Jump);
        assert_eq!(clock.steps.as_slice(), &[Duration::from_secs(-5)]);
    }

    #[test]
    fn small_offset_locks() {
        let mut filter = BasicFilter::new(0.25);
        let mut clock = TestClock::default();

        let update = filter.measurement(
            Measurement {
                event_time: Time::from_secs(10),
                offset: Some(Duration::from_nanos(200)),
                delay: Some(Duration::from_nanos(100)),
                ..Default::default()
            },
            &mut clock,
        );

        assert_eq!(update.state, ServoState::Locked);
        assert_eq!(update.mean_delay, Some(Duration::from_nanos(100)));
    }
}
