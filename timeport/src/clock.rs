use crate::{config::TimePropertiesDS, time::{Duration, Time}};

/// Clock manipulation and querying interface
///
/// The clock trait is the primary way the port steers the clock of the
/// system it is synchronizing. The implementation is provided by the
/// embedding, as clock steering is inherently platform specific.
pub trait Clock {
    /// Type of the error the clock can return
    type Error: core::fmt::Debug;

    /// Get the current time of the clock
    fn now(&self) -> Time;

    /// Change the current time of the clock by offset. Returns the time at
    /// which the change was applied.
    fn step_clock(&mut self, offset: Duration) -> Result<Time, Self::Error>;

    /// Set the frequency of the clock, returning the time at which the
    /// change was applied. The value is in ppm difference from the clocks
    /// base frequency.
    fn set_frequency(&mut self, ppm: f64) -> Result<Time, Self::Error>;

    /// Adjust the timescale properties of the clock, including leap
    /// seconds. These are provided by the current master.
    fn set_properties(&mut self, time_properties_ds: &TimePropertiesDS)
        -> Result<(), Self::Error>;
}
