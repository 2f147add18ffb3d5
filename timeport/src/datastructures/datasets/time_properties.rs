use crate::datastructures::common::{LeapIndicator, TimeSource};

/// A concrete implementation of the PTP Time Properties dataset
///
/// This dataset describes the timescale currently in use, as well as any
/// upcoming leap seconds on that timescale.
///
/// For more details see *IEEE1588-2019 section 8.2.4*.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimePropertiesDS {
    /// The offset off UTC time compared to TAI time in seconds
    pub current_utc_offset: Option<i16>,
    /// Describes upcoming leap seconds
    pub leap_indicator: LeapIndicator,
    /// Whether the timescale is tracable to a primary reference
    pub time_traceable: bool,
    /// Whether the frequency determining the timescale is tracable to a
    /// primary reference. True when the timescale is PTP, false when it is
    /// ARB.
    pub frequency_traceable: bool,
    /// Whether the timescale of the grandmaster PTP instance is PTP
    pub ptp_timescale: bool,
    /// The time source used by the grandmaster PTP instance
    pub time_source: TimeSource,
}

impl TimePropertiesDS {
    /// Create a Time Properties data set for the PTP timescale.
    ///
    /// This creates a dataset for the default PTP timescale, which is UTC
    /// seconds since the PTP epoch excluding leap seconds.
    pub fn new_ptp_time(
        current_utc_offset: Option<i16>,
        leap_indicator: LeapIndicator,
        time_traceable: bool,
        frequency_traceable: bool,
        time_source: TimeSource,
    ) -> Self {
        TimePropertiesDS {
            current_utc_offset,
            leap_indicator,
            time_traceable,
            frequency_traceable,
            ptp_timescale: true,
            time_source,
        }
    }

    /// Create a Time Properties data set for an Arbitrary timescale
    ///
    /// The arbitrary timescale can be used when wanting to synchronize
    /// multiple computers using PTP to a timescale that is unrelated to UTC.
    pub fn new_arbitrary_time(
        time_traceable: bool,
        frequency_traceable: bool,
        time_source: TimeSource,
    ) -> Self {
        TimePropertiesDS {
            current_utc_offset: None,
            leap_indicator: LeapIndicator::NoLeap,
            time_traceable,
            frequency_traceable,
            ptp_timescale: false,
            time_source,
        }
    }

    /// Is the current timescale the ptp (utc-derived) timescale?
    pub fn is_ptp(&self) -> bool {
        self.ptp_timescale
    }

    /// Information about upcoming leap seconds
    pub fn leap_indicator(&self) -> LeapIndicator {
        self.leap_indicator
    }

    /// Current offset to UTC caused by leap seconds
    ///
    /// Only meaningful if this is a PTP timescale
    pub fn utc_offset(&self) -> Option<i16> {
        self.current_utc_offset
    }
}
