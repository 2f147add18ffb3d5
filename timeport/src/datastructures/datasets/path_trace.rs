use arrayvec::ArrayVec;

use crate::datastructures::common::ClockIdentity;

/// The maximum amount of hops a path trace can record. Large enough to
/// hold the identity list of a maximum size message.
pub const MAX_PATH_TRACE_LENGTH: usize = 128;

/// The optional path trace dataset, see *IEEE1588-2019 section 16.2.2*
///
/// When enabled, announce messages carry the list of clock identities they
/// passed through. The list is used to detect synchronization loops.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PathTraceDS {
    /// Whether the path trace option is active on this instance
    pub enable: bool,
    /// The path trace list received from the current parent
    pub list: ArrayVec<ClockIdentity, MAX_PATH_TRACE_LENGTH>,
}

impl PathTraceDS {
    /// Create a new dataset, empty until announce messages arrive
    pub fn new(enable: bool) -> Self {
        PathTraceDS {
            enable,
            ..Default::default()
        }
    }
}
