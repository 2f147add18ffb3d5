use crate::time::{Duration, Time};

/// A single measurement as produced by the message handlers of a port.
///
/// The measurement is fed into the port's [`Filter`](`crate::filters::Filter`)
/// which is responsible for steering the clock with it.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Measurement {
    /// Time this measurement was made.
    pub event_time: Time,
    /// Offset to the remote PTP node.
    pub offset: Option<Duration>,
    /// Mean delay on the path to the master, from a delay exchange.
    pub delay: Option<Duration>,
    /// Delay on the link to our neighbor, from a peer delay exchange.
    pub peer_delay: Option<Duration>,
    /// Raw offset calculated from a sync message.
    pub raw_sync_offset: Option<Duration>,
    /// Raw offset calculated from a delay message.
    pub raw_delay_offset: Option<Duration>,
}
