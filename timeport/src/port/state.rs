pub(crate) use super::fsm::PortState;

use crate::{
    datastructures::common::PortIdentity,
    filters::Filter,
    time::{Duration, Time},
};

/// Slave side machinery of a port. Created when a master is selected for
/// the port and dropped when the port stops being a slave.
#[derive(Debug)]
pub(crate) struct SlaveState<F> {
    pub(super) remote_master: PortIdentity,

    pub(super) correlator: SyncCorrelator,
    pub(super) delay_state: DelayState,

    pub(super) mean_delay: Option<Duration>,
    pub(super) last_raw_sync_offset: Option<Duration>,

    pub(super) filter: F,
}

impl<F> SlaveState<F> {
    pub(crate) fn remote_master(&self) -> PortIdentity {
        self.remote_master
    }

    /// Forget any half finished sync/follow-up pair and outstanding delay
    /// measurement.
    pub(super) fn flush(&mut self) {
        self.correlator = SyncCorrelator::Empty;
        self.delay_state = DelayState::Empty;
    }
}

impl<F: Filter> SlaveState<F> {
    pub(super) fn new(remote_master: PortIdentity, filter_config: F::Config) -> Self {
        SlaveState {
            remote_master,
            correlator: SyncCorrelator::Empty,
            delay_state: DelayState::Empty,
            mean_delay: None,
            last_raw_sync_offset: None,
            filter: F::new(filter_config),
        }
    }
}

/// Correlator pairing two-step SYNC and FOLLOW_UP messages that may arrive
/// in either order.
///
/// A held sync carries the correction-adjusted ingress timestamp, a held
/// follow up the correction-adjusted origin timestamp. Whenever a matching
/// counterpart arrives the pair collapses into a measurement and the
/// correlator empties.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum SyncCorrelator {
    Empty,
    HaveSync { id: u16, recv_time: Time },
    HaveFup { id: u16, send_time: Time },
}

/// State of the end to end delay measurement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum DelayState {
    Empty,
    Measuring {
        id: u16,
        send_time: Option<Time>,
        recv_time: Option<Time>,
    },
}
