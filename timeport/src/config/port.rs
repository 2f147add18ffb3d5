use arrayvec::ArrayVec;
use rand::Rng;

use crate::time::{Duration, Interval};

/// Which delay mechanism a port uses to measure its path or link delay.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum DelayMechanism {
    /// End to end delay mechanism. Delay measurement is done directly to the
    /// chosen master, across potential transparent nodes in between.
    ///
    /// the interval corresponds to the PortDS logMinDelayReqInterval
    E2E {
        #[allow(missing_docs)]
        interval: Interval,
    },
    /// Peer to peer delay mechanism. Delay measurement is done to the
    /// immediate neighbor, irrespective of the master the port listens to.
    ///
    /// the interval corresponds to the PortDS logMinPdelayReqInterval
    P2P {
        #[allow(missing_docs)]
        interval: Interval,
    },
    /// Starts out as end to end, and switches to peer to peer when a peer
    /// delay request arrives on the link.
    Auto {
        #[allow(missing_docs)]
        interval: Interval,
    },
    /// No delay measurement at all.
    None,
}

impl DelayMechanism {
    /// The pacing of delay requests for this mechanism
    pub(crate) fn interval(&self) -> Interval {
        match self {
            DelayMechanism::E2E { interval }
            | DelayMechanism::P2P { interval }
            | DelayMechanism::Auto { interval } => *interval,
            DelayMechanism::None => Interval::ONE_SECOND,
        }
    }
}

/// When a faulted port tries to recover.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultInterval {
    /// Recover on the next pass through the event loop
    Asap,
    /// Recover after 2^value seconds
    Log(Interval),
    /// Recover after a linear number of seconds
    Seconds(u32),
}

impl FaultInterval {
    pub(crate) fn duration(&self) -> Option<core::time::Duration> {
        match self {
            FaultInterval::Asap => None,
            FaultInterval::Log(interval) => Some(interval.as_core_duration()),
            FaultInterval::Seconds(secs) => Some(core::time::Duration::from_secs(*secs as u64)),
        }
    }
}

/// Static description of the port used to answer CLOCK_DESCRIPTION and
/// PORT_PROPERTIES_NP management queries.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PortDescription {
    /// Name of the network interface backing this port
    pub interface_name: ArrayVec<u8, 16>,
    /// Physical (hardware) address of the interface
    pub physical_address: ArrayVec<u8, 16>,
    /// Whether packet timestamps come from hardware or software
    pub hardware_timestamping: bool,
}

/// Configuration items of the PTP PortDS dataset. Dynamical fields are kept
/// as part of [`crate::port::Port`].
#[derive(Clone, Debug)]
pub struct PortConfig<A> {
    /// The set of clocks this port will accept as its master
    pub acceptable_master_list: A,
    /// The mechanism used for delay measurement
    pub delay_mechanism: DelayMechanism,
    /// Pacing of announce messages, PortDS logAnnounceInterval
    pub announce_interval: Interval,
    /// Number of announce intervals without announce messages from the
    /// current master before it is presumed dead
    pub announce_receipt_timeout: u8,
    /// Pacing of sync messages, PortDS logSyncInterval
    pub sync_interval: Interval,
    /// Number of sync intervals without sync messages from the current
    /// master before synchronization is presumed lost
    pub sync_receipt_timeout: u8,
    /// Whether this port may never become a slave
    pub master_only: bool,
    /// Correction for a difference between the upstream and downstream path
    /// lengths
    pub delay_asymmetry: Duration,
    /// Run the IEEE 802.1AS (gPTP) profile on this port: produce and consume
    /// follow up information TLVs, estimate the neighbor rate ratio, and
    /// gate participation on asCapable.
    pub gptp_profile: bool,
    /// Upper bound on the peer delay, above it the link is not asCapable
    pub neighbor_prop_delay_thresh: Duration,
    /// Lower bound on the peer delay, below it the link is not asCapable
    pub min_neighbor_prop_delay: Duration,
    /// Pacing of neighbor rate ratio updates
    pub freq_est_interval: Interval,
    /// When a SYNC arrives from a node that is not the current parent,
    /// process it anyway instead of dropping it.
    pub skip_sync_check: bool,
    /// Retry pacing for unspecified faults
    pub fault_reset_interval: FaultInterval,
    /// Retry pacing after a bad peer network fault
    pub fault_badpeernet_interval: FaultInterval,
    /// Description served over management
    pub port_description: PortDescription,
}

impl<A> PortConfig<A> {
    pub(crate) fn min_delay_req_interval(&self) -> Interval {
        match self.delay_mechanism {
            DelayMechanism::E2E { interval } => interval,
            DelayMechanism::P2P { interval } => interval,
            DelayMechanism::Auto { interval } => interval,
            DelayMechanism::None => Interval::ONE_SECOND,
        }
    }

    /// Time until the current master is presumed lost: the receipt timeout
    /// with one announce interval of random jitter, so a segment of ports
    /// does not stampede into the master state together.
    pub fn announce_duration(&self, rng: &mut impl Rng) -> core::time::Duration {
        // timeout is the number of announce intervals to wait, with the
        // uniform jitter making it [timeout, timeout + 1)
        let factor = self.announce_receipt_timeout as f64
            + rng.sample::<f64, _>(rand::distributions::Open01);

        self.announce_interval.as_core_duration().mul_f64(factor)
    }
}
