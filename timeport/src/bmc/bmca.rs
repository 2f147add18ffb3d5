//! Implementation of the best master clock algorithm [`Bmca`]

use core::cmp::Ordering;

use super::{
    acceptable_master::AcceptableMasterList,
    dataset_comparison::{ComparisonDataset, DatasetOrdering},
    foreign_master::ForeignMasterList,
};
use crate::{
    datastructures::{
        common::{PortIdentity, TimeInterval},
        datasets::InternalDefaultDS,
        messages::{AnnounceMessage, Header},
    },
    port::state::PortState,
    time::Duration,
};

/// Object implementing the Best Master Clock Algorithm
///
/// Usage:
///
/// - Every port has its own instance.
/// - When a port receives an announce message, it has to register it with
///   the [`Bmca::register_announce_message`] method
/// - When it is time to run the algorithm, the ptp runtime has to take all
///   the best announce messages using
///   [`Bmca::take_best_port_announce_message`]
/// - Of the resulting set, the best global one needs to be determined. This
///   can be done using [`Bmca::find_best_announce_message`]
/// - Then to get the recommended state for each port,
///   [`Bmca::calculate_recommended_state`] needs to be called
#[derive(Debug)]
pub(crate) struct Bmca<A> {
    foreign_master_list: ForeignMasterList,
    acceptable_master_list: A,
    own_port_identity: PortIdentity,
}

impl<A: AcceptableMasterList> Bmca<A> {
    pub(crate) fn new(
        acceptable_master_list: A,
        own_port_announce_interval: TimeInterval,
        own_port_identity: PortIdentity,
        qualification_threshold: usize,
    ) -> Self {
        Self {
            foreign_master_list: ForeignMasterList::new(
                own_port_announce_interval,
                own_port_identity,
                qualification_threshold,
            ),
            acceptable_master_list,
            own_port_identity,
        }
    }

    /// Register a received announce message to the BMC algorithm. Returns
    /// whether the announce came from an accepted master, in which case the
    /// caller should rearm its announce receipt timeout.
    pub(crate) fn register_announce_message(
        &mut self,
        header: &Header,
        announce_message: &AnnounceMessage,
    ) -> bool {
        if !self
            .acceptable_master_list
            .is_acceptable(header.source_port_identity.clock_identity)
        {
            return false;
        }

        // Ignore messages coming from the same port
        if announce_message.header.source_port_identity != self.own_port_identity {
            self.foreign_master_list
                .register_announce_message(announce_message, Duration::ZERO);
            true
        } else {
            false
        }
    }

    pub(crate) fn step_age(&mut self, step: Duration) {
        self.foreign_master_list.step_age(step);
    }

    /// Forget all buffered foreign masters, used when the port stops
    /// participating in the protocol.
    pub(crate) fn reset(&mut self) {
        self.foreign_master_list.clear();
    }

    /// Takes the Erbest from this port
    pub(crate) fn take_best_port_announce_message(&mut self) -> Option<BestAnnounceMessage> {
        // Find the announce message we want to use from each foreign master
        // that has qualified messages
        let announce_messages = self.foreign_master_list.take_qualified_announce_messages();

        // The best of the foreign master messages is our erbest
        let erbest = Self::find_best_announce_message(announce_messages.map(|message| {
            BestAnnounceMessage {
                message: message.message,
                age: message.age,
                identity: self.own_port_identity,
            }
        }));

        if let Some(best) = &erbest {
            // All messages that were considered have been removed from the
            // foreignmasterlist. However, the one that has been selected as
            // the Erbest must not be removed, so let's just reregister it.
            self.foreign_master_list
                .register_announce_message(&best.message, best.age);
        }

        erbest
    }

    /// Finds the best announce message in the given iterator.
    /// The port identity in the tuple is the identity of the port that
    /// received the announce message.
    pub(crate) fn find_best_announce_message(
        announce_messages: impl IntoIterator<Item = BestAnnounceMessage>,
    ) -> Option<BestAnnounceMessage> {
        announce_messages
            .into_iter()
            .max_by(BestAnnounceMessage::compare)
    }

    fn compare_d0_best(
        d0: &ComparisonDataset,
        opt_best: Option<BestAnnounceMessage>,
    ) -> MessageComparison {
        match opt_best {
            None => MessageComparison::Better,
            Some(best) => {
                let dataset =
                    ComparisonDataset::from_announce_message(&best.message, &best.identity);

                match d0.compare(&dataset).as_ordering() {
                    Ordering::Less => MessageComparison::Worse(best),
                    Ordering::Equal => MessageComparison::Same,
                    Ordering::Greater => MessageComparison::Better,
                }
            }
        }
    }

    /// Calculates the recommended port state. This has to be run for every
    /// port. The PTP spec calls this the State Decision Algorithm.
    ///
    /// - `own_data`: Called 'D0' by the PTP spec. The DefaultDS data of our
    ///   own ptp instance.
    /// - `best_global_announce_message`: Called 'Ebest' by the PTP spec.
    ///   This is the best announce message and the identity of the port that
    ///   received it of all of the best port announce messages.
    /// - `best_port_announce_message`: Called 'Erbest' by the PTP spec. This
    ///   is the best announce message and the identity of the port that
    ///   received it of the port we are calculating the recommended state
    ///   for.
    /// - `port_state`: The current state of the port we are doing the
    ///   calculation for.
    ///
    /// If None is returned, then the port should remain in the same state as
    /// it is now.
    pub(crate) fn calculate_recommended_state(
        own_data: &InternalDefaultDS,
        best_global_announce_message: Option<BestAnnounceMessage>,
        best_port_announce_message: Option<BestAnnounceMessage>,
        port_state: PortState,
    ) -> Option<RecommendedState> {
        if best_global_announce_message.is_none() && port_state == PortState::Listening {
            None
        } else if (1..=127).contains(&own_data.clock_quality.clock_class) {
            // only consider the best message of the port
            Some(Self::calculate_recommended_state_low_class(
                own_data,
                best_port_announce_message,
            ))
        } else {
            // see if the best of this port is better than the global best
            Some(Self::calculate_recommended_state_high_class(
                own_data,
                best_global_announce_message,
                best_port_announce_message,
            ))
        }
    }

    fn calculate_recommended_state_low_class(
        own_data: &InternalDefaultDS,
        best_port_announce_message: Option<BestAnnounceMessage>,
    ) -> RecommendedState {
        let d0 = ComparisonDataset::from_own_data(own_data);

        match Self::compare_d0_best(&d0, best_port_announce_message) {
            MessageComparison::Better => RecommendedState::M1(*own_data),
            MessageComparison::Same => RecommendedState::M1(*own_data),
            MessageComparison::Worse(port) => RecommendedState::P1(port.message),
        }
    }

    fn calculate_recommended_state_high_class(
        own_data: &InternalDefaultDS,
        best_global_announce_message: Option<BestAnnounceMessage>,
        best_port_announce_message: Option<BestAnnounceMessage>,
    ) -> RecommendedState {
        let d0 = ComparisonDataset::from_own_data(own_data);

        match Self::compare_d0_best(&d0, best_global_announce_message) {
            MessageComparison::Better => RecommendedState::M2(*own_data),
            MessageComparison::Same => RecommendedState::M2(*own_data),
            MessageComparison::Worse(global_message) => match best_port_announce_message {
                None => RecommendedState::M3(global_message.message),
                Some(port_message) => Self::compare_global_and_port(global_message, port_message),
            },
        }
    }

    fn compare_global_and_port(
        global_message: BestAnnounceMessage,
        port_message: BestAnnounceMessage,
    ) -> RecommendedState {
        if global_message.message == port_message.message
            && global_message.identity == port_message.identity
        {
            // effectively, E_best == E_rbest
            RecommendedState::S1(global_message.message)
        } else {
            let ebest = ComparisonDataset::from_announce_message(
                &global_message.message,
                &global_message.identity,
            );

            let erbest = ComparisonDataset::from_announce_message(
                &port_message.message,
                &port_message.identity,
            );

            // E_best better by topology than E_rbest
            if matches!(ebest.compare(&erbest), DatasetOrdering::BetterByTopology) {
                RecommendedState::P2(port_message.message)
            } else {
                RecommendedState::M3(global_message.message)
            }
        }
    }
}

#[derive(Debug)]
enum MessageComparison {
    Better,
    Same,
    Worse(BestAnnounceMessage),
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct BestAnnounceMessage {
    pub(crate) message: AnnounceMessage,
    pub(crate) age: Duration,
    pub(crate) identity: PortIdentity,
}

impl BestAnnounceMessage {
    fn compare(&self, other: &Self) -> Ordering {
        // use the age as a tie-break if needed (prefer newer messages)
        let tie_break = other.age.cmp(&self.age);
        self.compare_dataset(other).as_ordering().then(tie_break)
    }

    fn compare_dataset(&self, other: &Self) -> DatasetOrdering {
        let data1 = ComparisonDataset::from_announce_message(&self.message, &self.identity);
        let data2 = ComparisonDataset::from_announce_message(&other.message, &other.identity);

        data1.compare(&data2)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RecommendedState {
    M1(InternalDefaultDS),
    M2(InternalDefaultDS),
    M3(AnnounceMessage),
    P1(AnnounceMessage),
    P2(AnnounceMessage),
    S1(AnnounceMessage),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bmc::acceptable_master::AcceptAnyMaster,
        config::InstanceConfig,
        datastructures::common::{ClockIdentity, ClockQuality},
    };

    fn default_own_data() -> InternalDefaultDS {
        InternalDefaultDS::new(InstanceConfig {
            clock_identity: ClockIdentity([9, 9, 9, 9, 9, 9, 9, 9]),
            priority_1: 128,
            priority_2: 128,
            domain_number: 0,
            slave_only: false,
            sdo_id: Default::default(),
            path_trace: false,
            clock_quality: ClockQuality::default(),
            gm_capable: true,
        })
    }

    fn announce_from(identity: ClockIdentity, priority_1: u8, sequence_id: u16) -> AnnounceMessage {
        let header = Header {
            source_port_identity: PortIdentity {
                clock_identity: identity,
                port_number: 1,
            },
            sequence_id,
            ..Default::default()
        };

        AnnounceMessage {
            header,
            origin_timestamp: Default::default(),
            current_utc_offset: 0,
            grandmaster_priority_1: priority_1,
            grandmaster_clock_quality: Default::default(),
            grandmaster_priority_2: 128,
            grandmaster_identity: identity,
            steps_removed: 0,
            time_source: Default::default(),
        }
    }

    #[test]
    fn best_message_requires_qualification() {
        let mut bmca = Bmca::new(
            AcceptAnyMaster,
            Duration::from_secs(1).into(),
            PortIdentity::default(),
            2,
        );

        let remote = ClockIdentity([1, 2, 3, 4, 5, 6, 7, 8]);
        let message = announce_from(remote, 100, 0);
        assert!(bmca.register_announce_message(&message.header, &message));

        // One announce does not get us a best master
        assert!(bmca.take_best_port_announce_message().is_none());

        let message = announce_from(remote, 100, 1);
        assert!(bmca.register_announce_message(&message.header, &message));

        let best = bmca.take_best_port_announce_message().unwrap();
        assert_eq!(best.message.grandmaster_identity, remote);
    }

    #[test]
    fn better_master_wins() {
        let mut bmca = Bmca::new(
            AcceptAnyMaster,
            Duration::from_secs(1).into(),
            PortIdentity::default(),
            1,
        );

        let worse = announce_from(ClockIdentity([1, 1, 1, 1, 1, 1, 1, 1]), 200, 0);
        let better = announce_from(ClockIdentity([2, 2, 2, 2, 2, 2, 2, 2]), 100, 0);

        bmca.register_announce_message(&worse.header, &worse);
        bmca.register_announce_message(&better.header, &better);

        let best = bmca.take_best_port_announce_message().unwrap();
        assert_eq!(best.message.grandmaster_priority_1, 100);
    }

    #[test]
    fn unacceptable_master_is_ignored() {
        let mut bmca = Bmca::new(
            std::vec![ClockIdentity([5, 5, 5, 5, 5, 5, 5, 5])],
            Duration::from_secs(1).into(),
            PortIdentity::default(),
            1,
        );

        let message = announce_from(ClockIdentity([1, 1, 1, 1, 1, 1, 1, 1]), 1, 0);
        assert!(!bmca.register_announce_message(&message.header, &message));
        assert!(bmca.take_best_port_announce_message().is_none());
    }

    #[test]
    fn better_announce_recommends_slave() {
        let own_data = default_own_data();
        let best = BestAnnounceMessage {
            message: announce_from(ClockIdentity([1, 1, 1, 1, 1, 1, 1, 1]), 1, 0),
            age: Duration::ZERO,
            identity: PortIdentity::default(),
        };

        let recommendation = Bmca::<AcceptAnyMaster>::calculate_recommended_state(
            &own_data,
            Some(best),
            Some(best),
            PortState::Listening,
        );

        assert_eq!(recommendation, Some(RecommendedState::S1(best.message)));
    }

    #[test]
    fn no_master_recommends_nothing_while_listening() {
        let own_data = default_own_data();

        let recommendation = Bmca::<AcceptAnyMaster>::calculate_recommended_state(
            &own_data,
            None,
            None,
            PortState::Listening,
        );

        assert_eq!(recommendation, None);
    }
}
