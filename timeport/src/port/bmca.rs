use rand::Rng;

use super::{fsm::FsmEvent, state::SlaveState, Port, PortActionIterator, PortState, Running};
use crate::{
    bmc::{
        acceptable_master::AcceptableMasterList,
        bmca::{BestAnnounceMessage, RecommendedState},
    },
    config::{LeapIndicator, TimePropertiesDS, TimeSource},
    datastructures::{
        common::{ClockIdentity, TlvType},
        datasets::{InternalCurrentDS, InternalDefaultDS, InternalParentDS, PathTraceDS},
        messages::{AnnounceMessage, Message},
    },
    filters::Filter,
    port::{InBmca, PortAction},
    ptp_instance::PtpInstanceStateMutex,
    time::Duration,
    Clock,
};

impl<'a, A: AcceptableMasterList, C: Clock, F: Filter, R: Rng, S: PtpInstanceStateMutex>
    Port<'a, Running, A, R, C, F, S>
{
    pub(super) fn handle_announce<'b>(
        &'b mut self,
        message: &Message<'b>,
        announce: AnnounceMessage,
    ) -> PortActionIterator<'b> {
        // An announce claiming we are the grandmaster went around in a loop
        let own_identity = self
            .instance_state
            .with_ref(|state| state.default_ds.clock_identity);
        if announce.grandmaster_identity == own_identity {
            return actions![];
        }

        // IEEE 1588-2019 9.5.3: Update according to table 33 (decision code
        // S1) when the announce comes from the current parent
        if matches!(
            self.port_state,
            PortState::Passive | PortState::Uncalibrated | PortState::Slave
        ) && announce.header.source_port_identity
            == self
                .instance_state
                .with_ref(|s| s.parent_ds.parent_port_identity)
        {
            self.steps_removed = announce.steps_removed + 1;
            self.instance_state.with_mut(|state| {
                state.current_ds.steps_removed = announce.steps_removed + 1;

                state.parent_ds.grandmaster_identity = announce.grandmaster_identity;
                state.parent_ds.grandmaster_clock_quality = announce.grandmaster_clock_quality;
                state.parent_ds.grandmaster_priority_1 = announce.grandmaster_priority_1;
                state.parent_ds.grandmaster_priority_2 = announce.grandmaster_priority_2;

                state.time_properties_ds = announce.time_properties();

                if state.path_trace_ds.enable {
                    if let Some(tlv) = message
                        .suffix
                        .tlv()
                        .find(|tlv| tlv.tlv_type == TlvType::PathTrace)
                    {
                        // `list` is large enough for a whole message worth
                        // of identities, but don't trust the peer on that
                        state.path_trace_ds.list = tlv
                            .value
                            .chunks_exact(8)
                            .take(crate::datastructures::datasets::MAX_PATH_TRACE_LENGTH)
                            .map(|ci| ClockIdentity(<[u8; 8]>::try_from(ci).unwrap()))
                            .collect();
                    }
                }
            });

            if let Err(error) = self
                .clock
                .set_properties(&self.instance_state.with_ref(|s| s.time_properties_ds))
            {
                log::error!("Could not update clock properties: {:?}", error);
            }
        }

        if self
            .bmca
            .register_announce_message(&message.header, &announce)
        {
            actions![PortAction::ResetAnnounceReceiptTimer {
                duration: self.config.announce_duration(&mut self.rng),
            }]
        } else {
            actions![]
        }
    }
}

// BMCA related functionality of the port
impl<'a, A: AcceptableMasterList, C: Clock, F: Filter, R: Rng, S: PtpInstanceStateMutex>
    Port<'a, InBmca, A, R, C, F, S>
{
    pub(crate) fn calculate_best_local_announce_message(&mut self) {
        self.lifecycle.local_best = self.bmca.take_best_port_announce_message()
    }

    pub(crate) fn step_announce_age(&mut self, step: Duration) {
        self.bmca.step_age(step);
    }

    pub(crate) fn best_local_announce_message(&self) -> Option<BestAnnounceMessage> {
        // Announce messages received on a masterOnly PTP port or a faulty
        // port shall not be considered in the global operation of the best
        // master clock algorithm
        if self.config.master_only || matches!(self.port_state, PortState::Faulty) {
            None
        } else {
            self.lifecycle.local_best
        }
    }

    pub(crate) fn set_recommended_state(
        &mut self,
        recommended_state: RecommendedState,
        time_properties_ds: &mut TimePropertiesDS,
        current_ds: &mut InternalCurrentDS,
        parent_ds: &mut InternalParentDS,
        path_trace_ds: &mut PathTraceDS,
        default_ds: &InternalDefaultDS,
    ) {
        let (event, master_changed) = match &recommended_state {
            RecommendedState::M1(defaultds) | RecommendedState::M2(defaultds) => {
                // a slave-only PTP port should never be recommended to be
                // master
                if default_ds.slave_only {
                    log::warn!(
                        "port {}: master state recommended for slave only clock, \
                         check the priority1 settings of this network",
                        self.port_identity.port_number
                    );
                }

                current_ds.steps_removed = 0;
                current_ds.offset_from_master = Duration::ZERO;

                parent_ds.parent_port_identity.clock_identity = defaultds.clock_identity;
                parent_ds.parent_port_identity.port_number = 0;
                parent_ds.grandmaster_identity = defaultds.clock_identity;
                parent_ds.grandmaster_clock_quality = defaultds.clock_quality;
                parent_ds.grandmaster_priority_1 = defaultds.priority_1;
                parent_ds.grandmaster_priority_2 = defaultds.priority_2;

                time_properties_ds.leap_indicator = LeapIndicator::NoLeap;
                time_properties_ds.current_utc_offset = None;
                time_properties_ds.ptp_timescale = true;
                time_properties_ds.time_traceable = false;
                time_properties_ds.frequency_traceable = false;
                time_properties_ds.time_source = TimeSource::InternalOscillator;

                path_trace_ds.list.clear();

                self.steps_removed = 0;

                (FsmEvent::RsGrandMaster, false)
            }
            RecommendedState::M3(_) => {
                if default_ds.slave_only {
                    log::warn!(
                        "port {}: master state recommended for slave only clock, \
                         check the priority1 settings of this network",
                        self.port_identity.port_number
                    );
                }

                (FsmEvent::RsMaster, false)
            }
            RecommendedState::P1(_) | RecommendedState::P2(_) => (FsmEvent::RsPassive, false),
            RecommendedState::S1(announce_message) => {
                // a master-only PTP port should never end up in the slave
                // state
                debug_assert!(!self.config.master_only);

                let remote_master = announce_message.header.source_port_identity;
                let master_changed = match &self.slave {
                    Some(slave) => slave.remote_master() != remote_master,
                    None => true,
                };

                current_ds.steps_removed = announce_message.steps_removed + 1;
                self.steps_removed = announce_message.steps_removed + 1;

                parent_ds.parent_port_identity = remote_master;
                parent_ds.grandmaster_identity = announce_message.grandmaster_identity;
                parent_ds.grandmaster_clock_quality = announce_message.grandmaster_clock_quality;
                parent_ds.grandmaster_priority_1 = announce_message.grandmaster_priority_1;
                parent_ds.grandmaster_priority_2 = announce_message.grandmaster_priority_2;

                *time_properties_ds = announce_message.time_properties();

                if let Err(error) = self.clock.set_properties(time_properties_ds) {
                    log::error!("Could not update clock: {:?}", error);
                }

                if master_changed {
                    if let Some(old) = self.slave.take() {
                        old.filter.demobilize(&mut self.clock);
                    }
                    self.slave = Some(SlaveState::new(
                        remote_master,
                        self.filter_config.clone(),
                    ));
                }

                (FsmEvent::RsSlave, master_changed)
            }
        };

        let actions = self.dispatch_event(event, master_changed);
        if !actions.is_empty() {
            self.lifecycle.pending_action = actions;
        }
    }
}
