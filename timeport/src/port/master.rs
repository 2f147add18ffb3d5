use arrayvec::ArrayVec;
use rand::Rng;

use super::{Port, PortActionIterator, PortState, Running};
use crate::{
    datastructures::{
        common::{Tlv, TlvSetBuilder, TlvType},
        messages::{DelayReqMessage, FollowUpInfo, Header, Message, MAX_DATA_LEN},
    },
    filters::Filter,
    port::{actions::TimestampContextInner, PortAction, TimestampContext},
    ptp_instance::PtpInstanceStateMutex,
    time::Time,
    Clock,
};

impl<'a, A, C: Clock, F: Filter, R: Rng, S: PtpInstanceStateMutex> Port<'a, Running, A, R, C, F, S> {
    /// Whether this port currently may transmit announce and sync messages
    fn port_capable(&self) -> bool {
        if !self.as_capable() {
            log::trace!(
                "port {}: suppressing transmission, not asCapable",
                self.port_identity.port_number
            );
            return false;
        }

        true
    }

    /// A gPTP node that is its own parent but was not configured as
    /// grandmaster-capable must not source time.
    fn sync_incapable(&self) -> bool {
        if !self.config.gptp_profile {
            return false;
        }

        self.instance_state.with_ref(|state| {
            !state.default_ds.gm_capable
                && state.parent_ds.parent_port_identity.clock_identity
                    == state.default_ds.clock_identity
        })
    }

    pub(super) fn send_sync(&mut self) -> PortActionIterator {
        if !matches!(self.port_state, PortState::Master | PortState::GrandMaster) {
            return actions![];
        }

        if !self.port_capable() || self.sync_incapable() {
            return actions![];
        }

        log::trace!("sending sync message");

        let seq_id = self.sync_seq_ids.generate();
        let packet_length = match self
            .instance_state
            .with_ref(|state| {
                Message::sync(
                    &state.default_ds,
                    self.port_identity,
                    seq_id,
                    self.config.sync_interval.as_log_2(),
                )
            })
            .serialize(&mut self.packet_buffer)
        {
            Ok(message) => message,
            Err(error) => {
                log::error!("Could not serialize sync: {:?}", error);
                return actions![];
            }
        };

        actions![
            PortAction::ResetSyncTimer {
                duration: self.config.sync_interval.as_core_duration(),
            },
            PortAction::SendEvent {
                context: TimestampContext {
                    inner: TimestampContextInner::Sync { id: seq_id },
                },
                data: &self.packet_buffer[..packet_length],
                link_local: false,
            }
        ]
    }

    /// The transmit timestamp of a two-step sync came back; complete the
    /// pair with a follow up carrying the precise origin timestamp.
    pub(super) fn handle_sync_timestamp(&mut self, id: u16, timestamp: Time) -> PortActionIterator {
        if !matches!(self.port_state, PortState::Master | PortState::GrandMaster) {
            return actions![];
        }

        let mut follow_up = self.instance_state.with_ref(|state| {
            Message::follow_up(
                &state.default_ds,
                self.port_identity,
                id,
                timestamp,
                self.config.sync_interval.as_log_2(),
            )
        });

        // In the gPTP profile every follow up carries the follow up
        // information TLV
        let mut tlv_buffer = [0; FollowUpInfo::VALUE_LEN];
        let mut suffix_buffer = [0; 64];
        if self.config.gptp_profile {
            let info = self
                .instance_state
                .with_ref(|state| state.follow_up_info)
                .unwrap_or_default();
            let tlv = info.serialize_value(&mut tlv_buffer);
            let mut builder = TlvSetBuilder::new(&mut suffix_buffer);
            if builder.add(tlv).is_ok() {
                follow_up.suffix = builder.build();
            }
        }

        let packet_length = match follow_up.serialize(&mut self.packet_buffer) {
            Ok(length) => length,
            Err(error) => {
                log::error!("Could not serialize sync follow up: {:?}", error);
                return actions![];
            }
        };

        actions![PortAction::SendGeneral {
            data: &self.packet_buffer[..packet_length],
            link_local: false,
        }]
    }

    pub(super) fn send_announce(&mut self) -> PortActionIterator {
        if !matches!(self.port_state, PortState::Master | PortState::GrandMaster) {
            return actions![];
        }

        if !self.port_capable() {
            return actions![];
        }

        log::trace!("sending announce message");

        let mut tlv_buffer = [0; MAX_DATA_LEN];
        let mut tlv_builder = TlvSetBuilder::new(&mut tlv_buffer);

        let mut message = self.instance_state.with_ref(|state| {
            Message::announce(
                state,
                self.port_identity,
                self.announce_seq_ids.generate(),
                self.config.announce_interval.as_log_2(),
            )
        });

        self.instance_state.with_ref(|state| {
            if !state.path_trace_ds.enable {
                return;
            }

            // The announce carries the path it took so far, with ourselves
            // appended
            let mut path = state.path_trace_ds.list.clone();
            if path.try_push(state.default_ds.clock_identity).is_err() {
                // A full list means the path is too long to track; the
                // announce goes out without the TLV
                return;
            }

            let value: ArrayVec<u8, MAX_DATA_LEN> = path.into_iter().flat_map(|ci| ci.0).collect();
            let tlv = Tlv {
                tlv_type: TlvType::PathTrace,
                value: value.as_slice(),
            };

            if message.wire_size() + tlv.wire_size() <= MAX_DATA_LEN {
                // Will not fail as the space was just checked
                tlv_builder.add(tlv).unwrap();
            }
        });

        message.suffix = tlv_builder.build();

        let packet_length = match message.serialize(&mut self.packet_buffer) {
            Ok(length) => length,
            Err(error) => {
                log::error!("Could not serialize announce message: {:?}", error);
                return actions![];
            }
        };

        actions![
            PortAction::ResetAnnounceTimer {
                duration: self.config.announce_interval.as_core_duration(),
            },
            PortAction::SendGeneral {
                data: &self.packet_buffer[..packet_length],
                link_local: false,
            }
        ]
    }

    pub(super) fn handle_delay_req(
        &mut self,
        header: Header,
        message: DelayReqMessage,
        timestamp: Time,
    ) -> PortActionIterator {
        if !matches!(self.port_state, PortState::Master | PortState::GrandMaster) {
            return actions![];
        }

        if matches!(self.delay_mechanism, crate::config::DelayMechanism::P2P { .. }) {
            log::warn!(
                "port {}: delay request on a peer to peer port",
                self.port_identity.port_number
            );
            return actions![];
        }

        log::debug!("Received DelayReq");
        let delay_resp_message = Message::delay_resp(
            header,
            message,
            self.port_identity,
            self.config.min_delay_req_interval(),
            timestamp,
        );

        let packet_length = match delay_resp_message.serialize(&mut self.packet_buffer) {
            Ok(length) => length,
            Err(error) => {
                log::error!("Could not serialize delay response: {:?}", error);
                return actions![];
            }
        };

        actions![PortAction::SendGeneral {
            data: &self.packet_buffer[..packet_length],
            link_local: false,
        }]
    }
}
