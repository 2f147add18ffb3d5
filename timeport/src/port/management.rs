//! The responder for management messages targeting this port.

use arrayvec::ArrayVec;
use rand::Rng;

use super::{Port, PortActionIterator, Running};
use crate::{
    config::DelayMechanism,
    datastructures::{
        common::{PortIdentity, TimeInterval},
        messages::{
            Header, ManagementAction, ManagementErrorId, ManagementId, ManagementMessage,
            ManagementTlv, Message, MAX_MANAGEMENT_PAYLOAD,
        },
        WireFormat,
    },
    filters::Filter,
    port::PortAction,
    ptp_instance::PtpInstanceStateMutex,
    time::{Duration, Interval},
    Clock,
};

type Payload = ArrayVec<u8, MAX_MANAGEMENT_PAYLOAD>;

fn push_ptp_text(payload: &mut Payload, text: &[u8]) {
    payload.push(text.len() as u8);
    let _ = payload.try_extend_from_slice(text);
}

impl<'a, A, C: Clock, F: Filter, R: Rng, S: PtpInstanceStateMutex> Port<'a, Running, A, R, C, F, S> {
    pub(super) fn handle_management<'b>(
        &'b mut self,
        header: Header,
        message: ManagementMessage,
    ) -> PortActionIterator<'b> {
        // Only requests addressed at us (or everyone) get an answer
        if message.target_port_identity != PortIdentity::wildcard()
            && message.target_port_identity != self.port_identity
        {
            return actions![];
        }

        let ManagementTlv::Management {
            management_id,
            ref data,
        } = message.management_tlv
        else {
            // Error statuses target a requestor, which we are not
            return actions![];
        };

        let reply = match (ManagementId::from_primitive(management_id), message.action) {
            (None, ManagementAction::Get | ManagementAction::Set) => {
                log::debug!("Unknown management id {:#06x}", management_id);
                ManagementTlv::ErrorStatus {
                    management_error_id: ManagementErrorId::NoSuchId,
                    management_id,
                }
            }
            (Some(id), ManagementAction::Get) => self.management_get(id),
            (Some(id), ManagementAction::Set) => self.management_set(id, data),
            // We never send requests, so responses and acknowledgements are
            // not for us, and commands are not part of this profile
            (_, ManagementAction::Command) => ManagementTlv::ErrorStatus {
                management_error_id: ManagementErrorId::NotSupported,
                management_id,
            },
            _ => return actions![],
        };

        let response = Message::management_reply(self.port_identity, &header, &message, reply);

        let packet_length = match response.serialize(&mut self.packet_buffer) {
            Ok(length) => length,
            Err(error) => {
                log::error!("Could not serialize management response: {:?}", error);
                return actions![];
            }
        };

        actions![PortAction::SendGeneral {
            data: &self.packet_buffer[..packet_length],
            link_local: false,
        }]
    }

    fn management_get(&mut self, id: ManagementId) -> ManagementTlv {
        let mut data = Payload::new();

        match id {
            ManagementId::NullManagement => {}
            ManagementId::ClockDescription => {
                let description = &self.config.port_description;

                // clockType: an ordinary clock
                data.extend([0x80, 0x00]);
                push_ptp_text(&mut data, b"IEEE 802.3");
                // physicalAddress
                data.push(description.physical_address.len() as u8);
                let _ = data.try_extend_from_slice(&description.physical_address);
                // protocolAddress, transported over UDP/IPv4 unless told
                // otherwise
                data.extend(1u16.to_be_bytes());
                data.extend((description.physical_address.len() as u16).to_be_bytes());
                let _ = data.try_extend_from_slice(&description.physical_address);
                // manufacturerIdentity + reserved
                data.extend([0, 0, 0, 0]);
                push_ptp_text(&mut data, b";;");
                push_ptp_text(&mut data, b";;");
                push_ptp_text(&mut data, b"");
                // profileIdentity: the default PTP profile
                data.extend([0x00, 0x1b, 0x19, 0x00, 0x01, 0x00]);
            }
            ManagementId::PortDataSet => {
                let _ = self.port_identity.serialize(extend_zeros(&mut data, 10));
                data.push(self.state().to_primitive());
                data.push(self.min_delay_req_interval.as_log_2() as u8);
                let mean_path_delay: TimeInterval =
                    self.mean_delay().unwrap_or(Duration::ZERO).into();
                let _ = mean_path_delay.serialize(extend_zeros(&mut data, 8));
                data.push(self.config.announce_interval.as_log_2() as u8);
                data.push(self.config.announce_receipt_timeout);
                data.push(self.config.sync_interval.as_log_2() as u8);
                data.push(self.delay_mechanism_primitive());
                data.push(self.pdelay_req_interval().as_log_2() as u8);
                // versionNumber
                data.push(2);
            }
            ManagementId::LogAnnounceInterval => {
                data.push(self.config.announce_interval.as_log_2() as u8);
                data.push(0);
            }
            ManagementId::AnnounceReceiptTimeout => {
                data.push(self.config.announce_receipt_timeout);
                data.push(0);
            }
            ManagementId::LogSyncInterval => {
                data.push(self.config.sync_interval.as_log_2() as u8);
                data.push(0);
            }
            ManagementId::VersionNumber => {
                data.push(2);
                data.push(0);
            }
            ManagementId::DelayMechanism => {
                data.push(self.delay_mechanism_primitive());
                data.push(0);
            }
            ManagementId::LogMinPdelayReqInterval => {
                data.push(self.pdelay_req_interval().as_log_2() as u8);
                data.push(0);
            }
            ManagementId::PortDataSetNp => {
                let thresh = self.config.neighbor_prop_delay_thresh.nanos_rounded() as i32;
                data.extend(thresh.to_be_bytes());
                data.extend((self.as_capable() as i32).to_be_bytes());
            }
            ManagementId::PortPropertiesNp => {
                let _ = self.port_identity.serialize(extend_zeros(&mut data, 10));
                data.push(self.state().to_primitive());
                data.push(self.config.port_description.hardware_timestamping as u8);
                push_ptp_text(&mut data, &self.config.port_description.interface_name);
            }
        }

        // Management TLVs are padded to an even length
        if data.len() % 2 != 0 {
            data.push(0);
        }

        ManagementTlv::Management {
            management_id: id.to_primitive(),
            data,
        }
    }

    fn management_set(&mut self, id: ManagementId, data: &Payload) -> ManagementTlv {
        let error = |management_error_id| ManagementTlv::ErrorStatus {
            management_error_id,
            management_id: id.to_primitive(),
        };

        match id {
            ManagementId::NullManagement => {}
            ManagementId::PortDataSetNp => {
                if data.len() < 8 {
                    return error(ManagementErrorId::WrongLength);
                }
                let thresh = i32::from_be_bytes(data[0..4].try_into().unwrap());
                self.config.neighbor_prop_delay_thresh = Duration::from_nanos(thresh as i64);
                // The asCapable word is reported but not forced; the next
                // exchange recomputes it against the new threshold
            }
            // Everything else can be read but not written
            ManagementId::ClockDescription
            | ManagementId::PortDataSet
            | ManagementId::LogAnnounceInterval
            | ManagementId::AnnounceReceiptTimeout
            | ManagementId::LogSyncInterval
            | ManagementId::VersionNumber
            | ManagementId::DelayMechanism
            | ManagementId::LogMinPdelayReqInterval
            | ManagementId::PortPropertiesNp => {
                return error(ManagementErrorId::NotSupported);
            }
        }

        // The response to a set echoes the new values
        self.management_get(id)
    }

    fn delay_mechanism_primitive(&self) -> u8 {
        match self.delay_mechanism {
            DelayMechanism::E2E { .. } => 0x01,
            DelayMechanism::P2P { .. } => 0x02,
            DelayMechanism::Auto { .. } => 0xfe,
            DelayMechanism::None => 0xff,
        }
    }

    fn pdelay_req_interval(&self) -> Interval {
        match self.delay_mechanism {
            DelayMechanism::P2P { interval } | DelayMechanism::Auto { interval } => interval,
            _ => Interval::ONE_SECOND,
        }
    }
}

/// Reserve `count` zeroed bytes at the end of the payload and return them
/// for a wire format serializer to fill in.
fn extend_zeros(payload: &mut Payload, count: usize) -> &mut [u8] {
    let start = payload.len();
    for _ in 0..count {
        payload.push(0);
    }
    &mut payload[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        datastructures::messages::{MessageBody, MAX_DATA_LEN},
        port::tests::{setup_test_port, setup_test_state},
        port::PortState,
    };

    fn management_request(
        target: PortIdentity,
        action: ManagementAction,
        management_id: u16,
        data: &[u8],
    ) -> ([u8; MAX_DATA_LEN], usize) {
        let mut payload = ArrayVec::new();
        payload.try_extend_from_slice(data).unwrap();

        let requester = PortIdentity {
            clock_identity: crate::config::ClockIdentity([9, 9, 9, 9, 9, 9, 9, 9]),
            port_number: 32,
        };

        let message = Message {
            header: Header {
                sequence_id: 612,
                source_port_identity: requester,
                ..Default::default()
            },
            body: MessageBody::Management(ManagementMessage {
                target_port_identity: target,
                starting_boundary_hops: 1,
                boundary_hops: 1,
                action,
                management_tlv: ManagementTlv::Management {
                    management_id,
                    data: payload,
                },
            }),
            suffix: Default::default(),
        };

        let mut buffer = [0u8; MAX_DATA_LEN];
        let len = message.serialize(&mut buffer).unwrap();
        (buffer, len)
    }

    fn response_tlv(data: &[u8]) -> (Header, ManagementMessage) {
        let parsed = Message::deserialize(data).unwrap();
        let header = parsed.header;
        match parsed.body {
            MessageBody::Management(m) => (header, m),
            _ => panic!("response is not a management message"),
        }
    }

    #[test]
    fn get_port_data_set() {
        let state = setup_test_state();
        let mut port = setup_test_port(&state);
        port.force_state(PortState::Master);

        let (buffer, len) = management_request(
            PortIdentity::wildcard(),
            ManagementAction::Get,
            ManagementId::PortDataSet.to_primitive(),
            &[],
        );

        let mut actions = port.handle_general_receive(&buffer[..len]);
        let Some(PortAction::SendGeneral { data, .. }) = actions.next() else {
            panic!("Expected a management response");
        };

        let (header, response) = response_tlv(data);
        assert_eq!(header.sequence_id, 612);

        let ManagementTlv::Management {
            management_id,
            data,
        } = response.management_tlv
        else {
            panic!("Expected a management tlv");
        };
        assert_eq!(response.action, ManagementAction::Response);
        assert_eq!(
            response.target_port_identity,
            PortIdentity {
                clock_identity: crate::config::ClockIdentity([9, 9, 9, 9, 9, 9, 9, 9]),
                port_number: 32,
            }
        );
        assert_eq!(management_id, ManagementId::PortDataSet.to_primitive());

        // portIdentity, state, logMinDelayReqInterval, peerMeanPathDelay,
        // logAnnounceInterval, announceReceiptTimeout, logSyncInterval,
        // delayMechanism, logMinPdelayReqInterval, versionNumber
        assert_eq!(data.len(), 26);
        assert_eq!(data.len() % 2, 0);
        assert_eq!(data[10], PortState::Master.to_primitive());
        assert_eq!(data[11] as i8, 1); // logMinDelayReqInterval
        assert_eq!(data[20] as i8, 1); // logAnnounceInterval
        assert_eq!(data[21], 3); // announceReceiptTimeout
        assert_eq!(data[22] as i8, 0); // logSyncInterval
        assert_eq!(data[23], 0x01); // delayMechanism E2E
        assert_eq!(data[25], 2); // versionNumber
    }

    #[test]
    fn unknown_id_yields_error_status() {
        let state = setup_test_state();
        let mut port = setup_test_port(&state);

        let (buffer, len) = management_request(
            PortIdentity::wildcard(),
            ManagementAction::Get,
            0x7777,
            &[],
        );

        let mut actions = port.handle_general_receive(&buffer[..len]);
        let Some(PortAction::SendGeneral { data, .. }) = actions.next() else {
            panic!("Expected a management response");
        };

        let parsed = Message::deserialize(data).unwrap();
        let MessageBody::Management(_) = parsed.body else {
            panic!("response is not a management message");
        };
        // The error status TLV is rendered as-is in the body; check the
        // raw TLV type and error id on the wire
        let body_start = 34 + 14;
        assert_eq!(
            u16::from_be_bytes(data[body_start..body_start + 2].try_into().unwrap()),
            0x0002, // MANAGEMENT_ERROR_STATUS
        );
        assert_eq!(
            u16::from_be_bytes(data[body_start + 4..body_start + 6].try_into().unwrap()),
            0x0002, // NO_SUCH_ID
        );
        assert_eq!(
            u16::from_be_bytes(data[body_start + 6..body_start + 8].try_into().unwrap()),
            0x7777,
        );
    }

    #[test]
    fn request_for_other_port_is_ignored() {
        let state = setup_test_state();
        let mut port = setup_test_port(&state);

        let (buffer, len) = management_request(
            PortIdentity {
                port_number: 600,
                ..Default::default()
            },
            ManagementAction::Get,
            ManagementId::PortDataSet.to_primitive(),
            &[],
        );

        let mut actions = port.handle_general_receive(&buffer[..len]);
        assert!(actions.next().is_none());
    }

    #[test]
    fn set_port_data_set_np_changes_threshold() {
        let state = setup_test_state();
        let mut port = setup_test_port(&state);

        let mut payload = [0u8; 8];
        payload[0..4].copy_from_slice(&5000i32.to_be_bytes());

        let (buffer, len) = management_request(
            PortIdentity::wildcard(),
            ManagementAction::Set,
            ManagementId::PortDataSetNp.to_primitive(),
            &payload,
        );

        let mut actions = port.handle_general_receive(&buffer[..len]);
        let Some(PortAction::SendGeneral { data, .. }) = actions.next() else {
            panic!("Expected a management response");
        };

        let (_, response) = response_tlv(data);
        let ManagementTlv::Management { data, .. } = response.management_tlv else {
            panic!("Expected a management tlv");
        };
        // The response echoes the new threshold
        assert_eq!(&data[0..4], &5000i32.to_be_bytes());
        drop(actions);

        assert_eq!(
            port.config.neighbor_prop_delay_thresh,
            Duration::from_nanos(5000)
        );
    }

    #[test]
    fn set_is_not_supported_for_read_only_ids() {
        let state = setup_test_state();
        let mut port = setup_test_port(&state);

        let (buffer, len) = management_request(
            PortIdentity::wildcard(),
            ManagementAction::Set,
            ManagementId::LogAnnounceInterval.to_primitive(),
            &[3, 0],
        );

        let mut actions = port.handle_general_receive(&buffer[..len]);
        let Some(PortAction::SendGeneral { data, .. }) = actions.next() else {
            panic!("Expected a management response");
        };

        // A management error status with NOT_SUPPORTED comes back and the
        // port keeps its configuration
        let body_start = 34 + 14;
        assert_eq!(
            u16::from_be_bytes(data[body_start..body_start + 2].try_into().unwrap()),
            0x0002, // MANAGEMENT_ERROR_STATUS
        );
        assert_eq!(
            u16::from_be_bytes(data[body_start + 4..body_start + 6].try_into().unwrap()),
            0x0006, // NOT_SUPPORTED
        );
        assert_eq!(
            u16::from_be_bytes(data[body_start + 6..body_start + 8].try_into().unwrap()),
            ManagementId::LogAnnounceInterval.to_primitive(),
        );
        drop(actions);

        assert_eq!(port.config.announce_interval.as_log_2(), 1);
    }

    #[test]
    fn get_clock_description_is_even_length() {
        let state = setup_test_state();
        let mut port = setup_test_port(&state);

        let (buffer, len) = management_request(
            PortIdentity::wildcard(),
            ManagementAction::Get,
            ManagementId::ClockDescription.to_primitive(),
            &[],
        );

        let mut actions = port.handle_general_receive(&buffer[..len]);
        let Some(PortAction::SendGeneral { data, .. }) = actions.next() else {
            panic!("Expected a management response");
        };

        let (_, response) = response_tlv(data);
        let ManagementTlv::Management { data, .. } = response.management_tlv else {
            panic!("Expected a management tlv");
        };
        assert_eq!(data.len() % 2, 0);
    }

    #[test]
    fn management_set_changes_delay_req_pacing_response() {
        let state = setup_test_state();
        let mut port = setup_test_port(&state);

        // A delay response from the master adapts our pacing too; verify
        // the reported value follows
        port.force_slave(PortIdentity {
            clock_identity: crate::config::ClockIdentity([1, 2, 3, 4, 5, 6, 7, 8]),
            port_number: 1,
        });

        let (buffer, len) = management_request(
            PortIdentity::wildcard(),
            ManagementAction::Get,
            ManagementId::DelayMechanism.to_primitive(),
            &[],
        );

        let mut actions = port.handle_general_receive(&buffer[..len]);
        let Some(PortAction::SendGeneral { data, .. }) = actions.next() else {
            panic!("Expected a management response");
        };
        let (_, response) = response_tlv(data);
        let ManagementTlv::Management { data, .. } = response.management_tlv else {
            panic!("Expected a management tlv");
        };
        assert_eq!(data[0], 0x01);
    }
}
