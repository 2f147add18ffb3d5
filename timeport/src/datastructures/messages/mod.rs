//! Ptp network messages

pub(crate) use announce::*;
pub(crate) use delay_req::*;
pub(crate) use delay_resp::*;
pub(crate) use follow_up::FollowUpMessage;
pub use follow_up::FollowUpInfo;
pub(crate) use header::*;
pub use header::{PtpVersion, SdoId};
pub(crate) use management::*;
pub(crate) use p_delay_req::*;
pub(crate) use p_delay_resp::*;
pub(crate) use p_delay_resp_follow_up::*;
pub(crate) use signaling::*;
pub(crate) use sync::*;

use super::{
    common::{PortIdentity, TimeInterval, TlvSet, WireTimestamp},
    datasets::InternalDefaultDS,
    WireFormatError,
};
use crate::{
    config::LeapIndicator,
    ptp_instance::PtpInstanceState,
    time::{Interval, Time},
};

mod announce;
mod control_field;
mod delay_req;
mod delay_resp;
mod follow_up;
mod header;
mod management;
mod p_delay_req;
mod p_delay_resp;
mod p_delay_resp_follow_up;
mod signaling;
mod sync;

/// Maximum length of a packet
///
/// This can be used to preallocate buffers that can always fit packets send
/// by `timeport`.
pub const MAX_DATA_LEN: usize = 1024;

/// Type of message, used to select the right body handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum MessageType {
    #[allow(missing_docs)]
    Sync = 0x0,
    #[allow(missing_docs)]
    DelayReq = 0x1,
    #[allow(missing_docs)]
    PDelayReq = 0x2,
    #[allow(missing_docs)]
    PDelayResp = 0x3,
    #[allow(missing_docs)]
    FollowUp = 0x8,
    #[allow(missing_docs)]
    DelayResp = 0x9,
    #[allow(missing_docs)]
    PDelayRespFollowUp = 0xa,
    #[allow(missing_docs)]
    Announce = 0xb,
    #[allow(missing_docs)]
    Signaling = 0xc,
    #[allow(missing_docs)]
    Management = 0xd,
}

pub(crate) struct EnumConversionError;

impl From<EnumConversionError> for WireFormatError {
    fn from(_: EnumConversionError) -> Self {
        WireFormatError::EnumConversionError
    }
}

impl TryFrom<u8> for MessageType {
    type Error = EnumConversionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use MessageType::*;

        match value {
            0x0 => Ok(Sync),
            0x1 => Ok(DelayReq),
            0x2 => Ok(PDelayReq),
            0x3 => Ok(PDelayResp),
            0x8 => Ok(FollowUp),
            0x9 => Ok(DelayResp),
            0xa => Ok(PDelayRespFollowUp),
            0xb => Ok(Announce),
            0xc => Ok(Signaling),
            0xd => Ok(Management),
            _ => Err(EnumConversionError),
        }
    }
}

#[cfg(feature = "fuzz")]
pub use fuzz::FuzzMessage;

#[cfg(feature = "fuzz")]
mod fuzz {
    #![allow(missing_docs)] // These are only used for internal fuzzing
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct FuzzMessage<'a> {
        inner: Message<'a>,
    }

    impl<'a> FuzzMessage<'a> {
        pub fn deserialize(buffer: &'a [u8]) -> Result<Self, impl core::fmt::Debug> {
            Ok::<FuzzMessage, WireFormatError>(FuzzMessage {
                inner: Message::deserialize(buffer)?,
            })
        }

        pub fn serialize(&self, buffer: &mut [u8]) -> Result<usize, impl core::fmt::Debug> {
            self.inner.serialize(buffer)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Message<'a> {
    pub(crate) header: Header,
    pub(crate) body: MessageBody,
    pub(crate) suffix: TlvSet<'a>,
}

impl<'a> Message<'a> {
    pub(crate) fn is_event(&self) -> bool {
        use MessageBody::*;
        match self.body {
            Sync(_) | DelayReq(_) | PDelayReq(_) | PDelayResp(_) => true,
            FollowUp(_)
            | DelayResp(_)
            | PDelayRespFollowUp(_)
            | Announce(_)
            | Signaling(_)
            | Management(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MessageBody {
    Sync(SyncMessage),
    DelayReq(DelayReqMessage),
    PDelayReq(PDelayReqMessage),
    PDelayResp(PDelayRespMessage),
    FollowUp(FollowUpMessage),
    DelayResp(DelayRespMessage),
    PDelayRespFollowUp(PDelayRespFollowUpMessage),
    Announce(AnnounceMessage),
    Signaling(SignalingMessage),
    Management(ManagementMessage),
}

impl MessageBody {
    fn wire_size(&self) -> usize {
        match &self {
            MessageBody::Sync(m) => m.content_size(),
            MessageBody::DelayReq(m) => m.content_size(),
            MessageBody::PDelayReq(m) => m.content_size(),
            MessageBody::PDelayResp(m) => m.content_size(),
            MessageBody::FollowUp(m) => m.content_size(),
            MessageBody::DelayResp(m) => m.content_size(),
            MessageBody::PDelayRespFollowUp(m) => m.content_size(),
            MessageBody::Announce(m) => m.content_size(),
            MessageBody::Signaling(m) => m.content_size(),
            MessageBody::Management(m) => m.content_size(),
        }
    }

    fn content_type(&self) -> MessageType {
        match self {
            MessageBody::Sync(_) => MessageType::Sync,
            MessageBody::DelayReq(_) => MessageType::DelayReq,
            MessageBody::PDelayReq(_) => MessageType::PDelayReq,
            MessageBody::PDelayResp(_) => MessageType::PDelayResp,
            MessageBody::FollowUp(_) => MessageType::FollowUp,
            MessageBody::DelayResp(_) => MessageType::DelayResp,
            MessageBody::PDelayRespFollowUp(_) => MessageType::PDelayRespFollowUp,
            MessageBody::Announce(_) => MessageType::Announce,
            MessageBody::Signaling(_) => MessageType::Signaling,
            MessageBody::Management(_) => MessageType::Management,
        }
    }

    pub(crate) fn serialize(&self, buffer: &mut [u8]) -> Result<usize, WireFormatError> {
        match &self {
            MessageBody::Sync(m) => m.serialize_content(buffer)?,
            MessageBody::DelayReq(m) => m.serialize_content(buffer)?,
            MessageBody::PDelayReq(m) => m.serialize_content(buffer)?,
            MessageBody::PDelayResp(m) => m.serialize_content(buffer)?,
            MessageBody::FollowUp(m) => m.serialize_content(buffer)?,
            MessageBody::DelayResp(m) => m.serialize_content(buffer)?,
            MessageBody::PDelayRespFollowUp(m) => m.serialize_content(buffer)?,
            MessageBody::Announce(m) => m.serialize_content(buffer)?,
            MessageBody::Signaling(m) => m.serialize_content(buffer)?,
            MessageBody::Management(m) => m.serialize_content(buffer)?,
        }

        Ok(self.wire_size())
    }

    pub(crate) fn deserialize(
        message_type: MessageType,
        header: &Header,
        buffer: &[u8],
    ) -> Result<Self, WireFormatError> {
        let body = match message_type {
            MessageType::Sync => MessageBody::Sync(SyncMessage::deserialize_content(buffer)?),
            MessageType::DelayReq => {
                MessageBody::DelayReq(DelayReqMessage::deserialize_content(buffer)?)
            }
            MessageType::PDelayReq => {
                MessageBody::PDelayReq(PDelayReqMessage::deserialize_content(buffer)?)
            }
            MessageType::PDelayResp => {
                MessageBody::PDelayResp(PDelayRespMessage::deserialize_content(buffer)?)
            }
            MessageType::FollowUp => {
                MessageBody::FollowUp(FollowUpMessage::deserialize_content(buffer)?)
            }
            MessageType::DelayResp => {
                MessageBody::DelayResp(DelayRespMessage::deserialize_content(buffer)?)
            }
            MessageType::PDelayRespFollowUp => MessageBody::PDelayRespFollowUp(
                PDelayRespFollowUpMessage::deserialize_content(buffer)?,
            ),
            MessageType::Announce => {
                MessageBody::Announce(AnnounceMessage::deserialize_content(*header, buffer)?)
            }
            MessageType::Signaling => {
                MessageBody::Signaling(SignalingMessage::deserialize_content(buffer)?)
            }
            MessageType::Management => {
                MessageBody::Management(ManagementMessage::deserialize_content(buffer)?)
            }
        };

        Ok(body)
    }
}

fn base_header(
    default_ds: &InternalDefaultDS,
    port_identity: PortIdentity,
    sequence_id: u16,
) -> Header {
    Header {
        sdo_id: default_ds.sdo_id,
        domain_number: default_ds.domain_number,
        source_port_identity: port_identity,
        sequence_id,
        ..Default::default()
    }
}

impl Message<'_> {
    pub(crate) fn sync(
        default_ds: &InternalDefaultDS,
        port_identity: PortIdentity,
        sequence_id: u16,
        log_sync_interval: i8,
    ) -> Self {
        let header = Header {
            two_step_flag: true,
            log_message_interval: log_sync_interval,
            ..base_header(default_ds, port_identity, sequence_id)
        };

        Message {
            header,
            body: MessageBody::Sync(SyncMessage {
                origin_timestamp: Default::default(),
            }),
            suffix: TlvSet::default(),
        }
    }

    pub(crate) fn follow_up(
        default_ds: &InternalDefaultDS,
        port_identity: PortIdentity,
        sequence_id: u16,
        timestamp: Time,
        log_sync_interval: i8,
    ) -> Self {
        let header = Header {
            correction_field: timestamp.subnano(),
            log_message_interval: log_sync_interval,
            ..base_header(default_ds, port_identity, sequence_id)
        };

        Message {
            header,
            body: MessageBody::FollowUp(FollowUpMessage {
                precise_origin_timestamp: timestamp.into(),
            }),
            suffix: TlvSet::default(),
        }
    }

    pub(crate) fn announce(
        global: &PtpInstanceState,
        port_identity: PortIdentity,
        sequence_id: u16,
        log_announce_interval: i8,
    ) -> Self {
        let time_properties_ds = &global.time_properties_ds;

        let header = Header {
            leap59: time_properties_ds.leap_indicator == LeapIndicator::Leap59,
            leap61: time_properties_ds.leap_indicator == LeapIndicator::Leap61,
            current_utc_offset_valid: time_properties_ds.current_utc_offset.is_some(),
            ptp_timescale: time_properties_ds.ptp_timescale,
            time_tracable: time_properties_ds.time_traceable,
            frequency_tracable: time_properties_ds.frequency_traceable,
            log_message_interval: log_announce_interval,
            ..base_header(&global.default_ds, port_identity, sequence_id)
        };

        let body = MessageBody::Announce(AnnounceMessage {
            header,
            origin_timestamp: Default::default(),
            current_utc_offset: time_properties_ds.current_utc_offset.unwrap_or_default(),
            grandmaster_priority_1: global.parent_ds.grandmaster_priority_1,
            grandmaster_clock_quality: global.parent_ds.grandmaster_clock_quality,
            grandmaster_priority_2: global.parent_ds.grandmaster_priority_2,
            grandmaster_identity: global.parent_ds.grandmaster_identity,
            steps_removed: global.current_ds.steps_removed,
            time_source: time_properties_ds.time_source,
        });

        Message {
            header,
            body,
            suffix: TlvSet::default(),
        }
    }

    pub(crate) fn delay_req(
        default_ds: &InternalDefaultDS,
        port_identity: PortIdentity,
        sequence_id: u16,
    ) -> Self {
        let header = Header {
            log_message_interval: 0x7f,
            ..base_header(default_ds, port_identity, sequence_id)
        };

        Message {
            header,
            body: MessageBody::DelayReq(DelayReqMessage {
                origin_timestamp: WireTimestamp::default(),
            }),
            suffix: TlvSet::default(),
        }
    }

    pub(crate) fn delay_resp(
        request_header: Header,
        request: DelayReqMessage,
        port_identity: PortIdentity,
        min_delay_req_interval: Interval,
        timestamp: Time,
    ) -> Self {
        // We don't need the request body, but requiring it makes it harder to
        // accidentally pair this with the wrong message type.
        let _ = request;

        let header = Header {
            two_step_flag: false,
            source_port_identity: port_identity,
            correction_field: TimeInterval(
                request_header.correction_field.0 + timestamp.subnano().0,
            ),
            log_message_interval: min_delay_req_interval.as_log_2(),
            ..request_header
        };

        let body = MessageBody::DelayResp(DelayRespMessage {
            receive_timestamp: timestamp.into(),
            requesting_port_identity: request_header.source_port_identity,
        });

        Message {
            header,
            body,
            suffix: TlvSet::default(),
        }
    }

    pub(crate) fn pdelay_req(
        default_ds: &InternalDefaultDS,
        port_identity: PortIdentity,
        sequence_id: u16,
    ) -> Self {
        let header = Header {
            log_message_interval: 0x7f,
            ..base_header(default_ds, port_identity, sequence_id)
        };

        Message {
            header,
            body: MessageBody::PDelayReq(PDelayReqMessage {
                origin_timestamp: WireTimestamp::default(),
            }),
            suffix: TlvSet::default(),
        }
    }

    pub(crate) fn pdelay_resp(
        default_ds: &InternalDefaultDS,
        port_identity: PortIdentity,
        request_header: Header,
        timestamp: Time,
    ) -> Self {
        let header = Header {
            two_step_flag: true,
            log_message_interval: 0x7f,
            correction_field: TimeInterval(
                request_header.correction_field.0 + timestamp.subnano().0,
            ),
            ..base_header(default_ds, port_identity, request_header.sequence_id)
        };

        Message {
            header,
            body: MessageBody::PDelayResp(PDelayRespMessage {
                request_receive_timestamp: timestamp.into(),
                requesting_port_identity: request_header.source_port_identity,
            }),
            suffix: TlvSet::default(),
        }
    }

    pub(crate) fn pdelay_resp_follow_up(
        default_ds: &InternalDefaultDS,
        port_identity: PortIdentity,
        requestor_identity: PortIdentity,
        sequence_id: u16,
        timestamp: Time,
    ) -> Self {
        let header = Header {
            correction_field: timestamp.subnano(),
            log_message_interval: 0x7f,
            ..base_header(default_ds, port_identity, sequence_id)
        };

        Message {
            header,
            body: MessageBody::PDelayRespFollowUp(PDelayRespFollowUpMessage {
                response_origin_timestamp: timestamp.into(),
                requesting_port_identity: requestor_identity,
            }),
            suffix: TlvSet::default(),
        }
    }

    pub(crate) fn management_reply(
        port_identity: PortIdentity,
        request_header: &Header,
        request: &ManagementMessage,
        management_tlv: ManagementTlv,
    ) -> Self {
        let header = Header {
            source_port_identity: port_identity,
            sequence_id: request_header.sequence_id,
            sdo_id: request_header.sdo_id,
            domain_number: request_header.domain_number,
            log_message_interval: 0x7f,
            ..Default::default()
        };

        let body = MessageBody::Management(ManagementMessage {
            target_port_identity: request_header.source_port_identity,
            starting_boundary_hops: request.starting_boundary_hops,
            boundary_hops: request.starting_boundary_hops,
            action: ManagementAction::Response,
            management_tlv,
        });

        Message {
            header,
            body,
            suffix: TlvSet::default(),
        }
    }
}

impl<'a> Message<'a> {
    pub(crate) fn header(&self) -> &Header {
        &self.header
    }

    /// The byte size on the wire of this message
    pub(crate) fn wire_size(&self) -> usize {
        self.header.wire_size() + self.body.wire_size() + self.suffix.wire_size()
    }

    /// Serializes the object into the PTP wire format.
    ///
    /// Returns the used buffer size that contains the message or an error.
    pub(crate) fn serialize(&self, buffer: &mut [u8]) -> Result<usize, WireFormatError> {
        if buffer.len() < self.wire_size() {
            return Err(WireFormatError::BufferTooShort);
        }

        let (header, rest) = buffer.split_at_mut(34);
        let (body, tlv) = rest.split_at_mut(self.body.wire_size());

        self.header.serialize_header(
            self.body.content_type(),
            self.body.wire_size() + self.suffix.wire_size(),
            header,
        )?;

        self.body.serialize(body)?;

        self.suffix.serialize(tlv)?;

        Ok(self.wire_size())
    }

    /// Deserializes a message from the PTP wire format.
    ///
    /// Returns the message or an error.
    pub(crate) fn deserialize(buffer: &'a [u8]) -> Result<Self, WireFormatError> {
        let header_data = Header::deserialize_header(buffer)?;

        if header_data.message_length < 34 {
            return Err(WireFormatError::Invalid);
        }

        // Ensure we have the entire message and ignore potential padding
        // Skip the header bytes and only keep the content
        let content_buffer = buffer
            .get(34..(header_data.message_length as usize))
            .ok_or(WireFormatError::BufferTooShort)?;

        let body = MessageBody::deserialize(
            header_data.message_type,
            &header_data.header,
            content_buffer,
        )?;

        let tlv_buffer = &content_buffer
            .get(body.wire_size()..)
            .ok_or(WireFormatError::BufferTooShort)?;
        let suffix = TlvSet::deserialize(tlv_buffer)?;

        Ok(Message {
            header: header_data.header,
            body,
            suffix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstanceConfig;
    use crate::datastructures::common::ClockQuality;

    fn test_default_ds() -> InternalDefaultDS {
        InternalDefaultDS::new(InstanceConfig {
            clock_identity: Default::default(),
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

    #[test]
    fn sync_message_roundtrip() {
        let message = Message::sync(&test_default_ds(), Default::default(), 42, -3);

        let mut buffer = [0u8; MAX_DATA_LEN];
        let len = message.serialize(&mut buffer).unwrap();
        assert_eq!(len, 44);

        let parsed = Message::deserialize(&buffer[..len]).unwrap();
        assert_eq!(parsed, message);
        assert!(parsed.is_event());
        assert_eq!(parsed.header().log_message_interval, -3);
    }

    #[test]
    fn delay_resp_roundtrip() {
        let request = Message::delay_req(&test_default_ds(), Default::default(), 890);
        let MessageBody::DelayReq(request_body) = request.body else {
            unreachable!()
        };

        let message = Message::delay_resp(
            request.header,
            request_body,
            Default::default(),
            Interval::TWO_SECONDS,
            Time::from_micros(500),
        );

        let mut buffer = [0u8; MAX_DATA_LEN];
        let len = message.serialize(&mut buffer).unwrap();
        let parsed = Message::deserialize(&buffer[..len]).unwrap();
        assert_eq!(parsed, message);
        assert_eq!(parsed.header().sequence_id, 890);
        assert_eq!(parsed.header().log_message_interval, 1);
        assert!(!parsed.is_event());
    }

    #[test]
    fn pdelay_messages_roundtrip() {
        let default_ds = test_default_ds();
        let req = Message::pdelay_req(&default_ds, Default::default(), 7);

        let mut buffer = [0u8; MAX_DATA_LEN];
        let len = req.serialize(&mut buffer).unwrap();
        assert_eq!(len, 54);
        let parsed_req = Message::deserialize(&buffer[..len]).unwrap();
        assert_eq!(parsed_req, req);

        let resp = Message::pdelay_resp(
            &default_ds,
            Default::default(),
            req.header,
            Time::from_micros(110),
        );
        let len = resp.serialize(&mut buffer).unwrap();
        let parsed_resp = Message::deserialize(&buffer[..len]).unwrap();
        assert_eq!(parsed_resp, resp);
        assert_eq!(parsed_resp.header().sequence_id, 7);

        let fup = Message::pdelay_resp_follow_up(
            &default_ds,
            Default::default(),
            req.header.source_port_identity,
            7,
            Time::from_micros(115),
        );
        let len = fup.serialize(&mut buffer).unwrap();
        let parsed_fup = Message::deserialize(&buffer[..len]).unwrap();
        assert_eq!(parsed_fup, fup);
    }
}
