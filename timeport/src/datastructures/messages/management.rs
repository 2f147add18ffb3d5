use arrayvec::ArrayVec;

use crate::datastructures::{
    common::{PortIdentity, TlvType},
    WireFormat, WireFormatError,
};

/// Maximum payload we will carry in a single management TLV. Large enough for
/// every dataset we serve, including the clock description.
pub(crate) const MAX_MANAGEMENT_PAYLOAD: usize = 128;

/// The action field of a management message, see *IEEE1588-2019 section
/// 15.4.1.6*
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ManagementAction {
    Get,
    Set,
    Response,
    Command,
    Acknowledge,
    Reserved(u8),
}

impl ManagementAction {
    pub(crate) fn to_primitive(self) -> u8 {
        match self {
            Self::Get => 0x00,
            Self::Set => 0x01,
            Self::Response => 0x02,
            Self::Command => 0x03,
            Self::Acknowledge => 0x04,
            Self::Reserved(v) => v,
        }
    }

    pub(crate) fn from_primitive(value: u8) -> Self {
        match value & 0x0f {
            0x00 => Self::Get,
            0x01 => Self::Set,
            0x02 => Self::Response,
            0x03 => Self::Command,
            0x04 => Self::Acknowledge,
            v => Self::Reserved(v),
        }
    }
}

/// The management ids the responder understands, see *IEEE1588-2019 section
/// 15.5.2.3 table 59*
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ManagementId {
    NullManagement,
    ClockDescription,
    PortDataSet,
    LogAnnounceInterval,
    AnnounceReceiptTimeout,
    LogSyncInterval,
    VersionNumber,
    DelayMechanism,
    LogMinPdelayReqInterval,
    PortDataSetNp,
    PortPropertiesNp,
}

impl ManagementId {
    pub(crate) fn to_primitive(self) -> u16 {
        match self {
            Self::NullManagement => 0x0000,
            Self::ClockDescription => 0x0001,
            Self::PortDataSet => 0x2004,
            Self::LogAnnounceInterval => 0x2007,
            Self::AnnounceReceiptTimeout => 0x2008,
            Self::LogSyncInterval => 0x2009,
            Self::VersionNumber => 0x200c,
            Self::DelayMechanism => 0x6000,
            Self::LogMinPdelayReqInterval => 0x6001,
            Self::PortDataSetNp => 0xc002,
            Self::PortPropertiesNp => 0xc004,
        }
    }

    pub(crate) fn from_primitive(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(Self::NullManagement),
            0x0001 => Some(Self::ClockDescription),
            0x2004 => Some(Self::PortDataSet),
            0x2007 => Some(Self::LogAnnounceInterval),
            0x2008 => Some(Self::AnnounceReceiptTimeout),
            0x2009 => Some(Self::LogSyncInterval),
            0x200c => Some(Self::VersionNumber),
            0x6000 => Some(Self::DelayMechanism),
            0x6001 => Some(Self::LogMinPdelayReqInterval),
            0xc002 => Some(Self::PortDataSetNp),
            0xc004 => Some(Self::PortPropertiesNp),
            _ => None,
        }
    }
}

/// The error codes of a management error status TLV, see *IEEE1588-2019
/// section 15.5.4.4 table 109*
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ManagementErrorId {
    ResponseTooBig,
    NoSuchId,
    WrongLength,
    WrongValue,
    NotSetable,
    NotSupported,
    GeneralError,
}

impl ManagementErrorId {
    pub(crate) fn to_primitive(self) -> u16 {
        match self {
            Self::ResponseTooBig => 0x0001,
            Self::NoSuchId => 0x0002,
            Self::WrongLength => 0x0003,
            Self::WrongValue => 0x0004,
            Self::NotSetable => 0x0005,
            Self::NotSupported => 0x0006,
            Self::GeneralError => 0xfffe,
        }
    }
}

/// The single management TLV of a management message
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ManagementTlv {
    /// A GET/SET/RESPONSE payload. The id is kept raw so unknown ids survive
    /// for the error response.
    Management {
        management_id: u16,
        data: ArrayVec<u8, MAX_MANAGEMENT_PAYLOAD>,
    },
    /// An error response referencing the offending management id
    ErrorStatus {
        management_error_id: ManagementErrorId,
        management_id: u16,
    },
}

impl ManagementTlv {
    fn wire_size(&self) -> usize {
        match self {
            // type + length + managementId + data
            Self::Management { data, .. } => 6 + data.len(),
            // type + length + managementErrorId + managementId + reserved
            Self::ErrorStatus { .. } => 12,
        }
    }

    fn serialize(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        if buffer.len() < self.wire_size() {
            return Err(WireFormatError::BufferTooShort);
        }

        match self {
            Self::Management {
                management_id,
                data,
            } => {
                buffer[0..2].copy_from_slice(&TlvType::Management.to_primitive().to_be_bytes());
                buffer[2..4].copy_from_slice(&((data.len() + 2) as u16).to_be_bytes());
                buffer[4..6].copy_from_slice(&management_id.to_be_bytes());
                buffer[6..6 + data.len()].copy_from_slice(data);
            }
            Self::ErrorStatus {
                management_error_id,
                management_id,
            } => {
                buffer[0..2]
                    .copy_from_slice(&TlvType::ManagementErrorStatus.to_primitive().to_be_bytes());
                buffer[2..4].copy_from_slice(&8u16.to_be_bytes());
                buffer[4..6].copy_from_slice(&management_error_id.to_primitive().to_be_bytes());
                buffer[6..8].copy_from_slice(&management_id.to_be_bytes());
                buffer[8..12].fill(0);
            }
        }

        Ok(())
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, WireFormatError> {
        if buffer.len() < 6 {
            return Err(WireFormatError::BufferTooShort);
        }

        let tlv_type = TlvType::from_primitive(u16::from_be_bytes(buffer[0..2].try_into().unwrap()));
        let length = u16::from_be_bytes(buffer[2..4].try_into().unwrap()) as usize;
        if length < 2 || buffer.len() < 4 + length {
            return Err(WireFormatError::BufferTooShort);
        }

        match tlv_type {
            TlvType::Management => {
                let management_id = u16::from_be_bytes(buffer[4..6].try_into().unwrap());
                let mut data = ArrayVec::new();
                data.try_extend_from_slice(&buffer[6..4 + length])?;
                Ok(Self::Management {
                    management_id,
                    data,
                })
            }
            _ => Err(WireFormatError::Invalid),
        }
    }
}

/// A management message, see *IEEE1588-2019 section 15.4*
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ManagementMessage {
    pub(crate) target_port_identity: PortIdentity,
    pub(crate) starting_boundary_hops: u8,
    pub(crate) boundary_hops: u8,
    pub(crate) action: ManagementAction,
    pub(crate) management_tlv: ManagementTlv,
}

impl ManagementMessage {
    pub(crate) fn content_size(&self) -> usize {
        14 + self.management_tlv.wire_size()
    }

    pub(crate) fn serialize_content(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        if buffer.len() < self.content_size() {
            return Err(WireFormatError::BufferTooShort);
        }

        self.target_port_identity.serialize(&mut buffer[0..10])?;
        buffer[10] = self.starting_boundary_hops;
        buffer[11] = self.boundary_hops;
        buffer[12] = self.action.to_primitive();
        buffer[13] = 0;
        self.management_tlv.serialize(&mut buffer[14..])?;

        Ok(())
    }

    pub(crate) fn deserialize_content(buffer: &[u8]) -> Result<Self, WireFormatError> {
        if buffer.len() < 14 {
            return Err(WireFormatError::BufferTooShort);
        }

        Ok(Self {
            target_port_identity: PortIdentity::deserialize(&buffer[0..10])?,
            starting_boundary_hops: buffer[10],
            boundary_hops: buffer[11],
            action: ManagementAction::from_primitive(buffer[12]),
            management_tlv: ManagementTlv::deserialize(&buffer[14..])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn management_get_roundtrip() {
        let message = ManagementMessage {
            target_port_identity: PortIdentity::wildcard(),
            starting_boundary_hops: 1,
            boundary_hops: 1,
            action: ManagementAction::Get,
            management_tlv: ManagementTlv::Management {
                management_id: ManagementId::PortDataSet.to_primitive(),
                data: ArrayVec::new(),
            },
        };

        let mut buffer = [0u8; 64];
        message.serialize_content(&mut buffer).unwrap();
        let parsed = ManagementMessage::deserialize_content(&buffer[..message.content_size()])
            .unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn error_status_is_even_length() {
        let tlv = ManagementTlv::ErrorStatus {
            management_error_id: ManagementErrorId::NoSuchId,
            management_id: 0x1234,
        };
        assert_eq!(tlv.wire_size() % 2, 0);
    }
}
