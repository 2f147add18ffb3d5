use super::{control_field::ControlField, MessageType};
use crate::datastructures::{
    common::{PortIdentity, TimeInterval},
    WireFormat, WireFormatError,
};

/// The common header of all PTP messages, see *IEEE1588-2019 section 13.3*
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) sdo_id: SdoId,
    pub(crate) version: PtpVersion,
    pub(crate) domain_number: u8,
    pub(crate) alternate_master_flag: bool,
    pub(crate) two_step_flag: bool,
    pub(crate) unicast_flag: bool,
    pub(crate) ptp_profile_specific_1: bool,
    pub(crate) ptp_profile_specific_2: bool,
    pub(crate) leap61: bool,
    pub(crate) leap59: bool,
    pub(crate) current_utc_offset_valid: bool,
    pub(crate) ptp_timescale: bool,
    pub(crate) time_tracable: bool,
    pub(crate) frequency_tracable: bool,
    pub(crate) synchronization_uncertain: bool,
    pub(crate) correction_field: TimeInterval,
    pub(crate) source_port_identity: PortIdentity,
    pub(crate) sequence_id: u16,
    pub(crate) log_message_interval: i8,
}

pub(crate) struct DeserializedHeader {
    pub(crate) header: Header,
    pub(crate) message_type: MessageType,
    pub(crate) message_length: u16,
}

impl Header {
    pub(crate) fn new() -> Self {
        Self {
            sdo_id: SdoId(0),
            version: PtpVersion { major: 2, minor: 1 },
            domain_number: 0,
            alternate_master_flag: false,
            two_step_flag: false,
            unicast_flag: false,
            ptp_profile_specific_1: false,
            ptp_profile_specific_2: false,
            leap59: false,
            leap61: false,
            current_utc_offset_valid: false,
            ptp_timescale: false,
            time_tracable: false,
            frequency_tracable: false,
            synchronization_uncertain: false,
            correction_field: TimeInterval::default(),
            source_port_identity: PortIdentity::default(),
            sequence_id: 0,
            log_message_interval: 0,
        }
    }

    pub(crate) fn wire_size(&self) -> usize {
        34
    }

    pub(crate) fn serialize_header(
        &self,
        content_type: MessageType,
        content_length: usize,
        buffer: &mut [u8],
    ) -> Result<(), WireFormatError> {
        if buffer.len() < 34 {
            return Err(WireFormatError::BufferTooShort);
        }

        buffer[0] = ((self.sdo_id.high_byte()) << 4) | ((content_type as u8) & 0x0f);
        buffer[1] = (self.version.minor << 4) | self.version.major;
        buffer[2..4].copy_from_slice(&((content_length + 34) as u16).to_be_bytes());
        buffer[4] = self.domain_number;
        buffer[5] = self.sdo_id.low_byte();
        buffer[6] = 0;
        buffer[7] = 0;

        if self.alternate_master_flag {
            buffer[6] |= 1 << 0;
        }
        if self.two_step_flag {
            buffer[6] |= 1 << 1;
        }
        if self.unicast_flag {
            buffer[6] |= 1 << 2;
        }
        if self.ptp_profile_specific_1 {
            buffer[6] |= 1 << 5;
        }
        if self.ptp_profile_specific_2 {
            buffer[6] |= 1 << 6;
        }
        if self.leap61 {
            buffer[7] |= 1 << 0;
        }
        if self.leap59 {
            buffer[7] |= 1 << 1;
        }
        if self.current_utc_offset_valid {
            buffer[7] |= 1 << 2;
        }
        if self.ptp_timescale {
            buffer[7] |= 1 << 3;
        }
        if self.time_tracable {
            buffer[7] |= 1 << 4;
        }
        if self.frequency_tracable {
            buffer[7] |= 1 << 5;
        }
        if self.synchronization_uncertain {
            buffer[7] |= 1 << 6;
        }

        self.correction_field.serialize(&mut buffer[8..16])?;
        buffer[16..20].copy_from_slice(&[0, 0, 0, 0]);
        self.source_port_identity.serialize(&mut buffer[20..30])?;
        buffer[30..32].copy_from_slice(&self.sequence_id.to_be_bytes());
        buffer[32] = ControlField::from(content_type).to_primitive();
        buffer[33] = self.log_message_interval as u8;

        Ok(())
    }

    pub(crate) fn deserialize_header(buffer: &[u8]) -> Result<DeserializedHeader, WireFormatError> {
        if buffer.len() < 34 {
            return Err(WireFormatError::BufferTooShort);
        }

        let version = PtpVersion {
            major: buffer[1] & 0x0f,
            minor: (buffer[1] >> 4) & 0x0f,
        };

        let sdo_id = SdoId(((buffer[0] as u16 & 0xf0) << 4) | buffer[5] as u16);

        Ok(DeserializedHeader {
            header: Self {
                sdo_id,
                version,
                domain_number: buffer[4],
                alternate_master_flag: buffer[6] & (1 << 0) > 0,
                two_step_flag: buffer[6] & (1 << 1) > 0,
                unicast_flag: buffer[6] & (1 << 2) > 0,
                ptp_profile_specific_1: buffer[6] & (1 << 5) > 0,
                ptp_profile_specific_2: buffer[6] & (1 << 6) > 0,
                leap61: buffer[7] & (1 << 0) > 0,
                leap59: buffer[7] & (1 << 1) > 0,
                current_utc_offset_valid: buffer[7] & (1 << 2) > 0,
                ptp_timescale: buffer[7] & (1 << 3) > 0,
                time_tracable: buffer[7] & (1 << 4) > 0,
                frequency_tracable: buffer[7] & (1 << 5) > 0,
                synchronization_uncertain: buffer[7] & (1 << 6) > 0,
                correction_field: TimeInterval::deserialize(&buffer[8..16])?,
                source_port_identity: PortIdentity::deserialize(&buffer[20..30])?,
                sequence_id: u16::from_be_bytes(buffer[30..32].try_into().unwrap()),
                log_message_interval: buffer[33] as i8,
            },
            message_type: (buffer[0] & 0x0f).try_into()?,
            message_length: u16::from_be_bytes(buffer[2..4].try_into().unwrap()),
        })
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

/// A wrapper type for the 12 bit sdoId
///
/// It is guaranteed to hold a value that fits within 12 bits. In gPTP
/// deployments the sdoId carries what PTPv2 called the transportSpecific
/// field.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u16", into = "u16"))]
pub struct SdoId(u16);

impl core::fmt::Display for SdoId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SdoId {
    /// Create an sdoId, returns None if the value does not fit in 12 bits
    pub const fn new(sdo_id: u16) -> Option<Self> {
        match sdo_id {
            0..=0xfff => Some(Self(sdo_id)),
            _ => None,
        }
    }

    fn high_byte(self) -> u8 {
        (self.0 >> 8) as u8
    }

    fn low_byte(self) -> u8 {
        self.0 as u8
    }
}

impl From<SdoId> for u16 {
    fn from(value: SdoId) -> Self {
        value.0
    }
}

impl TryFrom<u16> for SdoId {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(value)
    }
}

/// The version of the PTP protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtpVersion {
    major: u8,
    minor: u8,
}

impl PtpVersion {
    /// Create a new version, returns None when either nibble does not fit in
    /// 4 bits
    #[allow(unused)]
    pub fn new(major: u8, minor: u8) -> Option<Self> {
        if major >= 0x10 || minor >= 0x10 {
            None
        } else {
            Some(Self { major, minor })
        }
    }

    /// The major version number
    pub fn major(&self) -> u8 {
        self.major
    }

    /// The minor version number
    pub fn minor(&self) -> u8 {
        self.minor
    }
}

#[cfg(test)]
mod tests {
    use fixed::types::I48F16;

    use super::*;
    use crate::datastructures::common::ClockIdentity;

    #[test]
    fn flagfield_wireformat() {
        #[rustfmt::skip]
        let representations = [
            ([0x00, 0x00u8], Header::default()),
            ([0x01, 0x00u8], Header { alternate_master_flag: true, ..Default::default() }),
            ([0x02, 0x00u8], Header { two_step_flag: true, ..Default::default() }),
            ([0x04, 0x00u8], Header { unicast_flag: true, ..Default::default() }),
            ([0x20, 0x00u8], Header { ptp_profile_specific_1: true, ..Default::default() }),
            ([0x40, 0x00u8], Header { ptp_profile_specific_2: true, ..Default::default() }),
            ([0x00, 0x01u8], Header { leap61: true, ..Default::default() }),
            ([0x00, 0x02u8], Header { leap59: true, ..Default::default() }),
            ([0x00, 0x04u8], Header { current_utc_offset_valid: true, ..Default::default() }),
            ([0x00, 0x08u8], Header { ptp_timescale: true, ..Default::default() }),
            ([0x00, 0x10u8], Header { time_tracable: true, ..Default::default() }),
            ([0x00, 0x20u8], Header { frequency_tracable: true, ..Default::default() }),
            ([0x00, 0x40u8], Header { synchronization_uncertain: true, ..Default::default() }),
        ];

        for (i, (byte_representation, object_representation)) in
            representations.into_iter().enumerate()
        {
            // Test the serialization output
            let mut serialization_buffer = [0; 34];
            object_representation
                .serialize_header(MessageType::Sync, 0, &mut serialization_buffer)
                .unwrap();
            assert_eq!(
                serialization_buffer[6..8],
                byte_representation,
                "The serialized flag field is not what it's supposed to for variant {}",
                i
            );

            // Test the deserialization output
            let mut deserialization_buffer = [0; 34];
            // default version, 2.1
            deserialization_buffer[1] = 0x12;
            deserialization_buffer[6..8].copy_from_slice(&byte_representation);
            let deserialized_flag_field =
                Header::deserialize_header(&deserialization_buffer).unwrap();
            assert_eq!(
                deserialized_flag_field.header, object_representation,
                "The deserialized flag field is not what it's supposed to for variant {}",
                i
            );
        }
    }

    #[test]
    fn header_wireformat() {
        let header = Header {
            sdo_id: SdoId(0x5ab),
            version: PtpVersion { major: 2, minor: 0xa },
            domain_number: 0xaa,
            two_step_flag: true,
            correction_field: TimeInterval(I48F16::from_num(1.5f64)),
            source_port_identity: PortIdentity {
                clock_identity: ClockIdentity([0, 1, 2, 3, 4, 5, 6, 7]),
                port_number: 0x5555,
            },
            sequence_id: 0xdead,
            log_message_interval: 0x16,
            ..Default::default()
        };

        let mut buffer = [0; 34];
        header
            .serialize_header(MessageType::DelayResp, 10, &mut buffer)
            .unwrap();

        assert_eq!(buffer[0], 0x59);
        assert_eq!(buffer[1], 0xa2);
        assert_eq!(u16::from_be_bytes(buffer[2..4].try_into().unwrap()), 44);
        assert_eq!(buffer[4], 0xaa);
        assert_eq!(buffer[5], 0xab);

        let deserialized = Header::deserialize_header(&buffer).unwrap();
        assert_eq!(deserialized.message_type, MessageType::DelayResp);
        assert_eq!(deserialized.message_length, 44);
        assert_eq!(deserialized.header, header);
    }
}
