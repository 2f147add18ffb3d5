use crate::datastructures::{
    common::{Tlv, TlvType, WireTimestamp},
    WireFormat, WireFormatError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FollowUpMessage {
    pub(crate) precise_origin_timestamp: WireTimestamp,
}

impl FollowUpMessage {
    pub(crate) fn content_size(&self) -> usize {
        10
    }

    pub(crate) fn serialize_content(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        if buffer.len() < 10 {
            return Err(WireFormatError::BufferTooShort);
        }

        self.precise_origin_timestamp.serialize(&mut buffer[0..10])
    }

    pub(crate) fn deserialize_content(buffer: &[u8]) -> Result<Self, WireFormatError> {
        if buffer.len() < 10 {
            return Err(WireFormatError::BufferTooShort);
        }

        Ok(Self {
            precise_origin_timestamp: WireTimestamp::deserialize(&buffer[0..10])?,
        })
    }
}

/// The organization identifier of the IEEE 802.1 committee
const IEEE_802_1_ORG_ID: [u8; 3] = [0x00, 0x80, 0xc2];
/// The organization sub type of the 802.1AS follow up information TLV
const FOLLOW_UP_INFO_SUBTYPE: [u8; 3] = [0x00, 0x00, 0x01];

/// The 802.1AS follow up information TLV, carried as an organization
/// extension on two-step follow up messages in the gPTP profile.
///
/// See *IEEE802.1AS-2020 section 11.4.4.3*.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FollowUpInfo {
    /// The rate of the grandmaster relative to this clock, scaled by 2^41
    pub cumulative_scaled_rate_offset: i32,
    /// Incremented whenever the grandmaster changes its time base
    pub gm_time_base_indicator: u16,
    /// Phase change at the last grandmaster time base change, scaled
    /// nanoseconds (96 bit)
    pub last_gm_phase_change: [u8; 12],
    /// Frequency change at the last grandmaster time base change
    pub scaled_last_gm_freq_change: i32,
}

impl FollowUpInfo {
    pub(crate) const VALUE_LEN: usize = 28;

    /// Write the TLV value bytes (organization id and subtype included) into
    /// `buffer` and return the [`Tlv`] describing them.
    pub(crate) fn serialize_value<'a>(&self, buffer: &'a mut [u8]) -> Tlv<'a> {
        buffer[0..3].copy_from_slice(&IEEE_802_1_ORG_ID);
        buffer[3..6].copy_from_slice(&FOLLOW_UP_INFO_SUBTYPE);
        buffer[6..10].copy_from_slice(&self.cumulative_scaled_rate_offset.to_be_bytes());
        buffer[10..12].copy_from_slice(&self.gm_time_base_indicator.to_be_bytes());
        buffer[12..24].copy_from_slice(&self.last_gm_phase_change);
        buffer[24..28].copy_from_slice(&self.scaled_last_gm_freq_change.to_be_bytes());

        Tlv {
            tlv_type: TlvType::OrganizationExtension,
            value: &buffer[..Self::VALUE_LEN],
        }
    }

    /// Extract follow up information from a TLV, if it is one.
    ///
    /// TLVs with a different organization id or subtype yield `None`. An
    /// unrecognized organization id is not an error; the original
    /// implementation accepts anything that is not the 802.1AS extension.
    pub(crate) fn extract(tlv: &Tlv<'_>) -> Option<Self> {
        if tlv.tlv_type != TlvType::OrganizationExtension || tlv.value.len() < Self::VALUE_LEN {
            return None;
        }

        if tlv.value[0..3] != IEEE_802_1_ORG_ID || tlv.value[3..6] != FOLLOW_UP_INFO_SUBTYPE {
            return None;
        }

        Some(Self {
            cumulative_scaled_rate_offset: i32::from_be_bytes(tlv.value[6..10].try_into().unwrap()),
            gm_time_base_indicator: u16::from_be_bytes(tlv.value[10..12].try_into().unwrap()),
            last_gm_phase_change: tlv.value[12..24].try_into().unwrap(),
            scaled_last_gm_freq_change: i32::from_be_bytes(tlv.value[24..28].try_into().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follow_up_info_roundtrip() {
        let info = FollowUpInfo {
            cumulative_scaled_rate_offset: -12345,
            gm_time_base_indicator: 3,
            last_gm_phase_change: [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
            scaled_last_gm_freq_change: 99,
        };

        let mut buffer = [0u8; FollowUpInfo::VALUE_LEN];
        let tlv = info.serialize_value(&mut buffer);
        assert_eq!(tlv.wire_size() % 2, 0);
        assert_eq!(FollowUpInfo::extract(&tlv), Some(info));
    }

    #[test]
    fn other_organization_is_ignored() {
        let mut value = [0u8; FollowUpInfo::VALUE_LEN];
        value[0..3].copy_from_slice(&[0xde, 0xad, 0x00]);
        let tlv = Tlv {
            tlv_type: TlvType::OrganizationExtension,
            value: &value,
        };
        assert_eq!(FollowUpInfo::extract(&tlv), None);
    }
}
