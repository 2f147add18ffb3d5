use crate::datastructures::WireFormatError;

/// Type of a TLV suffix block, see *IEEE1588-2019 section 14.1.1 table 52*.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvType {
    Reserved,
    Management,
    ManagementErrorStatus,
    OrganizationExtension,
    RequestUnicastTransmission,
    GrantUnicastTransmission,
    CancelUnicastTransmission,
    AcknowledgeCancelUnicastTransmission,
    PathTrace,
    AlternateTimeOffsetIndicator,
    Legacy,
    Experimental,
    OrganizationExtensionPropagate,
    EnhancedAccuracyMetrics,
    OrganizationExtensionDoNotPropagate,
    L1Sync,
    PortCommunicationAvailability,
    ProtocolAddress,
    SlaveRxSyncTimingData,
    SlaveRxSyncComputedData,
    SlaveTxEventTimestamps,
    CumulativeRateRatio,
    Pad,
    Authentication,
}

impl TlvType {
    /// Converts enum variants to the primitive value used on the wire
    pub fn to_primitive(self) -> u16 {
        match self {
            Self::Reserved => 0x0000,
            Self::Management => 0x0001,
            Self::ManagementErrorStatus => 0x0002,
            Self::OrganizationExtension => 0x0003,
            Self::RequestUnicastTransmission => 0x0004,
            Self::GrantUnicastTransmission => 0x0005,
            Self::CancelUnicastTransmission => 0x0006,
            Self::AcknowledgeCancelUnicastTransmission => 0x0007,
            Self::PathTrace => 0x0008,
            Self::AlternateTimeOffsetIndicator => 0x0009,
            Self::Legacy => 0x2000,
            Self::Experimental => 0x2004,
            Self::OrganizationExtensionPropagate => 0x4000,
            Self::EnhancedAccuracyMetrics => 0x4001,
            Self::OrganizationExtensionDoNotPropagate => 0x8000,
            Self::L1Sync => 0x8001,
            Self::PortCommunicationAvailability => 0x8002,
            Self::ProtocolAddress => 0x8003,
            Self::SlaveRxSyncTimingData => 0x8004,
            Self::SlaveRxSyncComputedData => 0x8005,
            Self::SlaveTxEventTimestamps => 0x8006,
            Self::CumulativeRateRatio => 0x8007,
            Self::Pad => 0x8008,
            Self::Authentication => 0x8009,
        }
    }

    /// Converts wire values to enum variants
    pub fn from_primitive(value: u16) -> Self {
        match value {
            0x2000..=0x2003 => Self::Legacy,
            0x2004..=0x202f | 0x7f00..=0x7fff => Self::Experimental,
            0x0001 => Self::Management,
            0x0002 => Self::ManagementErrorStatus,
            0x0003 => Self::OrganizationExtension,
            0x0004 => Self::RequestUnicastTransmission,
            0x0005 => Self::GrantUnicastTransmission,
            0x0006 => Self::CancelUnicastTransmission,
            0x0007 => Self::AcknowledgeCancelUnicastTransmission,
            0x0008 => Self::PathTrace,
            0x0009 => Self::AlternateTimeOffsetIndicator,
            0x4000 => Self::OrganizationExtensionPropagate,
            0x4001 => Self::EnhancedAccuracyMetrics,
            0x8000 => Self::OrganizationExtensionDoNotPropagate,
            0x8001 => Self::L1Sync,
            0x8002 => Self::PortCommunicationAvailability,
            0x8003 => Self::ProtocolAddress,
            0x8004 => Self::SlaveRxSyncTimingData,
            0x8005 => Self::SlaveRxSyncComputedData,
            0x8006 => Self::SlaveTxEventTimestamps,
            0x8007 => Self::CumulativeRateRatio,
            0x8008 => Self::Pad,
            0x8009 => Self::Authentication,
            _ => Self::Reserved,
        }
    }
}

/// A single TLV from the suffix of a message, with its value still in wire
/// representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    /// The type of this TLV
    pub tlv_type: TlvType,
    /// The value bytes, without the type and length prefix
    pub value: &'a [u8],
}

impl<'a> Tlv<'a> {
    /// Size of the TLV when serialized, including the 4 byte prefix
    pub fn wire_size(&self) -> usize {
        4 + self.value.len()
    }

    fn serialize(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        if buffer.len() < self.wire_size() {
            return Err(WireFormatError::BufferTooShort);
        }

        buffer[0..2].copy_from_slice(&self.tlv_type.to_primitive().to_be_bytes());
        buffer[2..4].copy_from_slice(&(self.value.len() as u16).to_be_bytes());
        buffer[4..4 + self.value.len()].copy_from_slice(self.value);
        Ok(())
    }

    fn deserialize(buffer: &'a [u8]) -> Result<Self, WireFormatError> {
        if buffer.len() < 4 {
            return Err(WireFormatError::BufferTooShort);
        }

        let tlv_type = TlvType::from_primitive(u16::from_be_bytes(buffer[0..2].try_into().unwrap()));
        let length = u16::from_be_bytes(buffer[2..4].try_into().unwrap()) as usize;
        let value = buffer
            .get(4..4 + length)
            .ok_or(WireFormatError::BufferTooShort)?;

        Ok(Self { tlv_type, value })
    }
}

/// The suffix of a message, a possibly empty sequence of TLVs kept in wire
/// representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TlvSet<'a> {
    bytes: &'a [u8],
}

impl<'a> TlvSet<'a> {
    /// Size of the whole suffix when serialized
    pub fn wire_size(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn serialize(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        if buffer.len() < self.bytes.len() {
            return Err(WireFormatError::BufferTooShort);
        }

        buffer[..self.bytes.len()].copy_from_slice(self.bytes);
        Ok(())
    }

    pub(crate) fn deserialize(buffer: &'a [u8]) -> Result<Self, WireFormatError> {
        // Validate that the buffer is a sequence of complete TLVs
        let mut offset = 0;
        while offset < buffer.len() {
            let tlv = Tlv::deserialize(&buffer[offset..])?;
            offset += tlv.wire_size();
        }

        Ok(Self { bytes: buffer })
    }

    /// Iterate over the TLVs in the suffix
    pub fn tlv(&self) -> TlvSetIterator<'a> {
        TlvSetIterator { bytes: self.bytes }
    }
}

/// Iterator over the [`Tlv`]s of a [`TlvSet`]
#[derive(Debug)]
pub struct TlvSetIterator<'a> {
    bytes: &'a [u8],
}

impl<'a> TlvSetIterator<'a> {
    /// An iterator yielding nothing
    pub fn empty() -> Self {
        Self { bytes: &[] }
    }
}

impl<'a> Iterator for TlvSetIterator<'a> {
    type Item = Tlv<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.bytes.is_empty() {
            return None;
        }

        // The set was validated during deserialization or built by us
        let tlv = Tlv::deserialize(self.bytes).expect("tlv set contains valid tlvs");
        self.bytes = &self.bytes[tlv.wire_size()..];
        Some(tlv)
    }
}

/// Incrementally serializes TLVs into a caller provided buffer, producing a
/// [`TlvSet`] borrowing that buffer.
#[derive(Debug)]
pub struct TlvSetBuilder<'a> {
    buffer: &'a mut [u8],
    used: usize,
}

impl<'a> TlvSetBuilder<'a> {
    /// Create a builder writing into `buffer`
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, used: 0 }
    }

    /// Append a TLV to the set
    pub fn add(&mut self, tlv: Tlv<'_>) -> Result<(), WireFormatError> {
        tlv.serialize(&mut self.buffer[self.used..])?;
        self.used += tlv.wire_size();
        Ok(())
    }

    /// Finish and get the resulting set
    pub fn build(self) -> TlvSet<'a> {
        let used = self.used;
        let buffer: &'a [u8] = self.buffer;
        TlvSet {
            bytes: &buffer[..used],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_iterate() {
        let mut backing = [0u8; 64];
        let mut builder = TlvSetBuilder::new(&mut backing);
        builder
            .add(Tlv {
                tlv_type: TlvType::PathTrace,
                value: &[1, 2, 3, 4, 5, 6, 7, 8],
            })
            .unwrap();
        builder
            .add(Tlv {
                tlv_type: TlvType::OrganizationExtension,
                value: &[0xaa, 0xbb],
            })
            .unwrap();

        let set = builder.build();
        assert_eq!(set.wire_size(), 12 + 6);

        let mut iter = set.tlv();
        let first = iter.next().unwrap();
        assert_eq!(first.tlv_type, TlvType::PathTrace);
        assert_eq!(first.value, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let second = iter.next().unwrap();
        assert_eq!(second.tlv_type, TlvType::OrganizationExtension);
        assert!(iter.next().is_none());
    }

    #[test]
    fn deserialize_rejects_truncated() {
        // claims 8 bytes of value but only has 2
        let bytes = [0x00, 0x08, 0x00, 0x08, 0x01, 0x02];
        assert!(TlvSet::deserialize(&bytes).is_err());
    }
}
