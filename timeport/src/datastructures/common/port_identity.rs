use super::clock_identity::ClockIdentity;
use crate::datastructures::{WireFormat, WireFormatError};

/// The identity of a single port of a PTP instance
///
/// For more details, see *IEEE1588-2019 section 7.5.2.3*.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord, Hash)]
pub struct PortIdentity {
    /// The identity of the clock this port is part of
    pub clock_identity: ClockIdentity,
    /// The index of the port, counting from 1
    pub port_number: u16,
}

impl PortIdentity {
    /// A target port identity matching every port (all ones)
    pub fn wildcard() -> Self {
        Self {
            clock_identity: ClockIdentity([0xff; 8]),
            port_number: 0xffff,
        }
    }
}

impl WireFormat for PortIdentity {
    fn wire_size(&self) -> usize {
        10
    }

    fn serialize(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        self.clock_identity.serialize(&mut buffer[0..8])?;
        buffer[8..10].copy_from_slice(&self.port_number.to_be_bytes());
        Ok(())
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, WireFormatError> {
        Ok(Self {
            clock_identity: ClockIdentity::deserialize(&buffer[0..8])?,
            port_number: u16::from_be_bytes(buffer[8..10].try_into().unwrap()),
        })
    }
}

impl core::fmt::Display for PortIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}-{}", self.clock_identity, self.port_number)
    }
}
