use crate::datastructures::{common::PortIdentity, WireFormat, WireFormatError};

/// A signaling message. The TLVs it carries stay in the message suffix; the
/// core parses but does not act on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SignalingMessage {
    pub(crate) target_port_identity: PortIdentity,
}

impl SignalingMessage {
    pub(crate) fn content_size(&self) -> usize {
        10
    }

    pub(crate) fn serialize_content(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        if buffer.len() < 10 {
            return Err(WireFormatError::BufferTooShort);
        }

        self.target_port_identity.serialize(&mut buffer[0..10])
    }

    pub(crate) fn deserialize_content(buffer: &[u8]) -> Result<Self, WireFormatError> {
        if buffer.len() < 10 {
            return Err(WireFormatError::BufferTooShort);
        }

        Ok(Self {
            target_port_identity: PortIdentity::deserialize(&buffer[0..10])?,
        })
    }
}
