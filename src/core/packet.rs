//! # Frame Header and Packet
//!
//! ```text
//! [frameLength:u16 LE] [id:u16 LE] [reserved:u8] [obfuscationType:u8] [payload...]
//! ```
//!
//! `frameLength` counts the whole frame, header included.

use crate::error::{ProtocolError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the fixed frame header
pub const HEADER_SIZE: usize = 6;

/// Largest frame representable by the u16 length prefix
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// How the payload of a frame is scrambled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObfuscationType {
    /// Payload passed through as-is
    Plain,
    /// Payload XORed against the keystream table
    Xor,
    /// Reserved or unknown; treated as opaque
    Other(u8),
}

impl ObfuscationType {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => ObfuscationType::Plain,
            1 => ObfuscationType::Xor,
            other => ObfuscationType::Other(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            ObfuscationType::Plain => 0,
            ObfuscationType::Xor => 1,
            ObfuscationType::Other(byte) => byte,
        }
    }
}

/// The fixed 6-byte header of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub length: u16,
    pub id: u16,
    pub reserved: u8,
    pub obfuscation: ObfuscationType,
}

impl PacketHeader {
    /// Parse the header from the first six bytes of a frame
    pub fn parse(frame: &[u8]) -> Result<Self> {
        if frame.len() < HEADER_SIZE {
            return Err(ProtocolError::InvalidHeader);
        }
        Ok(Self {
            length: u16::from_le_bytes([frame[0], frame[1]]),
            id: u16::from_le_bytes([frame[2], frame[3]]),
            reserved: frame[4],
            obfuscation: ObfuscationType::from_byte(frame[5]),
        })
    }

    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.put_u16_le(self.length);
        dst.put_u16_le(self.id);
        dst.put_u8(self.reserved);
        dst.put_u8(self.obfuscation.as_byte());
    }
}

/// A decoded frame: header fields plus the (de-obfuscated) payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub length: u16,
    pub id: u16,
    pub reserved: u8,
    pub obfuscation: ObfuscationType,
    pub payload: Bytes,
}

impl Packet {
    pub fn header(&self) -> PacketHeader {
        PacketHeader {
            length: self.length,
            id: self.id,
            reserved: self.reserved,
            obfuscation: self.obfuscation,
        }
    }

    /// Header followed by the payload exactly as held by this packet.
    ///
    /// Schema offsets are frame-absolute, so the codec reads from this buffer
    /// starting at [`HEADER_SIZE`].
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        self.header().write_to(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_parse_header_plain() {
        let frame = [0x0A, 0x00, 0x01, 0x00, 0x00, 0x00, 0xDE, 0xAD, 0xBE, 0xEF];
        let header = PacketHeader::parse(&frame).unwrap();
        assert_eq!(header.length, 10);
        assert_eq!(header.id, 1);
        assert_eq!(header.reserved, 0);
        assert_eq!(header.obfuscation, ObfuscationType::Plain);
    }

    #[test]
    fn test_short_header_rejected() {
        assert!(matches!(
            PacketHeader::parse(&[0x06, 0x00, 0x01]),
            Err(ProtocolError::InvalidHeader)
        ));
    }

    #[test]
    fn test_obfuscation_byte_mapping() {
        assert_eq!(ObfuscationType::from_byte(0), ObfuscationType::Plain);
        assert_eq!(ObfuscationType::from_byte(1), ObfuscationType::Xor);
        assert_eq!(ObfuscationType::from_byte(2), ObfuscationType::Other(2));
        assert_eq!(ObfuscationType::Other(9).as_byte(), 9);
    }

    #[test]
    fn test_packet_to_bytes_rebuilds_frame() {
        let packet = Packet {
            length: 8,
            id: 0x0203,
            reserved: 0,
            obfuscation: ObfuscationType::Xor,
            payload: Bytes::from_static(&[0xAA, 0xBB]),
        };
        assert_eq!(
            packet.to_bytes().as_ref(),
            &[0x08, 0x00, 0x03, 0x02, 0x00, 0x01, 0xAA, 0xBB]
        );
    }
}
