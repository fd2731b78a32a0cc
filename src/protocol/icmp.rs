//! ICMP (Internet Control Message Protocol) - RFC 792, echo messages

use super::ipv4::checksum;
use crate::{Error, Result};

/// ICMP header size (minimum)
pub const ICMP_HEADER_SIZE: usize = 8;

/// ICMP message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IcmpType {
    EchoReply = 0,
    DestinationUnreachable = 3,
    EchoRequest = 8,
    TimeExceeded = 11,
}

impl IcmpType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(IcmpType::EchoReply),
            3 => Some(IcmpType::DestinationUnreachable),
            8 => Some(IcmpType::EchoRequest),
            11 => Some(IcmpType::TimeExceeded),
            _ => None,
        }
    }
}

/// Parsed ICMP message
#[derive(Debug)]
pub struct IcmpPacket<'a> {
    buffer: &'a [u8],
}

impl<'a> IcmpPacket<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < ICMP_HEADER_SIZE {
            return Err(Error::Parse("ICMP packet too short".into()));
        }

        Ok(Self { buffer })
    }

    pub fn icmp_type(&self) -> u8 {
        self.buffer[0]
    }

    pub fn code(&self) -> u8 {
        self.buffer[1]
    }

    /// For Echo Request/Reply: identifier
    pub fn identifier(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    /// For Echo Request/Reply: sequence number
    pub fn sequence(&self) -> u16 {
        u16::from_be_bytes([self.buffer[6], self.buffer[7]])
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[ICMP_HEADER_SIZE..]
    }

    pub fn is_echo_request(&self) -> bool {
        self.icmp_type() == IcmpType::EchoRequest as u8
    }

    pub fn is_echo_reply(&self) -> bool {
        self.icmp_type() == IcmpType::EchoReply as u8
    }

    /// Validate the ICMP checksum
    pub fn validate_checksum(&self) -> bool {
        icmp_checksum(self.buffer) == 0
    }
}

/// ICMP checksum covers the whole message
pub fn icmp_checksum(data: &[u8]) -> u16 {
    checksum(data)
}

/// Mutable ICMP packet for identifier rewriting
#[derive(Debug, Clone)]
pub struct IcmpMutablePacket {
    buffer: Vec<u8>,
}

impl IcmpMutablePacket {
    /// Create from raw bytes (copies the data)
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < ICMP_HEADER_SIZE {
            return Err(Error::Parse("ICMP packet too short".into()));
        }

        Ok(Self {
            buffer: data.to_vec(),
        })
    }

    /// Set identifier and update checksum
    pub fn set_identifier(&mut self, id: u16) {
        self.buffer[4..6].copy_from_slice(&id.to_be_bytes());
        self.update_checksum();
    }

    /// Recalculate the checksum over the whole message
    pub fn update_checksum(&mut self) {
        // Zero out checksum field first
        self.buffer[2] = 0;
        self.buffer[3] = 0;

        let sum = icmp_checksum(&self.buffer);
        self.buffer[2..4].copy_from_slice(&sum.to_be_bytes());
    }

    /// Consume and return the buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Builder for ICMP Echo Request/Reply messages
#[derive(Debug, Clone)]
pub struct EchoBuilder {
    icmp_type: IcmpType,
    identifier: u16,
    sequence: u16,
    payload: Vec<u8>,
}

impl EchoBuilder {
    pub fn request(identifier: u16, sequence: u16) -> Self {
        Self {
            icmp_type: IcmpType::EchoRequest,
            identifier,
            sequence,
            payload: Vec::new(),
        }
    }

    pub fn reply(identifier: u16, sequence: u16) -> Self {
        Self {
            icmp_type: IcmpType::EchoReply,
            identifier,
            sequence,
            payload: Vec::new(),
        }
    }

    pub fn payload(mut self, data: &[u8]) -> Self {
        self.payload = data.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut packet = vec![0u8; ICMP_HEADER_SIZE + self.payload.len()];

        // Type (code stays 0)
        packet[0] = self.icmp_type as u8;
        // Identifier
        packet[4..6].copy_from_slice(&self.identifier.to_be_bytes());
        // Sequence number
        packet[6..8].copy_from_slice(&self.sequence.to_be_bytes());
        // Payload
        packet[ICMP_HEADER_SIZE..].copy_from_slice(&self.payload);

        // Checksum over the whole message
        let sum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());

        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icmp_type_from_u8() {
        assert_eq!(IcmpType::from_u8(0), Some(IcmpType::EchoReply));
        assert_eq!(IcmpType::from_u8(8), Some(IcmpType::EchoRequest));
        assert_eq!(IcmpType::from_u8(13), None);
    }

    #[test]
    fn test_parse_echo_request() {
        let data = EchoBuilder::request(0x1234, 7).payload(b"ping").build();
        let pkt = IcmpPacket::parse(&data).unwrap();

        assert!(pkt.is_echo_request());
        assert!(!pkt.is_echo_reply());
        assert_eq!(pkt.code(), 0);
        assert_eq!(pkt.identifier(), 0x1234);
        assert_eq!(pkt.sequence(), 7);
        assert_eq!(pkt.payload(), b"ping");
        assert!(pkt.validate_checksum());
    }

    #[test]
    fn test_parse_too_short() {
        assert!(IcmpPacket::parse(&[8, 0, 0, 0, 0, 1, 0]).is_err());
        assert!(IcmpMutablePacket::from_bytes(&[0u8; 4]).is_err());
    }

    #[test]
    fn test_set_identifier_updates_checksum() {
        let data = EchoBuilder::reply(42, 3).payload(&[1, 2, 3]).build();
        let mut pkt = IcmpMutablePacket::from_bytes(&data).unwrap();

        pkt.set_identifier(1);
        let bytes = pkt.into_bytes();

        let parsed = IcmpPacket::parse(&bytes).unwrap();
        assert_eq!(parsed.identifier(), 1);
        assert_eq!(parsed.sequence(), 3);
        assert!(parsed.is_echo_reply());
        assert!(parsed.validate_checksum());
        assert_eq!(parsed.payload(), &[1, 2, 3]);
    }

    #[test]
    fn test_checksum_known_value() {
        // Echo request, id 1, seq 1, no payload
        let data = EchoBuilder::request(1, 1).build();
        assert_eq!(u16::from_be_bytes([data[2], data[3]]), 0xf7fd);
    }
}
