//! IPv4 protocol - RFC 791

use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Minimum IPv4 header size (without options)
pub const MIN_HEADER_SIZE: usize = 20;

/// IPv4 protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    Icmp = 1,
    Tcp = 6,
    Udp = 17,
}

impl Protocol {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Protocol::Icmp),
            6 => Some(Protocol::Tcp),
            17 => Some(Protocol::Udp),
            _ => None,
        }
    }
}

/// Validate version/IHL and return the header length in bytes.
fn header_len(buffer: &[u8]) -> Result<usize> {
    if buffer.len() < MIN_HEADER_SIZE {
        return Err(Error::Parse("IPv4 header too short".into()));
    }

    if buffer[0] >> 4 != 4 {
        return Err(Error::Parse("not an IPv4 packet".into()));
    }

    let header_len = (buffer[0] & 0x0F) as usize * 4;
    if header_len < MIN_HEADER_SIZE || buffer.len() < header_len {
        return Err(Error::Parse("IPv4 header truncated".into()));
    }

    Ok(header_len)
}

/// Parsed IPv4 header (zero-copy reference)
#[derive(Debug)]
pub struct Ipv4Header<'a> {
    buffer: &'a [u8],
    header_len: usize,
}

impl<'a> Ipv4Header<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        let header_len = header_len(buffer)?;
        Ok(Self { buffer, header_len })
    }

    /// Header plus payload length in bytes
    pub fn total_length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn ttl(&self) -> u8 {
        self.buffer[8]
    }

    /// Protocol number of the payload
    pub fn protocol(&self) -> u8 {
        self.buffer[9]
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[12],
            self.buffer[13],
            self.buffer[14],
            self.buffer[15],
        )
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[16],
            self.buffer[17],
            self.buffer[18],
            self.buffer[19],
        )
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    fn end(&self) -> usize {
        (self.total_length() as usize).clamp(self.header_len, self.buffer.len())
    }

    /// Payload bounded by the total length field when it is consistent
    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[self.header_len..self.end()]
    }

    /// Header plus payload, without any link-layer padding
    pub fn packet_bytes(&self) -> &'a [u8] {
        &self.buffer[..self.end()]
    }

    /// Validate header checksum
    pub fn validate_checksum(&self) -> bool {
        checksum(&self.buffer[..self.header_len]) == 0
    }
}

/// Internet checksum (RFC 1071) over `data`
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    for chunk in data.chunks(2) {
        let word = match *chunk {
            [hi, lo] => u16::from_be_bytes([hi, lo]),
            [hi] => u16::from_be_bytes([hi, 0]),
            _ => 0,
        };
        sum = sum.wrapping_add(word as u32);
    }

    // Fold 32-bit sum to 16 bits
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Owned IPv4 packet for header rewriting
///
/// Address setters leave the header checksum stale; call
/// [`Ipv4Packet::update_checksum`] (or [`Ipv4Packet::into_bytes`]) once all
/// edits are done.
#[derive(Debug, Clone)]
pub struct Ipv4Packet {
    buffer: Vec<u8>,
    header_len: usize,
}

impl Ipv4Packet {
    /// Copy `data` into a mutable packet
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let header_len = header_len(data)?;
        Ok(Self {
            buffer: data.to_vec(),
            header_len,
        })
    }

    /// Set source address (checksum left stale)
    pub fn set_src_addr(&mut self, addr: Ipv4Addr) {
        self.buffer[12..16].copy_from_slice(&addr.octets());
    }

    /// Set destination address (checksum left stale)
    pub fn set_dst_addr(&mut self, addr: Ipv4Addr) {
        self.buffer[16..20].copy_from_slice(&addr.octets());
    }

    /// Get payload
    pub fn payload(&self) -> &[u8] {
        &self.buffer[self.header_len..]
    }

    /// Get mutable payload
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[self.header_len..]
    }

    /// Recalculate the header checksum
    pub fn update_checksum(&mut self) {
        // Zero out checksum field first
        self.buffer[10] = 0;
        self.buffer[11] = 0;

        let sum = checksum(&self.buffer[..self.header_len]);
        self.buffer[10..12].copy_from_slice(&sum.to_be_bytes());
    }

    /// Finalize the header checksum and return the wire bytes
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.update_checksum();
        self.buffer
    }
}

/// Builder for IPv4 packets without options
#[derive(Debug, Clone)]
pub struct Ipv4Builder {
    identification: u16,
    ttl: u8,
    protocol: u8,
    src_addr: Ipv4Addr,
    dst_addr: Ipv4Addr,
    payload: Vec<u8>,
}

impl Ipv4Builder {
    pub fn new() -> Self {
        Self {
            identification: 0,
            ttl: 64,
            protocol: 0,
            src_addr: Ipv4Addr::UNSPECIFIED,
            dst_addr: Ipv4Addr::UNSPECIFIED,
            payload: Vec::new(),
        }
    }

    pub fn identification(mut self, id: u16) -> Self {
        self.identification = id;
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn src_addr(mut self, addr: Ipv4Addr) -> Self {
        self.src_addr = addr;
        self
    }

    pub fn dst_addr(mut self, addr: Ipv4Addr) -> Self {
        self.dst_addr = addr;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let total_length = (MIN_HEADER_SIZE + self.payload.len()) as u16;
        let mut buffer = vec![0u8; MIN_HEADER_SIZE + self.payload.len()];

        // Version (4) + IHL (5 = 20 bytes, no options)
        buffer[0] = 0x45;
        // DSCP + ECN left at 0
        // Total length
        buffer[2..4].copy_from_slice(&total_length.to_be_bytes());
        // Identification
        buffer[4..6].copy_from_slice(&self.identification.to_be_bytes());
        // Flags (DF) + Fragment offset
        buffer[6..8].copy_from_slice(&0x4000u16.to_be_bytes());
        // TTL
        buffer[8] = self.ttl;
        // Protocol
        buffer[9] = self.protocol;
        // Source address
        buffer[12..16].copy_from_slice(&self.src_addr.octets());
        // Destination address
        buffer[16..20].copy_from_slice(&self.dst_addr.octets());
        // Payload
        buffer[MIN_HEADER_SIZE..].copy_from_slice(&self.payload);

        // Checksum (field is still zero)
        let sum = checksum(&buffer[..MIN_HEADER_SIZE]);
        buffer[10..12].copy_from_slice(&sum.to_be_bytes());

        buffer
    }
}

impl Default for Ipv4Builder {
    fn default() -> Self {
        Self::new()
    }
}
