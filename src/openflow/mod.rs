//! OpenFlow 1.3 wire codec (the subset a learning/NAT controller needs)
//!
//! Layout follows the OpenFlow Switch Specification 1.3.x. Every message is
//! an 8-byte header followed by a type-specific body; multi-byte fields are
//! big-endian.

pub mod flow;
pub mod message;

pub use flow::{Action, FlowMatch, FlowRule};
pub use message::{Message, PacketIn, PacketOut, PacketPayload, PortDesc, SwitchFeatures};

use crate::{Error, Result};
use std::fmt;

/// Protocol version spoken by this controller
pub const OFP_VERSION: u8 = 0x04;

/// Size of `ofp_header`
pub const HEADER_LEN: usize = 8;

/// Buffer id meaning "the full frame is carried in the message"
pub const OFP_NO_BUFFER: u32 = 0xffff_ffff;

/// Switch port number
pub type PortNo = u32;

/// Reserved port numbers
pub mod port {
    use super::PortNo;

    /// Maximum number of physical and logical switch ports
    pub const MAX: PortNo = 0xffff_ff00;
    pub const IN_PORT: PortNo = 0xffff_fff8;
    pub const FLOOD: PortNo = 0xffff_fffb;
    pub const ALL: PortNo = 0xffff_fffc;
    pub const CONTROLLER: PortNo = 0xffff_fffd;
    pub const ANY: PortNo = 0xffff_ffff;
}

/// `max_len` values for output-to-controller actions
pub mod controller_max_len {
    /// Largest value that still asks the switch to buffer
    pub const MAX: u16 = 0xffe5;
    /// Send the whole frame, never buffer it
    pub const NO_BUFFER: u16 = 0xffff;
}

/// Message type codes
pub mod msg_type {
    pub const HELLO: u8 = 0;
    pub const ERROR: u8 = 1;
    pub const ECHO_REQUEST: u8 = 2;
    pub const ECHO_REPLY: u8 = 3;
    pub const FEATURES_REQUEST: u8 = 5;
    pub const FEATURES_REPLY: u8 = 6;
    pub const PACKET_IN: u8 = 10;
    pub const PACKET_OUT: u8 = 13;
    pub const FLOW_MOD: u8 = 14;
    pub const MULTIPART_REQUEST: u8 = 18;
    pub const MULTIPART_REPLY: u8 = 19;
}

/// 64-bit switch identity reported in FEATURES_REPLY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatapathId(pub u64);

impl fmt::Display for DatapathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for DatapathId {
    fn from(value: u64) -> Self {
        DatapathId(value)
    }
}

/// `ofp_header`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub msg_type: u8,
    pub length: u16,
    pub xid: u32,
}

impl Header {
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < HEADER_LEN {
            return Err(Error::Protocol("header too short".into()));
        }

        let header = Self {
            version: buffer[0],
            msg_type: buffer[1],
            length: u16::from_be_bytes([buffer[2], buffer[3]]),
            xid: u32::from_be_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]),
        };

        if (header.length as usize) < HEADER_LEN {
            return Err(Error::Protocol(format!(
                "message length {} below header size",
                header.length
            )));
        }

        Ok(header)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.version;
        buf[1] = self.msg_type;
        buf[2..4].copy_from_slice(&self.length.to_be_bytes());
        buf[4..8].copy_from_slice(&self.xid.to_be_bytes());
        buf
    }

    /// Length of the body that follows the header
    pub fn body_len(&self) -> usize {
        self.length as usize - HEADER_LEN
    }
}

/// Round `len` up to the next multiple of 8
pub(crate) fn pad8(len: usize) -> usize {
    len.div_ceil(8) * 8
}

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

pub(crate) fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_parse() {
        let data = [0x04, 0x0a, 0x00, 0x20, 0x00, 0x00, 0x00, 0x07];
        let header = Header::parse(&data).unwrap();

        assert_eq!(header.version, OFP_VERSION);
        assert_eq!(header.msg_type, msg_type::PACKET_IN);
        assert_eq!(header.length, 32);
        assert_eq!(header.xid, 7);
        assert_eq!(header.body_len(), 24);
        assert_eq!(header.to_bytes(), data);
    }

    #[test]
    fn test_header_rejects_short_length() {
        let data = [0x04, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00];
        assert!(Header::parse(&data).is_err());
        assert!(Header::parse(&data[..4]).is_err());
    }

    #[test]
    fn test_pad8() {
        assert_eq!(pad8(0), 0);
        assert_eq!(pad8(4), 8);
        assert_eq!(pad8(8), 8);
        assert_eq!(pad8(22), 24);
    }

    #[test]
    fn test_datapath_id_display() {
        assert_eq!(DatapathId(2).to_string(), "2");
    }
}
