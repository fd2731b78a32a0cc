//! Packet codecs for the frames the controller inspects and rewrites
//!
//! Only Ethernet II, ARP, IPv4 and ICMP echo are understood. Anything else
//! decodes to a [`ParsedPacket`] with no upper layers.

pub mod arp;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod types;

pub use types::*;

use crate::Result;
use arp::ArpPacket;
use ethernet::Frame;
use icmp::IcmpPacket;
use ipv4::{Ipv4Header, Protocol};

/// Layer view of one Ethernet frame
///
/// Upper layers that fail to parse are simply absent; only a frame shorter
/// than an Ethernet header is an error.
#[derive(Debug)]
pub struct ParsedPacket<'a> {
    pub frame: Frame<'a>,
    pub arp: Option<ArpPacket>,
    pub ipv4: Option<Ipv4Header<'a>>,
    pub icmp: Option<IcmpPacket<'a>>,
}

impl<'a> ParsedPacket<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let frame = Frame::parse(data)?;
        let mut parsed = Self {
            frame,
            arp: None,
            ipv4: None,
            icmp: None,
        };

        match EtherType::from_u16(parsed.frame.ethertype()) {
            Some(EtherType::Arp) => {
                parsed.arp = ArpPacket::parse(parsed.frame.payload()).ok();
            }
            Some(EtherType::Ipv4) => {
                if let Ok(hdr) = Ipv4Header::parse(parsed.frame.payload()) {
                    if Protocol::from_u8(hdr.protocol()) == Some(Protocol::Icmp) {
                        parsed.icmp = IcmpPacket::parse(hdr.payload()).ok();
                    }
                    parsed.ipv4 = Some(hdr);
                }
            }
            None => {}
        }

        Ok(parsed)
    }

    pub fn src_mac(&self) -> MacAddr {
        self.frame.src_mac()
    }

    pub fn dst_mac(&self) -> MacAddr {
        self.frame.dst_mac()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ethernet::FrameBuilder;
    use crate::protocol::icmp::EchoBuilder;
    use crate::protocol::ipv4::Ipv4Builder;
    use std::net::Ipv4Addr;

    const HOST: MacAddr = MacAddr([0x00, 0x00, 0x00, 0x00, 0x00, 0x01]);

    #[test]
    fn test_parse_arp_frame() {
        let arp = ArpPacket::request(HOST, Ipv4Addr::new(5, 5, 0, 1), Ipv4Addr::new(5, 5, 1, 4));
        let data = FrameBuilder::new()
            .dst_mac(MacAddr::BROADCAST)
            .src_mac(HOST)
            .ethertype(EtherType::Arp as u16)
            .payload(&arp.to_bytes())
            .build();

        let pkt = ParsedPacket::parse(&data).unwrap();
        assert_eq!(pkt.src_mac(), HOST);
        assert!(pkt.dst_mac().is_broadcast());
        assert_eq!(pkt.arp, Some(arp));
        assert!(pkt.ipv4.is_none());
        assert!(pkt.icmp.is_none());
    }

    #[test]
    fn test_parse_icmp_frame() {
        let icmp = EchoBuilder::request(9, 1).payload(b"abc").build();
        let ip = Ipv4Builder::new()
            .protocol(Protocol::Icmp as u8)
            .src_addr(Ipv4Addr::new(5, 5, 0, 1))
            .dst_addr(Ipv4Addr::new(5, 5, 1, 4))
            .payload(&icmp)
            .build();
        let data = FrameBuilder::new()
            .dst_mac(MacAddr([0x02, 0, 0, 0, 0, 0x01]))
            .src_mac(HOST)
            .ethertype(EtherType::Ipv4 as u16)
            .payload(&ip)
            .build();

        let pkt = ParsedPacket::parse(&data).unwrap();
        let hdr = pkt.ipv4.as_ref().unwrap();
        assert_eq!(hdr.src_addr(), Ipv4Addr::new(5, 5, 0, 1));
        assert_eq!(hdr.packet_bytes(), ip.as_slice());
        let echo = pkt.icmp.as_ref().unwrap();
        assert!(echo.is_echo_request());
        assert_eq!(echo.identifier(), 9);
    }

    #[test]
    fn test_parse_udp_has_no_icmp_layer() {
        let ip = Ipv4Builder::new()
            .protocol(Protocol::Udp as u8)
            .payload(&[0u8; 8])
            .build();
        let data = FrameBuilder::new()
            .ethertype(EtherType::Ipv4 as u16)
            .payload(&ip)
            .build();

        let pkt = ParsedPacket::parse(&data).unwrap();
        assert!(pkt.ipv4.is_some());
        assert!(pkt.icmp.is_none());
    }

    #[test]
    fn test_parse_unknown_ethertype() {
        let data = FrameBuilder::new().ethertype(0x86dd).payload(&[0u8; 40]).build();
        let pkt = ParsedPacket::parse(&data).unwrap();
        assert!(pkt.arp.is_none());
        assert!(pkt.ipv4.is_none());
    }

    #[test]
    fn test_parse_malformed_arp_is_ignored() {
        let data = FrameBuilder::new()
            .ethertype(EtherType::Arp as u16)
            .payload(&[0u8; 10])
            .build();
        let pkt = ParsedPacket::parse(&data).unwrap();
        assert!(pkt.arp.is_none());
    }

    #[test]
    fn test_parse_runt_frame() {
        assert!(ParsedPacket::parse(&[0u8; 6]).is_err());
    }
}
