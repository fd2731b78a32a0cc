//! In-memory datapath and frame helpers for exercising handlers without a
//! switch connection

use super::Datapath;
use crate::openflow::{DatapathId, FlowRule, PacketIn, PacketOut, PortNo};
use crate::protocol::arp::ArpPacket;
use crate::protocol::ethernet::FrameBuilder;
use crate::protocol::icmp::{EchoBuilder, IcmpType};
use crate::protocol::ipv4::{Ipv4Builder, Protocol};
use crate::protocol::{EtherType, MacAddr};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Hardware address of gateway port 1 in [`gateway_datapath`]
pub const INSIDE_PORT_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x02, 0x01]);

/// Hardware address of gateway port 2 in [`gateway_datapath`]
pub const OUTSIDE_PORT_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x02, 0x02]);

/// Datapath that records everything sent to it
#[derive(Debug, Clone)]
pub struct RecordingDatapath {
    id: DatapathId,
    ports: HashMap<PortNo, MacAddr>,
    pub rules: Vec<FlowRule>,
    pub sent: Vec<PacketOut>,
}

impl RecordingDatapath {
    pub fn new(id: DatapathId) -> Self {
        Self {
            id,
            ports: HashMap::new(),
            rules: Vec::new(),
            sent: Vec::new(),
        }
    }

    pub fn with_port(mut self, port: PortNo, mac: MacAddr) -> Self {
        self.ports.insert(port, mac);
        self
    }

    /// Forget recorded rules and packets
    pub fn clear(&mut self) {
        self.rules.clear();
        self.sent.clear();
    }
}

impl Datapath for RecordingDatapath {
    fn id(&self) -> DatapathId {
        self.id
    }

    fn install_rule(&mut self, rule: FlowRule) {
        self.rules.push(rule);
    }

    fn send(&mut self, packet: PacketOut) {
        self.sent.push(packet);
    }

    fn port_mac(&self, port: PortNo) -> Option<MacAddr> {
        self.ports.get(&port).copied()
    }
}

/// Switch 1 with no known port addresses
pub fn host_datapath() -> RecordingDatapath {
    RecordingDatapath::new(DatapathId(1))
}

/// Switch 2 with both gateway ports described
pub fn gateway_datapath() -> RecordingDatapath {
    RecordingDatapath::new(DatapathId(2))
        .with_port(1, INSIDE_PORT_MAC)
        .with_port(2, OUTSIDE_PORT_MAC)
}

/// Complete, unbuffered packet-in
pub fn packet_in(in_port: PortNo, buffer_id: Option<u32>, data: &[u8]) -> PacketIn {
    PacketIn {
        buffer_id,
        total_len: data.len() as u16,
        reason: 0,
        table_id: 0,
        cookie: 0,
        in_port,
        data: data.to_vec(),
    }
}

/// Ethernet frame carrying `arp`, addressed at the Ethernet layer to `dst`
pub fn arp_frame(arp: &ArpPacket, dst: MacAddr) -> Vec<u8> {
    FrameBuilder::new()
        .dst_mac(dst)
        .src_mac(arp.sender_mac)
        .ethertype(EtherType::Arp as u16)
        .payload(&arp.to_bytes())
        .build()
}

/// Ethernet/IPv4/ICMP frame with an echo-style header of the given type
pub fn echo_frame(
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    icmp_type: IcmpType,
    identifier: u16,
    sequence: u16,
) -> Vec<u8> {
    let mut icmp = EchoBuilder::request(identifier, sequence)
        .payload(b"abcdefghijklmnop")
        .build();
    icmp[0] = icmp_type as u8;
    icmp[2..4].fill(0);
    let sum = crate::protocol::icmp::icmp_checksum(&icmp);
    icmp[2..4].copy_from_slice(&sum.to_be_bytes());

    let ip = Ipv4Builder::new()
        .identification(0x1c46)
        .protocol(Protocol::Icmp as u8)
        .src_addr(src_ip)
        .dst_addr(dst_ip)
        .payload(&icmp)
        .build();

    FrameBuilder::new()
        .dst_mac(dst_mac)
        .src_mac(src_mac)
        .ethertype(EtherType::Ipv4 as u16)
        .payload(&ip)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ParsedPacket;

    #[test]
    fn test_echo_frame_is_valid() {
        let frame = echo_frame(
            MacAddr([0, 0, 0, 0, 0, 1]),
            INSIDE_PORT_MAC,
            Ipv4Addr::new(5, 5, 0, 1),
            Ipv4Addr::new(5, 5, 1, 4),
            IcmpType::EchoReply,
            7,
            3,
        );
        let packet = ParsedPacket::parse(&frame).unwrap();
        let ip = packet.ipv4.as_ref().unwrap();
        assert!(ip.validate_checksum());
        let icmp = packet.icmp.as_ref().unwrap();
        assert!(icmp.is_echo_reply());
        assert!(icmp.validate_checksum());
        assert_eq!(icmp.identifier(), 7);
    }

    #[test]
    fn test_gateway_datapath_ports() {
        let dp = gateway_datapath();
        assert_eq!(dp.id(), DatapathId(2));
        assert_eq!(dp.port_mac(1), Some(INSIDE_PORT_MAC));
        assert_eq!(dp.port_mac(2), Some(OUTSIDE_PORT_MAC));
        assert_eq!(dp.port_mac(3), None);
    }
}
