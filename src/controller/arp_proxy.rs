//! Proxy ARP on the gateway switch
//!
//! The gateway answers every ARP request from either subnet with the MAC of
//! the port facing the requester, whatever address was asked for, so hosts
//! on both sides send their traffic to the gateway.

use super::{Datapath, GatewayState, require_port_mac};
use crate::Result;
use crate::openflow::{PacketOut, PortNo, port};
use crate::protocol::arp::ArpPacket;
use crate::protocol::ethernet::FrameBuilder;
use crate::protocol::{EtherType, MacAddr};
use std::net::Ipv4Addr;
use tracing::{debug, trace};

/// Result of processing an ARP packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpAction {
    /// Reply or request from an address outside both subnets
    None,
    /// Reply sent out of this port
    Replied { port: PortNo },
    /// ARP reply; only the tables were updated
    TableUpdated,
}

/// Ethernet frame carrying the gateway's answer to `request`
pub fn build_proxy_reply(request: &ArpPacket, port_mac: MacAddr) -> Vec<u8> {
    let reply = ArpPacket::reply(
        port_mac,
        request.target_ip,
        request.sender_mac,
        request.sender_ip,
    );

    FrameBuilder::new()
        .dst_mac(request.sender_mac)
        .src_mac(port_mac)
        .ethertype(EtherType::Arp as u16)
        .payload(&reply.to_bytes())
        .build()
}

/// Broadcast ARP request asking who owns `target_ip`
pub fn build_probe(
    eth_src: MacAddr,
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_ip: Ipv4Addr,
) -> Vec<u8> {
    let request = ArpPacket::request(sender_mac, sender_ip, target_ip);

    FrameBuilder::new()
        .dst_mac(MacAddr::BROADCAST)
        .src_mac(eth_src)
        .ethertype(EtherType::Arp as u16)
        .payload(&request.to_bytes())
        .build()
}

/// Learn the sender, then answer requests from either subnet
pub fn process_arp(
    state: &mut GatewayState,
    datapath: &mut dyn Datapath,
    packet: &ArpPacket,
) -> Result<ArpAction> {
    if state.addresses.learn(packet.sender_ip, packet.sender_mac) {
        debug!(ip = %packet.sender_ip, mac = %packet.sender_mac, "address learned");
    }
    if let Some((probes, waited)) = state.pending.resolve(packet.sender_ip) {
        debug!(ip = %packet.sender_ip, probes, ?waited, "resolution completed");
    }

    if !packet.is_request() {
        return Ok(ArpAction::TableUpdated);
    }

    let Some(side) = state.settings.side_of(packet.sender_ip) else {
        trace!(sender = %packet.sender_ip, "ARP request from outside both subnets");
        return Ok(ArpAction::None);
    };

    let out_port = state.settings.port(side);
    let port_mac = require_port_mac(datapath, out_port)?;

    debug!(
        sender = %packet.sender_ip,
        target = %packet.target_ip,
        out_port,
        "proxy ARP reply"
    );
    datapath.send(PacketOut::frame(
        port::CONTROLLER,
        out_port,
        build_proxy_reply(packet, port_mac),
    ));
    state.metrics.arp_replies_sent.inc();

    Ok(ArpAction::Replied { port: out_port })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::controller::testing::{
        INSIDE_PORT_MAC, OUTSIDE_PORT_MAC, RecordingDatapath, gateway_datapath,
    };
    use crate::openflow::DatapathId;
    use crate::protocol::ParsedPacket;
    use crate::protocol::arp::ArpOp;

    const H1: MacAddr = MacAddr([0x00, 0x00, 0x00, 0x00, 0x00, 0x01]);
    const H4: MacAddr = MacAddr([0x00, 0x00, 0x00, 0x00, 0x00, 0x04]);

    fn h1_asks_for(target: Ipv4Addr) -> ArpPacket {
        ArpPacket::request(H1, Ipv4Addr::new(5, 5, 0, 1), target)
    }

    #[test]
    fn test_inside_request_answered_on_inside_port() {
        let mut state = GatewayState::default();
        let mut dp = gateway_datapath();
        let request = h1_asks_for(Ipv4Addr::new(5, 5, 1, 4));

        let action = process_arp(&mut state, &mut dp, &request).unwrap();

        assert_eq!(action, ArpAction::Replied { port: 1 });
        assert_eq!(dp.sent.len(), 1);
        let out = &dp.sent[0];
        assert_eq!(out.in_port, port::CONTROLLER);
        assert_eq!(out.out_ports().collect::<Vec<_>>(), vec![1]);

        let data = out.data().unwrap();
        let reply = ParsedPacket::parse(data).unwrap();
        assert_eq!(reply.src_mac(), INSIDE_PORT_MAC);
        assert_eq!(reply.dst_mac(), H1);
        let arp = reply.arp.unwrap();
        assert_eq!(arp.operation, ArpOp::Reply);
        assert_eq!(arp.sender_mac, INSIDE_PORT_MAC);
        assert_eq!(arp.sender_ip, Ipv4Addr::new(5, 5, 1, 4));
        assert_eq!(arp.target_mac, H1);
        assert_eq!(arp.target_ip, Ipv4Addr::new(5, 5, 0, 1));
    }

    #[test]
    fn test_outside_request_answered_on_outside_port() {
        let mut state = GatewayState::default();
        let mut dp = gateway_datapath();
        let request = ArpPacket::request(H4, Ipv4Addr::new(5, 5, 1, 4), Ipv4Addr::new(5, 5, 1, 0));

        let action = process_arp(&mut state, &mut dp, &request).unwrap();

        assert_eq!(action, ArpAction::Replied { port: 2 });
        let reply = ParsedPacket::parse(dp.sent[0].data().unwrap()).unwrap();
        assert_eq!(reply.src_mac(), OUTSIDE_PORT_MAC);
        let arp = reply.arp.unwrap();
        assert_eq!(arp.sender_mac, OUTSIDE_PORT_MAC);
        assert_eq!(arp.sender_ip, Ipv4Addr::new(5, 5, 1, 0));
    }

    #[test]
    fn test_request_from_unknown_subnet_is_not_answered() {
        let mut state = GatewayState::default();
        let mut dp = gateway_datapath();
        let request = ArpPacket::request(H4, Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(5, 5, 0, 1));

        let action = process_arp(&mut state, &mut dp, &request).unwrap();

        assert_eq!(action, ArpAction::None);
        assert!(dp.sent.is_empty());
        // Sender still learned
        assert_eq!(state.addresses.lookup(Ipv4Addr::new(10, 0, 0, 1)), Some(H4));
    }

    #[test]
    fn test_reply_only_updates_tables() {
        let mut state = GatewayState::default();
        let mut dp = gateway_datapath();
        let h4_ip = Ipv4Addr::new(5, 5, 1, 4);
        state.pending.mark(h4_ip);

        let reply = ArpPacket::reply(H4, h4_ip, OUTSIDE_PORT_MAC, Ipv4Addr::new(5, 5, 1, 0));
        let action = process_arp(&mut state, &mut dp, &reply).unwrap();

        assert_eq!(action, ArpAction::TableUpdated);
        assert_eq!(state.addresses.lookup(h4_ip), Some(H4));
        assert!(!state.pending.contains(h4_ip));
        assert!(dp.sent.is_empty());
    }

    #[test]
    fn test_address_table_is_write_once() {
        let mut state = GatewayState::default();
        let mut dp = gateway_datapath();
        let ip = Ipv4Addr::new(5, 5, 0, 1);

        process_arp(&mut state, &mut dp, &ArpPacket::request(H1, ip, ip)).unwrap();
        process_arp(&mut state, &mut dp, &ArpPacket::request(H4, ip, ip)).unwrap();

        assert_eq!(state.addresses.lookup(ip), Some(H1));
    }

    #[test]
    fn test_missing_port_address_is_an_error() {
        let mut state = GatewayState::default();
        let mut dp = RecordingDatapath::new(DatapathId(2));

        let err = process_arp(&mut state, &mut dp, &h1_asks_for(Ipv4Addr::new(5, 5, 1, 4)))
            .unwrap_err();

        assert!(matches!(err, Error::PortAddressUnknown { port: 1, .. }));
        assert!(dp.sent.is_empty());
    }

    #[test]
    fn test_build_probe() {
        let frame = build_probe(
            INSIDE_PORT_MAC,
            OUTSIDE_PORT_MAC,
            Ipv4Addr::new(5, 5, 1, 0),
            Ipv4Addr::new(5, 5, 1, 4),
        );
        let pkt = ParsedPacket::parse(&frame).unwrap();

        assert!(pkt.dst_mac().is_broadcast());
        assert_eq!(pkt.src_mac(), INSIDE_PORT_MAC);
        let arp = pkt.arp.unwrap();
        assert!(arp.is_request());
        assert_eq!(arp.sender_mac, OUTSIDE_PORT_MAC);
        assert_eq!(arp.target_mac, MacAddr::ZERO);
        assert_eq!(arp.target_ip, Ipv4Addr::new(5, 5, 1, 4));
    }
}
