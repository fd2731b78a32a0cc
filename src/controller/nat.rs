//! ICMP echo NAT between the inside subnet and one public address
//!
//! Each inside host gets a translation identifier the first time it pings
//! out. Outbound echo requests leave with the public address as source and
//! that identifier in the ICMP id field; replies carrying the identifier are
//! mapped back to the host and the host's own ICMP id.
//!
//! One session per host: a host only has one outstanding request, and a new
//! request replaces the remembered ICMP id. Identifiers are never reused.

use super::arp_proxy::build_probe;
use super::{Datapath, GatewayState, require_port_mac};
use crate::openflow::{PacketOut, PortNo, port};
use crate::protocol::ethernet::FrameBuilder;
use crate::protocol::icmp::{IcmpMutablePacket, IcmpPacket};
use crate::protocol::ipv4::{Ipv4Header, Ipv4Packet};
use crate::protocol::{EtherType, MacAddr, ParsedPacket};
use crate::{Error, Result};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::debug;

/// First translation identifier handed out
pub const FIRST_IDENTIFIER: u16 = 1;

/// Per-host translation state
#[derive(Debug)]
pub struct NatSessionTable {
    next_identifier: u32,
    /// Inside host -> translation identifier
    by_host: HashMap<Ipv4Addr, u16>,
    /// Translation identifier -> inside host
    by_identifier: HashMap<u16, Ipv4Addr>,
    /// Inside host -> ICMP id of its latest echo request
    original_ids: HashMap<Ipv4Addr, u16>,
}

impl Default for NatSessionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NatSessionTable {
    pub fn new() -> Self {
        Self {
            next_identifier: FIRST_IDENTIFIER as u32,
            by_host: HashMap::new(),
            by_identifier: HashMap::new(),
            original_ids: HashMap::new(),
        }
    }

    /// Translation identifier for `host`, allocating one on first use
    pub fn session_for(&mut self, host: Ipv4Addr) -> Result<u16> {
        if let Some(&id) = self.by_host.get(&host) {
            return Ok(id);
        }

        let id = u16::try_from(self.next_identifier).map_err(|_| Error::IdentifiersExhausted)?;
        self.next_identifier += 1;
        self.by_host.insert(host, id);
        self.by_identifier.insert(id, host);
        debug!(%host, identifier = id, "NAT session created");
        Ok(id)
    }

    pub fn record_original_id(&mut self, host: Ipv4Addr, icmp_id: u16) {
        self.original_ids.insert(host, icmp_id);
    }

    pub fn host_for(&self, identifier: u16) -> Option<Ipv4Addr> {
        self.by_identifier.get(&identifier).copied()
    }

    pub fn identifier_for(&self, host: Ipv4Addr) -> Option<u16> {
        self.by_host.get(&host).copied()
    }

    pub fn original_id(&self, host: Ipv4Addr) -> Option<u16> {
        self.original_ids.get(&host).copied()
    }

    /// Number of sessions (one per inside host)
    pub fn len(&self) -> usize {
        self.by_host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_host.is_empty()
    }
}

/// What happened to an ICMP message on the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatOutcome {
    /// Rewritten frame sent out of this port
    Translated { out_port: PortNo },
    /// Destination MAC unknown; a probe was sent and the packet dropped
    Unresolved { destination: Ipv4Addr },
    /// Not an echo request or reply
    Ignored,
}

/// Rewrite an IPv4/ICMP echo packet.
///
/// Sets the source and/or destination address and the ICMP identifier;
/// every other field is kept and both checksums are recomputed.
pub fn rewrite_echo(
    ip_packet: &[u8],
    src: Option<Ipv4Addr>,
    dst: Option<Ipv4Addr>,
    identifier: u16,
) -> Result<Vec<u8>> {
    let mut packet = Ipv4Packet::from_bytes(ip_packet)?;

    let mut icmp = IcmpMutablePacket::from_bytes(packet.payload())?;
    icmp.set_identifier(identifier);
    let icmp_bytes = icmp.into_bytes();
    packet.payload_mut()[..icmp_bytes.len()].copy_from_slice(&icmp_bytes);

    if let Some(src) = src {
        packet.set_src_addr(src);
    }
    if let Some(dst) = dst {
        packet.set_dst_addr(dst);
    }

    Ok(packet.into_bytes())
}

fn ipv4_frame(dst_mac: MacAddr, src_mac: MacAddr, ip_packet: &[u8]) -> Vec<u8> {
    FrameBuilder::new()
        .dst_mac(dst_mac)
        .src_mac(src_mac)
        .ethertype(EtherType::Ipv4 as u16)
        .payload(ip_packet)
        .build()
}

/// Translate an inside host's echo request toward the outside
pub fn translate_outbound(
    state: &mut GatewayState,
    datapath: &mut dyn Datapath,
    ip: &Ipv4Header<'_>,
    icmp: &IcmpPacket<'_>,
) -> Result<NatOutcome> {
    let host = ip.src_addr();
    let destination = ip.dst_addr();

    let identifier = state.nat.session_for(host)?;
    state.nat.record_original_id(host, icmp.identifier());
    debug!(
        %host,
        %destination,
        icmp_id = icmp.identifier(),
        identifier,
        "outbound echo request"
    );

    let settings = &state.settings;
    let dst_mac = match state.addresses.lookup(destination) {
        Some(mac) => mac,
        None => {
            let eth_src = require_port_mac(datapath, settings.inside_port)?;
            let sender_mac = require_port_mac(datapath, settings.outside_port)?;
            let probe = build_probe(eth_src, sender_mac, settings.public_addr, destination);
            datapath.send(PacketOut::frame(port::CONTROLLER, settings.outside_port, probe));

            let probes = state.pending.mark(destination);
            state.metrics.arp_probes_sent.inc();
            debug!(%destination, probes, "sent resolution probe");

            match state.addresses.lookup(destination) {
                Some(mac) => mac,
                None => {
                    state.metrics.nat_unresolved.inc();
                    debug!(%destination, "destination unresolved, dropping echo request");
                    return Ok(NatOutcome::Unresolved { destination });
                }
            }
        }
    };

    let src_mac = require_port_mac(datapath, settings.outside_port)?;
    let rewritten = rewrite_echo(
        ip.packet_bytes(),
        Some(settings.public_addr),
        None,
        identifier,
    )?;
    datapath.send(PacketOut::frame(
        port::CONTROLLER,
        settings.outside_port,
        ipv4_frame(dst_mac, src_mac, &rewritten),
    ));
    state.metrics.nat_outbound.inc();

    Ok(NatOutcome::Translated {
        out_port: settings.outside_port,
    })
}

/// Translate an echo reply back to the inside host that owns its identifier
pub fn translate_inbound(
    state: &mut GatewayState,
    datapath: &mut dyn Datapath,
    ip: &Ipv4Header<'_>,
    icmp: &IcmpPacket<'_>,
) -> Result<NatOutcome> {
    let identifier = icmp.identifier();
    let host = state
        .nat
        .host_for(identifier)
        .ok_or(Error::UnknownReplySession { identifier })?;
    let original_id = state
        .nat
        .original_id(host)
        .ok_or(Error::UnknownReplySession { identifier })?;
    debug!(identifier, %host, original_id, "inbound echo reply");

    let dst_mac = state
        .addresses
        .lookup(host)
        .ok_or(Error::UnresolvedInternalHost { ip: host })?;

    let settings = &state.settings;
    let src_mac = require_port_mac(datapath, settings.inside_port)?;
    let rewritten = rewrite_echo(ip.packet_bytes(), None, Some(host), original_id)?;
    datapath.send(PacketOut::frame(
        port::CONTROLLER,
        settings.inside_port,
        ipv4_frame(dst_mac, src_mac, &rewritten),
    ));
    state.metrics.nat_inbound.inc();

    Ok(NatOutcome::Translated {
        out_port: settings.inside_port,
    })
}

/// Route an ICMP message on the gateway by echo type
///
/// Echo requests are always treated as outbound and echo replies as
/// inbound; neither is filtered by subnet.
pub fn process_icmp(
    state: &mut GatewayState,
    datapath: &mut dyn Datapath,
    packet: &ParsedPacket<'_>,
) -> Result<NatOutcome> {
    let (Some(ip), Some(icmp)) = (&packet.ipv4, &packet.icmp) else {
        return Ok(NatOutcome::Ignored);
    };

    if icmp.is_echo_request() {
        translate_outbound(state, datapath, ip, icmp)
    } else if icmp.is_echo_reply() {
        translate_inbound(state, datapath, ip, icmp)
    } else {
        Ok(NatOutcome::Ignored)
    }
}
