//! Sorting gateway packet-ins between the ARP proxy and the NAT

use super::arp_proxy::{self, ArpAction};
use super::dispatcher::Event;
use super::nat::{self, NatOutcome};
use super::{Datapath, GatewayState, GatewaySettings};
use crate::Result;
use crate::protocol::ParsedPacket;
use tracing::trace;

/// Where a gateway frame goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketClass {
    /// ARP request asking for an inside address; hosts there answer for
    /// themselves
    InsideArpRequest,
    Arp,
    Icmp,
    /// Anything else, including unparsable upper layers
    Other,
}

impl PacketClass {
    pub fn of(packet: &ParsedPacket<'_>, settings: &GatewaySettings) -> Self {
        if let Some(arp) = &packet.arp {
            if arp.is_request() && settings.inside.contains(arp.target_ip) {
                return PacketClass::InsideArpRequest;
            }
            return PacketClass::Arp;
        }
        if packet.icmp.is_some() {
            return PacketClass::Icmp;
        }
        PacketClass::Other
    }
}

/// What the gateway did with one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    Dropped(PacketClass),
    Arp(ArpAction),
    Nat(NatOutcome),
}

/// Classify one frame and hand it to the ARP proxy or the NAT
pub fn process_packet(
    state: &mut GatewayState,
    datapath: &mut dyn Datapath,
    data: &[u8],
) -> Result<GatewayOutcome> {
    let Ok(packet) = ParsedPacket::parse(data) else {
        trace!(datapath = %datapath.id(), len = data.len(), "ignoring runt frame");
        return Ok(GatewayOutcome::Dropped(PacketClass::Other));
    };

    let class = PacketClass::of(&packet, &state.settings);
    match (class, &packet.arp) {
        (PacketClass::Arp, Some(arp)) => {
            Ok(GatewayOutcome::Arp(arp_proxy::process_arp(state, datapath, arp)?))
        }
        (PacketClass::Icmp, _) => Ok(GatewayOutcome::Nat(nat::process_icmp(
            state, datapath, &packet,
        )?)),
        _ => {
            trace!(datapath = %datapath.id(), ?class, "dropping frame");
            Ok(GatewayOutcome::Dropped(class))
        }
    }
}

/// Dispatch-table entry for the gateway switch
pub fn on_packet_in(
    state: &mut GatewayState,
    datapath: &mut dyn Datapath,
    event: &Event<'_>,
) -> Result<()> {
    if let Event::PacketIn(packet_in) = event {
        process_packet(state, datapath, &packet_in.data)?;
    }
    Ok(())
}
