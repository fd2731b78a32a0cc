use crate::openflow::{DatapathId, PortNo};
use std::io;
use std::net::Ipv4Addr;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("openflow protocol error: {0}")]
    Protocol(String),

    /// An echo reply arrived for a translation identifier (or host) with no
    /// recorded session.
    #[error("no NAT session for translation identifier {identifier}")]
    UnknownReplySession { identifier: u16 },

    #[error("NAT translation identifiers exhausted")]
    IdentifiersExhausted,

    #[error("no address table entry for internal host {ip}")]
    UnresolvedInternalHost { ip: Ipv4Addr },

    #[error("hardware address of port {port} on switch {datapath} is unknown")]
    PortAddressUnknown { datapath: DatapathId, port: PortNo },
}

pub type Result<T> = std::result::Result<T, Error>;
