//! OpenFlow messages exchanged with a switch

use super::flow::{FlowMatch, FlowRule, decode_actions, encode_actions};
use super::{
    Action, DatapathId, HEADER_LEN, Header, OFP_NO_BUFFER, OFP_VERSION, PortNo, msg_type,
    read_u16, read_u32, read_u64,
};
use crate::protocol::MacAddr;
use crate::{Error, Result};

const OFPMP_PORT_DESC: u16 = 13;
const OFPMPF_REPLY_MORE: u16 = 1;
const PORT_DESC_LEN: usize = 64;
const PORT_NAME_LEN: usize = 16;

/// Frame forwarded to the controller (OFPT_PACKET_IN)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketIn {
    pub buffer_id: Option<u32>,
    /// Length of the frame on the wire; `data` may be shorter
    pub total_len: u16,
    pub reason: u8,
    pub table_id: u8,
    pub cookie: u64,
    pub in_port: PortNo,
    pub data: Vec<u8>,
}

impl PacketIn {
    pub fn is_truncated(&self) -> bool {
        self.data.len() < self.total_len as usize
    }

    fn decode_body(body: &[u8]) -> Result<Self> {
        if body.len() < 16 {
            return Err(Error::Protocol("PACKET_IN truncated".into()));
        }

        let buffer_id = match read_u32(body, 0) {
            OFP_NO_BUFFER => None,
            id => Some(id),
        };
        let total_len = read_u16(body, 4);
        let reason = body[6];
        let table_id = body[7];
        let cookie = read_u64(body, 8);

        let (flow_match, match_len) = FlowMatch::decode(&body[16..])?;
        let in_port = flow_match
            .in_port
            .ok_or_else(|| Error::Protocol("PACKET_IN without in_port".into()))?;

        let data_start = 16 + match_len + 2;
        let data = body.get(data_start..).unwrap_or_default().to_vec();

        Ok(Self {
            buffer_id,
            total_len,
            reason,
            table_id,
            cookie,
            in_port,
            data,
        })
    }

    fn encode_body(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.buffer_id.unwrap_or(OFP_NO_BUFFER).to_be_bytes());
        buf.extend_from_slice(&self.total_len.to_be_bytes());
        buf.push(self.reason);
        buf.push(self.table_id);
        buf.extend_from_slice(&self.cookie.to_be_bytes());
        FlowMatch::any().in_port(self.in_port).encode(buf);
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&self.data);
    }
}

/// What a PACKET_OUT carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketPayload {
    /// Full frame bytes
    Data(Vec<u8>),
    /// Frame already buffered on the switch
    Buffered(u32),
}

/// Frame injection (OFPT_PACKET_OUT)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketOut {
    pub in_port: PortNo,
    pub actions: Vec<Action>,
    pub payload: PacketPayload,
}

impl PacketOut {
    /// Emit `data` out of `out_port`
    pub fn frame(in_port: PortNo, out_port: PortNo, data: Vec<u8>) -> Self {
        Self {
            in_port,
            actions: vec![Action::output(out_port)],
            payload: PacketPayload::Data(data),
        }
    }

    /// Ports this packet-out sends to
    pub fn out_ports(&self) -> impl Iterator<Item = PortNo> + '_ {
        self.actions.iter().map(|action| match *action {
            Action::Output { port, .. } => port,
        })
    }

    pub fn data(&self) -> Option<&[u8]> {
        match &self.payload {
            PacketPayload::Data(data) => Some(data),
            PacketPayload::Buffered(_) => None,
        }
    }

    fn encode_body(&self, buf: &mut Vec<u8>) {
        let buffer_id = match self.payload {
            PacketPayload::Buffered(id) => id,
            PacketPayload::Data(_) => OFP_NO_BUFFER,
        };
        buf.extend_from_slice(&buffer_id.to_be_bytes());
        buf.extend_from_slice(&self.in_port.to_be_bytes());

        let len_at = buf.len();
        buf.extend_from_slice(&[0u8; 8]);
        let actions_start = buf.len();
        encode_actions(&self.actions, buf);
        let actions_len = (buf.len() - actions_start) as u16;
        buf[len_at..len_at + 2].copy_from_slice(&actions_len.to_be_bytes());

        if let PacketPayload::Data(data) = &self.payload {
            buf.extend_from_slice(data);
        }
    }

    fn decode_body(body: &[u8]) -> Result<Self> {
        if body.len() < 16 {
            return Err(Error::Protocol("PACKET_OUT truncated".into()));
        }

        let buffer_id = read_u32(body, 0);
        let in_port = read_u32(body, 4);
        let actions_len = read_u16(body, 8) as usize;
        let actions_end = 16 + actions_len;
        if body.len() < actions_end {
            return Err(Error::Protocol("PACKET_OUT actions truncated".into()));
        }
        let actions = decode_actions(&body[16..actions_end])?;

        let payload = match buffer_id {
            OFP_NO_BUFFER => PacketPayload::Data(body[actions_end..].to_vec()),
            id => PacketPayload::Buffered(id),
        };

        Ok(Self {
            in_port,
            actions,
            payload,
        })
    }
}

/// Switch identity and capabilities (OFPT_FEATURES_REPLY)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchFeatures {
    pub datapath_id: DatapathId,
    pub n_buffers: u32,
    pub n_tables: u8,
    pub auxiliary_id: u8,
    pub capabilities: u32,
}

impl SwitchFeatures {
    fn decode_body(body: &[u8]) -> Result<Self> {
        if body.len() < 24 {
            return Err(Error::Protocol("FEATURES_REPLY truncated".into()));
        }

        Ok(Self {
            datapath_id: DatapathId(read_u64(body, 0)),
            n_buffers: read_u32(body, 8),
            n_tables: body[12],
            auxiliary_id: body[13],
            capabilities: read_u32(body, 16),
        })
    }

    fn encode_body(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.datapath_id.0.to_be_bytes());
        buf.extend_from_slice(&self.n_buffers.to_be_bytes());
        buf.push(self.n_tables);
        buf.push(self.auxiliary_id);
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&self.capabilities.to_be_bytes());
        // reserved
        buf.extend_from_slice(&[0u8; 4]);
    }
}

/// One entry of a port description reply (`ofp_port`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDesc {
    pub port_no: PortNo,
    pub hw_addr: MacAddr,
    pub name: String,
}

impl PortDesc {
    fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < PORT_DESC_LEN {
            return Err(Error::Protocol("ofp_port truncated".into()));
        }

        let hw_addr = MacAddr::from_slice(&buf[8..14])
            .ok_or_else(|| Error::Protocol("ofp_port hw_addr truncated".into()))?;
        let raw_name = &buf[16..16 + PORT_NAME_LEN];
        let name_len = raw_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(PORT_NAME_LEN);

        Ok(Self {
            port_no: read_u32(buf, 0),
            hw_addr,
            name: String::from_utf8_lossy(&raw_name[..name_len]).into_owned(),
        })
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        buf.extend_from_slice(&self.port_no.to_be_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&self.hw_addr.0);
        buf.extend_from_slice(&[0u8; 2]);

        let mut name = [0u8; PORT_NAME_LEN];
        let bytes = self.name.as_bytes();
        let n = bytes.len().min(PORT_NAME_LEN - 1);
        name[..n].copy_from_slice(&bytes[..n]);
        buf.extend_from_slice(&name);

        // config, state, features and speeds are not tracked
        buf.resize(start + PORT_DESC_LEN, 0);
    }
}

/// Decoded OpenFlow message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello,
    Error {
        err_type: u16,
        code: u16,
        data: Vec<u8>,
    },
    EchoRequest(Vec<u8>),
    EchoReply(Vec<u8>),
    FeaturesRequest,
    FeaturesReply(SwitchFeatures),
    PortDescRequest,
    PortDescReply {
        ports: Vec<PortDesc>,
        more: bool,
    },
    PacketIn(PacketIn),
    PacketOut(PacketOut),
    FlowMod(FlowRule),
    /// Any message type or multipart kind the controller does not handle
    Unsupported {
        msg_type: u8,
    },
}

impl Message {
    pub fn msg_type(&self) -> u8 {
        match self {
            Message::Hello => msg_type::HELLO,
            Message::Error { .. } => msg_type::ERROR,
            Message::EchoRequest(_) => msg_type::ECHO_REQUEST,
            Message::EchoReply(_) => msg_type::ECHO_REPLY,
            Message::FeaturesRequest => msg_type::FEATURES_REQUEST,
            Message::FeaturesReply(_) => msg_type::FEATURES_REPLY,
            Message::PortDescRequest => msg_type::MULTIPART_REQUEST,
            Message::PortDescReply { .. } => msg_type::MULTIPART_REPLY,
            Message::PacketIn(_) => msg_type::PACKET_IN,
            Message::PacketOut(_) => msg_type::PACKET_OUT,
            Message::FlowMod(_) => msg_type::FLOW_MOD,
            Message::Unsupported { msg_type } => *msg_type,
        }
    }

    /// Decode the body of a message whose header was already read.
    ///
    /// HELLO is accepted at any version so the caller can negotiate.
    pub fn decode(header: &Header, body: &[u8]) -> Result<Self> {
        if header.msg_type != msg_type::HELLO && header.version != OFP_VERSION {
            return Err(Error::Protocol(format!(
                "unsupported version 0x{:02x}",
                header.version
            )));
        }
        if body.len() != header.body_len() {
            return Err(Error::Protocol(format!(
                "body is {} bytes, header says {}",
                body.len(),
                header.body_len()
            )));
        }

        let msg = match header.msg_type {
            msg_type::HELLO => Message::Hello,
            msg_type::ERROR => {
                if body.len() < 4 {
                    return Err(Error::Protocol("ERROR truncated".into()));
                }
                Message::Error {
                    err_type: read_u16(body, 0),
                    code: read_u16(body, 2),
                    data: body[4..].to_vec(),
                }
            }
            msg_type::ECHO_REQUEST => Message::EchoRequest(body.to_vec()),
            msg_type::ECHO_REPLY => Message::EchoReply(body.to_vec()),
            msg_type::FEATURES_REQUEST => Message::FeaturesRequest,
            msg_type::FEATURES_REPLY => Message::FeaturesReply(SwitchFeatures::decode_body(body)?),
            msg_type::PACKET_IN => Message::PacketIn(PacketIn::decode_body(body)?),
            msg_type::PACKET_OUT => Message::PacketOut(PacketOut::decode_body(body)?),
            msg_type::FLOW_MOD => Message::FlowMod(FlowRule::decode_body(body)?),
            msg_type::MULTIPART_REQUEST | msg_type::MULTIPART_REPLY => {
                Self::decode_multipart(header.msg_type, body)?
            }
            other => Message::Unsupported { msg_type: other },
        };

        Ok(msg)
    }

    fn decode_multipart(kind: u8, body: &[u8]) -> Result<Self> {
        if body.len() < 8 {
            return Err(Error::Protocol("MULTIPART truncated".into()));
        }

        if read_u16(body, 0) != OFPMP_PORT_DESC {
            return Ok(Message::Unsupported { msg_type: kind });
        }

        if kind == msg_type::MULTIPART_REQUEST {
            return Ok(Message::PortDescRequest);
        }

        let more = read_u16(body, 2) & OFPMPF_REPLY_MORE != 0;
        let ports = body[8..]
            .chunks(PORT_DESC_LEN)
            .map(PortDesc::decode)
            .collect::<Result<Vec<_>>>()?;

        Ok(Message::PortDescReply { ports, more })
    }

    /// Decode one complete message (header included)
    pub fn parse(buffer: &[u8]) -> Result<(Header, Self)> {
        let header = Header::parse(buffer)?;
        let end = header.length as usize;
        if buffer.len() < end {
            return Err(Error::Protocol("message truncated".into()));
        }
        let msg = Self::decode(&header, &buffer[HEADER_LEN..end])?;
        Ok((header, msg))
    }

    /// Serialize with the given transaction id
    pub fn encode(&self, xid: u32) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN];

        match self {
            Message::Hello
            | Message::FeaturesRequest
            | Message::Unsupported { .. } => {}
            Message::Error {
                err_type,
                code,
                data,
            } => {
                buf.extend_from_slice(&err_type.to_be_bytes());
                buf.extend_from_slice(&code.to_be_bytes());
                buf.extend_from_slice(data);
            }
            Message::EchoRequest(data) | Message::EchoReply(data) => {
                buf.extend_from_slice(data);
            }
            Message::FeaturesReply(features) => features.encode_body(&mut buf),
            Message::PortDescRequest => {
                buf.extend_from_slice(&OFPMP_PORT_DESC.to_be_bytes());
                buf.extend_from_slice(&[0u8; 6]);
            }
            Message::PortDescReply { ports, more } => {
                buf.extend_from_slice(&OFPMP_PORT_DESC.to_be_bytes());
                let flags = if *more { OFPMPF_REPLY_MORE } else { 0 };
                buf.extend_from_slice(&flags.to_be_bytes());
                buf.extend_from_slice(&[0u8; 4]);
                for port in ports {
                    port.encode(&mut buf);
                }
            }
            Message::PacketIn(packet_in) => packet_in.encode_body(&mut buf),
            Message::PacketOut(packet_out) => packet_out.encode_body(&mut buf),
            Message::FlowMod(rule) => rule.encode_body(&mut buf),
        }

        let header = Header {
            version: OFP_VERSION,
            msg_type: self.msg_type(),
            length: buf.len() as u16,
            xid,
        };
        buf[..HEADER_LEN].copy_from_slice(&header.to_bytes());
        buf
    }
}
