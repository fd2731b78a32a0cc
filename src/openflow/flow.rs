//! OXM matches, actions and flow rules

use super::{OFP_NO_BUFFER, PortNo, controller_max_len, pad8, port, read_u16, read_u32};
use crate::protocol::MacAddr;
use crate::{Error, Result};

const OFPMT_OXM: u16 = 1;
const OFPXMC_OPENFLOW_BASIC: u16 = 0x8000;
const OXM_FIELD_IN_PORT: u8 = 0;
const OXM_FIELD_ETH_DST: u8 = 3;

const OFPAT_OUTPUT: u16 = 0;
const OUTPUT_ACTION_LEN: u16 = 16;

const OFPIT_APPLY_ACTIONS: u16 = 4;

const OFPFC_ADD: u8 = 0;
const OFPG_ANY: u32 = 0xffff_ffff;

/// Fixed part of FLOW_MOD after the header, up to the match
pub(crate) const FLOW_MOD_FIXED_LEN: usize = 40;

fn oxm_header(field: u8, len: u8) -> u32 {
    ((OFPXMC_OPENFLOW_BASIC as u32) << 16) | ((field as u32) << 9) | len as u32
}

/// Match fields understood by the controller
///
/// `None` fields are wildcarded; the empty match matches every frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowMatch {
    pub in_port: Option<PortNo>,
    pub eth_dst: Option<MacAddr>,
}

impl FlowMatch {
    /// Match everything (table-miss)
    pub fn any() -> Self {
        Self::default()
    }

    pub fn in_port(mut self, port: PortNo) -> Self {
        self.in_port = Some(port);
        self
    }

    pub fn eth_dst(mut self, mac: MacAddr) -> Self {
        self.eth_dst = Some(mac);
        self
    }

    /// Append an `ofp_match` (OXM type, 8-byte aligned) to `buf`
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        buf.extend_from_slice(&OFPMT_OXM.to_be_bytes());
        buf.extend_from_slice(&[0, 0]);

        if let Some(port) = self.in_port {
            buf.extend_from_slice(&oxm_header(OXM_FIELD_IN_PORT, 4).to_be_bytes());
            buf.extend_from_slice(&port.to_be_bytes());
        }
        if let Some(mac) = self.eth_dst {
            buf.extend_from_slice(&oxm_header(OXM_FIELD_ETH_DST, 6).to_be_bytes());
            buf.extend_from_slice(&mac.0);
        }

        let len = buf.len() - start;
        buf[start + 2..start + 4].copy_from_slice(&(len as u16).to_be_bytes());
        buf.resize(start + pad8(len), 0);
    }

    /// Decode an `ofp_match`, returning it with its padded on-wire size.
    ///
    /// OXM fields other than `in_port` and `eth_dst` are skipped.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 4 {
            return Err(Error::Protocol("match truncated".into()));
        }

        let match_type = read_u16(buf, 0);
        if match_type != OFPMT_OXM {
            return Err(Error::Protocol(format!(
                "unsupported match type {}",
                match_type
            )));
        }

        let len = read_u16(buf, 2) as usize;
        let padded = pad8(len);
        if len < 4 || buf.len() < padded {
            return Err(Error::Protocol(format!("bad match length {}", len)));
        }

        let mut result = FlowMatch::default();
        let mut offset = 4;
        while offset + 4 <= len {
            let header = read_u32(buf, offset);
            let class = (header >> 16) as u16;
            let field = ((header >> 9) & 0x7f) as u8;
            let has_mask = (header >> 8) & 1 == 1;
            let field_len = (header & 0xff) as usize;

            let value_start = offset + 4;
            let value_end = value_start + field_len;
            if value_end > len {
                return Err(Error::Protocol("OXM field overruns match".into()));
            }
            let value = &buf[value_start..value_end];

            if class == OFPXMC_OPENFLOW_BASIC && !has_mask {
                match (field, field_len) {
                    (OXM_FIELD_IN_PORT, 4) => result.in_port = Some(read_u32(value, 0)),
                    (OXM_FIELD_ETH_DST, 6) => result.eth_dst = MacAddr::from_slice(value),
                    _ => {}
                }
            }

            offset = value_end;
        }

        Ok((result, padded))
    }
}

/// Flow or packet-out action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Output { port: PortNo, max_len: u16 },
}

impl Action {
    pub fn output(port: PortNo) -> Self {
        Action::Output {
            port,
            max_len: controller_max_len::MAX,
        }
    }

    /// Send whole frames to the controller, unbuffered
    pub fn to_controller() -> Self {
        Action::Output {
            port: port::CONTROLLER,
            max_len: controller_max_len::NO_BUFFER,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        match *self {
            Action::Output { port, max_len } => {
                buf.extend_from_slice(&OFPAT_OUTPUT.to_be_bytes());
                buf.extend_from_slice(&OUTPUT_ACTION_LEN.to_be_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
                buf.extend_from_slice(&max_len.to_be_bytes());
                buf.extend_from_slice(&[0u8; 6]);
            }
        }
    }
}

pub(crate) fn encode_actions(actions: &[Action], buf: &mut Vec<u8>) {
    for action in actions {
        action.encode(buf);
    }
}

/// Decode an action list; unknown action types are skipped.
pub(crate) fn decode_actions(buf: &[u8]) -> Result<Vec<Action>> {
    let mut actions = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        if offset + 4 > buf.len() {
            return Err(Error::Protocol("action header truncated".into()));
        }
        let action_type = read_u16(buf, offset);
        let len = read_u16(buf, offset + 2) as usize;
        if len < 8 || offset + len > buf.len() {
            return Err(Error::Protocol(format!("bad action length {}", len)));
        }

        if action_type == OFPAT_OUTPUT && len >= OUTPUT_ACTION_LEN as usize {
            actions.push(Action::Output {
                port: read_u32(buf, offset + 4),
                max_len: read_u16(buf, offset + 8),
            });
        }

        offset += len;
    }

    Ok(actions)
}

/// A rule to add to table 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRule {
    pub priority: u16,
    pub flow_match: FlowMatch,
    pub actions: Vec<Action>,
    /// Buffered frame the switch should release through the new rule
    pub buffer_id: Option<u32>,
}

impl FlowRule {
    pub fn new(priority: u16, flow_match: FlowMatch, actions: Vec<Action>) -> Self {
        Self {
            priority,
            flow_match,
            actions,
            buffer_id: None,
        }
    }

    pub fn with_buffer(mut self, buffer_id: Option<u32>) -> Self {
        self.buffer_id = buffer_id;
        self
    }

    /// Append the FLOW_MOD body (everything after the header)
    pub(crate) fn encode_body(&self, buf: &mut Vec<u8>) {
        // cookie, cookie_mask
        buf.extend_from_slice(&[0u8; 16]);
        // table_id
        buf.push(0);
        buf.push(OFPFC_ADD);
        // idle_timeout, hard_timeout: permanent
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&self.priority.to_be_bytes());
        buf.extend_from_slice(&self.buffer_id.unwrap_or(OFP_NO_BUFFER).to_be_bytes());
        buf.extend_from_slice(&port::ANY.to_be_bytes());
        buf.extend_from_slice(&OFPG_ANY.to_be_bytes());
        // flags, pad
        buf.extend_from_slice(&[0u8; 4]);

        self.flow_match.encode(buf);

        if !self.actions.is_empty() {
            let start = buf.len();
            buf.extend_from_slice(&OFPIT_APPLY_ACTIONS.to_be_bytes());
            buf.extend_from_slice(&[0u8; 6]);
            encode_actions(&self.actions, buf);
            let len = (buf.len() - start) as u16;
            buf[start + 2..start + 4].copy_from_slice(&len.to_be_bytes());
        }
    }

    /// Decode a FLOW_MOD body; only APPLY_ACTIONS instructions are kept.
    pub(crate) fn decode_body(body: &[u8]) -> Result<Self> {
        if body.len() < FLOW_MOD_FIXED_LEN {
            return Err(Error::Protocol("FLOW_MOD truncated".into()));
        }

        let priority = read_u16(body, 22);
        let buffer_id = match read_u32(body, 24) {
            OFP_NO_BUFFER => None,
            id => Some(id),
        };

        let (flow_match, match_len) = FlowMatch::decode(&body[FLOW_MOD_FIXED_LEN..])?;
        let instructions = &body[FLOW_MOD_FIXED_LEN + match_len..];

        let mut actions = Vec::new();
        let mut offset = 0;
        while offset + 8 <= instructions.len() {
            let inst_type = read_u16(instructions, offset);
            let len = read_u16(instructions, offset + 2) as usize;
            if len < 8 || offset + len > instructions.len() {
                return Err(Error::Protocol(format!("bad instruction length {}", len)));
            }
            if inst_type == OFPIT_APPLY_ACTIONS {
                actions.extend(decode_actions(&instructions[offset + 8..offset + len])?);
            }
            offset += len;
        }

        Ok(Self {
            priority,
            flow_match,
            actions,
            buffer_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: MacAddr = MacAddr([0x00, 0x00, 0x00, 0x00, 0x00, 0x02]);

    #[test]
    fn test_empty_match_encoding() {
        let mut buf = Vec::new();
        FlowMatch::any().encode(&mut buf);
        // type=OXM, length=4, padded to 8
        assert_eq!(buf, [0x00, 0x01, 0x00, 0x04, 0, 0, 0, 0]);
    }

    #[test]
    fn test_match_encoding_layout() {
        let mut buf = Vec::new();
        FlowMatch::any().in_port(3).eth_dst(HOST).encode(&mut buf);

        // 4 + (4 + 4) + (4 + 6) = 22, padded to 24
        assert_eq!(buf.len(), 24);
        assert_eq!(read_u16(&buf, 2), 22);
        assert_eq!(read_u32(&buf, 4), 0x8000_0004);
        assert_eq!(read_u32(&buf, 8), 3);
        assert_eq!(read_u32(&buf, 12), 0x8000_0606);
        assert_eq!(&buf[16..22], &HOST.0);
    }

    #[test]
    fn test_match_decode_skips_unknown_fields() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&OFPMT_OXM.to_be_bytes());
        buf.extend_from_slice(&18u16.to_be_bytes());
        // eth_type (field 5, len 2)
        buf.extend_from_slice(&oxm_header(5, 2).to_be_bytes());
        buf.extend_from_slice(&0x0800u16.to_be_bytes());
        buf.extend_from_slice(&oxm_header(OXM_FIELD_IN_PORT, 4).to_be_bytes());
        buf.extend_from_slice(&7u32.to_be_bytes());
        buf.resize(24, 0);

        let (m, consumed) = FlowMatch::decode(&buf).unwrap();
        assert_eq!(consumed, 24);
        assert_eq!(m.in_port, Some(7));
        assert_eq!(m.eth_dst, None);
    }

    #[test]
    fn test_match_decode_rejects_overrun() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&OFPMT_OXM.to_be_bytes());
        buf.extend_from_slice(&8u16.to_be_bytes());
        buf.extend_from_slice(&oxm_header(OXM_FIELD_IN_PORT, 4).to_be_bytes());
        assert!(FlowMatch::decode(&buf).is_err());
    }

    #[test]
    fn test_controller_action() {
        let mut buf = Vec::new();
        Action::to_controller().encode(&mut buf);

        assert_eq!(buf.len(), 16);
        assert_eq!(read_u32(&buf, 4), port::CONTROLLER);
        assert_eq!(read_u16(&buf, 8), 0xffff);
    }

    #[test]
    fn test_flow_rule_body() {
        let rule = FlowRule::new(
            1,
            FlowMatch::any().in_port(1).eth_dst(HOST),
            vec![Action::output(2)],
        )
        .with_buffer(Some(77));

        let mut body = Vec::new();
        rule.encode_body(&mut body);

        // fixed 40 + match 24 + instruction 8 + output 16
        assert_eq!(body.len(), 88);
        assert_eq!(read_u16(&body, 22), 1);
        assert_eq!(read_u32(&body, 24), 77);
        assert_eq!(read_u16(&body, 64), OFPIT_APPLY_ACTIONS);
        assert_eq!(read_u16(&body, 66), 24);

        assert_eq!(FlowRule::decode_body(&body).unwrap(), rule);
    }

    #[test]
    fn test_table_miss_rule_has_no_buffer() {
        let rule = FlowRule::new(0, FlowMatch::any(), vec![Action::to_controller()]);
        let mut body = Vec::new();
        rule.encode_body(&mut body);
        assert_eq!(read_u32(&body, 24), OFP_NO_BUFFER);
    }
}
