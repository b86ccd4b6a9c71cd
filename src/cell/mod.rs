//! Cell framing: fixed/variable discrimination over the raw inbound byte
//! stream, and serialization of outbound cells.
//!
//! Circuit-id width (2 vs 4 bytes) is negotiated per link protocol version,
//! which `tor_cell::chancell::codec::ChannelCodec` does not support (it only
//! speaks the always-4-byte format used by protocol versions ≥ 4). This
//! module implements both widths directly; it reuses `tor_cell`'s
//! [`ChanCmd`] for command values since that type is a thin `caret_int`
//! wrapper with no codec assumptions baked in.

mod framer;

pub use framer::{FramePassResult, Framer};

use tor_cell::chancell::ChanCmd;

/// Payload size of a fixed cell, per protocol: 509 bytes regardless of
/// circuit-id width.
pub const PAYLOAD_LEN: usize = 509;

/// A framed fixed-length cell.
#[derive(Debug, Clone)]
pub struct FixedCell {
    pub circ_id: u32,
    pub command: ChanCmd,
    pub body: Box<[u8; PAYLOAD_LEN]>,
}

/// A framed variable-length cell.
#[derive(Debug, Clone)]
pub struct VarCell {
    pub circ_id: u32,
    pub command: ChanCmd,
    pub body: Vec<u8>,
}

/// Either framed cell kind, as delivered to the `fixed_cell`/`var_cell`
/// event labels.
#[derive(Debug, Clone)]
pub enum FramedCell {
    Fixed(FixedCell),
    Var(VarCell),
}

/// Whether `command` uses the variable-length wire format, given the
/// current negotiated `link_protocol` (0 = not yet negotiated).
///
/// `ChanCmd::is_var_cell` already captures "VERSIONS, or command ≥ 128",
/// which is exactly the post-negotiation rule; the only extra case is that
/// before negotiation (`link_protocol == 0`) nothing but VERSIONS can
/// legally appear, which `is_var_cell` also reports correctly since VERSIONS
/// is variable unconditionally.
pub fn is_variable_command(command: ChanCmd, _link_protocol: u16) -> bool {
    command.is_var_cell()
}

/// Serializes a fixed cell: `circ_id (2 or 4 BE), command (1), body (509)`.
pub fn pack_fixed(circ_id: u32, command: ChanCmd, body: &[u8; PAYLOAD_LEN], wide_circ_ids: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(if wide_circ_ids { 4 } else { 2 } + 1 + PAYLOAD_LEN);
    if wide_circ_ids {
        out.extend_from_slice(&circ_id.to_be_bytes());
    } else {
        out.extend_from_slice(&(circ_id as u16).to_be_bytes());
    }
    out.push(command.into());
    out.extend_from_slice(body);
    out
}

/// Serializes a variable cell: `circ_id (2 or 4 BE), command (1), length (2
/// BE), body`. VERSIONS is always 2-byte circ-id regardless of
/// `wide_circ_ids`, per the wire format note in the external-interfaces
/// section: circuit-id width isn't negotiated yet when VERSIONS is sent.
pub fn pack_var(circ_id: u32, command: ChanCmd, body: &[u8], wide_circ_ids: bool) -> Vec<u8> {
    let narrow = command == ChanCmd::VERSIONS || !wide_circ_ids;
    let mut out = Vec::with_capacity(if narrow { 2 } else { 4 } + 1 + 2 + body.len());
    if narrow {
        out.extend_from_slice(&(circ_id as u16).to_be_bytes());
    } else {
        out.extend_from_slice(&circ_id.to_be_bytes());
    }
    out.push(command.into());
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fixed_pack_has_expected_length() {
        let body = [7u8; PAYLOAD_LEN];
        let wide = pack_fixed(1, ChanCmd::NETINFO, &body, true);
        assert_eq!(wide.len(), 4 + 1 + PAYLOAD_LEN);
        let narrow = pack_fixed(1, ChanCmd::NETINFO, &body, false);
        assert_eq!(narrow.len(), 2 + 1 + PAYLOAD_LEN);
    }

    #[test]
    fn versions_is_always_narrow() {
        let packed = pack_var(0, ChanCmd::VERSIONS, &[0, 3, 0, 4], true);
        assert_eq!(&packed[0..2], &[0u8, 0u8]);
        assert_eq!(packed[2], u8::from(ChanCmd::VERSIONS));
    }
}
