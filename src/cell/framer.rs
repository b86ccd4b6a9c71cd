//! Incremental framing of the inbound byte stream into fixed and variable
//! cells.

use std::collections::VecDeque;

use tor_cell::chancell::ChanCmd;

use super::{FixedCell, FramedCell, PAYLOAD_LEN, VarCell, is_variable_command};

/// Result of one framing pass over `inbuf`.
#[derive(Debug, Default)]
pub struct FramePassResult {
    pub cells: Vec<FramedCell>,
    /// Set when the pass consumed the first VERSIONS cell while
    /// `link_protocol` was still unnegotiated; the caller must stop routing
    /// further bytes until the link protocol is assigned.
    pub awaiting_link_protocol: bool,
}

/// Stateful incremental framer bound to one connection's negotiated
/// protocol parameters.
pub struct Framer {
    link_protocol: u16,
    wide_circ_ids: bool,
}

impl Framer {
    pub fn new() -> Self {
        Self {
            link_protocol: 0,
            wide_circ_ids: false,
        }
    }

    /// Called once, immediately after version negotiation completes.
    pub fn set_link_protocol(&mut self, version: u16) {
        self.link_protocol = version;
        self.wide_circ_ids = version >= 4;
    }

    fn circ_id_width(&self) -> usize {
        if self.wide_circ_ids { 4 } else { 2 }
    }

    fn read_circ_id(&self, bytes: &[u8]) -> u32 {
        if self.wide_circ_ids {
            u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
        } else {
            u16::from_be_bytes([bytes[0], bytes[1]]) as u32
        }
    }

    /// Drains as many complete cells as are available from the front of
    /// `inbuf`, leaving any trailing partial cell untouched.
    pub fn frame_pass(&mut self, inbuf: &mut VecDeque<u8>) -> FramePassResult {
        let mut result = FramePassResult::default();

        loop {
            let header_width = self.circ_id_width();
            let min_header = header_width + 1;
            if inbuf.len() < min_header {
                break;
            }

            let header: Vec<u8> = inbuf.iter().take(min_header).copied().collect();
            let circ_id = self.read_circ_id(&header);
            let command = ChanCmd::from(header[header_width]);

            if is_variable_command(command, self.link_protocol) {
                if inbuf.len() < min_header + 2 {
                    break;
                }
                let len_bytes: Vec<u8> = inbuf.iter().skip(min_header).take(2).copied().collect();
                let length = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
                let total = min_header + 2 + length;
                if inbuf.len() < total {
                    break;
                }

                let consumed: Vec<u8> = inbuf.drain(..total).collect();
                let body = consumed[min_header + 2..].to_vec();
                let is_first_versions = command == ChanCmd::VERSIONS && self.link_protocol == 0;

                result.cells.push(FramedCell::Var(VarCell {
                    circ_id,
                    command,
                    body,
                }));

                if is_first_versions {
                    result.awaiting_link_protocol = true;
                    break;
                }
            } else {
                let total = min_header + PAYLOAD_LEN;
                if inbuf.len() < total {
                    break;
                }
                let consumed: Vec<u8> = inbuf.drain(..total).collect();
                let mut body = Box::new([0u8; PAYLOAD_LEN]);
                body.copy_from_slice(&consumed[min_header..]);
                result.cells.push(FramedCell::Fixed(FixedCell {
                    circ_id,
                    command,
                    body,
                }));
            }
        }

        result
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cell::pack_var;

    #[test]
    fn partial_variable_cell_leaves_inbuf_untouched() {
        let mut framer = Framer::new();
        let full = pack_var(0, ChanCmd::VERSIONS, &[0, 3, 0, 4], false);
        let mut inbuf: VecDeque<u8> = full[..full.len() - 1].iter().copied().collect();
        let before = inbuf.len();
        let result = framer.frame_pass(&mut inbuf);
        assert!(result.cells.is_empty());
        assert_eq!(inbuf.len(), before);
    }

    #[test]
    fn first_versions_halts_pass_and_sets_flag() {
        let mut framer = Framer::new();
        let versions = pack_var(0, ChanCmd::VERSIONS, &[0, 3, 0, 4], false);
        let mut inbuf: VecDeque<u8> = versions.iter().copied().collect();
        let result = framer.frame_pass(&mut inbuf);
        assert_eq!(result.cells.len(), 1);
        assert!(result.awaiting_link_protocol);
    }

    #[test]
    fn frames_multiple_fixed_cells_in_one_pass() {
        let mut framer = Framer::new();
        framer.set_link_protocol(4);
        let body = [1u8; PAYLOAD_LEN];
        let mut bytes = crate::cell::pack_fixed(1, ChanCmd::NETINFO, &body, true);
        bytes.extend(crate::cell::pack_fixed(1, ChanCmd::NETINFO, &body, true));
        let mut inbuf: VecDeque<u8> = bytes.iter().copied().collect();
        let result = framer.frame_pass(&mut inbuf);
        assert_eq!(result.cells.len(), 2);
        assert!(inbuf.is_empty());
    }
}
