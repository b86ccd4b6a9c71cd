//! PADDING_NEGOTIATE cell.
//!
//! Per spec.md's Non-goals, channel padding scheduling is out of scope for
//! this crate; the only responsibility here is to frame the cell correctly
//! so it doesn't desync the stream when a peer sends one, and to round-trip
//! it for a client-side caller that wants to ask a guard to stop/start
//! padding. Nothing in this crate consumes the decoded value to change
//! behavior.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddingNegotiate {
    pub command: Command,
    pub ito_low_ms: u16,
    pub ito_high_ms: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum PaddingNegotiateError {
    #[error("PADDING_NEGOTIATE payload truncated")]
    Truncated,
    #[error("unrecognized PADDING_NEGOTIATE version {0}")]
    UnrecognizedVersion(u8),
    #[error("unrecognized PADDING_NEGOTIATE command {0}")]
    UnrecognizedCommand(u8),
}

impl PaddingNegotiate {
    pub fn encode(&self) -> [u8; 6] {
        let command = match self.command {
            Command::Start => 2u8,
            Command::Stop => 1u8,
        };
        let mut out = [0u8; 6];
        out[0] = 0; // version
        out[1] = command;
        out[2..4].copy_from_slice(&self.ito_low_ms.to_be_bytes());
        out[4..6].copy_from_slice(&self.ito_high_ms.to_be_bytes());
        out
    }

    pub fn decode(body: &[u8]) -> Result<Self, PaddingNegotiateError> {
        if body.len() < 6 {
            return Err(PaddingNegotiateError::Truncated);
        }
        if body[0] != 0 {
            return Err(PaddingNegotiateError::UnrecognizedVersion(body[0]));
        }
        let command = match body[1] {
            2 => Command::Start,
            1 => Command::Stop,
            other => return Err(PaddingNegotiateError::UnrecognizedCommand(other)),
        };
        let ito_low_ms = u16::from_be_bytes([body[2], body[3]]);
        let ito_high_ms = u16::from_be_bytes([body[4], body[5]]);
        Ok(Self {
            command,
            ito_low_ms,
            ito_high_ms,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips() {
        let msg = PaddingNegotiate {
            command: Command::Start,
            ito_low_ms: 1500,
            ito_high_ms: 9500,
        };
        assert_eq!(PaddingNegotiate::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn rejects_unrecognized_version() {
        let body = [1u8, 2, 0, 0, 0, 0];
        assert!(matches!(
            PaddingNegotiate::decode(&body),
            Err(PaddingNegotiateError::UnrecognizedVersion(1))
        ));
    }
}
