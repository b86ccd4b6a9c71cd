//! NETINFO cell: the last handshake message, exchanging each side's view of
//! the current time and address set.
//!
//! Wire format (spec.md §6): `timestamp (4 BE), other_addr, n_my_addrs (1),
//! my_addrs[n_my_addrs]`; each address is `type (1), len (1), bytes[len]`.

use std::net::IpAddr;

/// One address entry, type-tagged per the wire format (`0x04` for IPv4,
/// `0x06` for IPv6; anything else is skipped on decode).
fn encode_addr(out: &mut Vec<u8>, addr: &IpAddr) {
    match addr {
        IpAddr::V4(v4) => {
            out.push(0x04);
            out.push(4);
            out.extend_from_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            out.push(0x06);
            out.push(16);
            out.extend_from_slice(&v6.octets());
        }
    }
}

fn decode_addr(body: &[u8], pos: &mut usize) -> Result<Option<IpAddr>, NetinfoError> {
    let atype = *body.get(*pos).ok_or(NetinfoError::Truncated)?;
    let alen = *body.get(*pos + 1).ok_or(NetinfoError::Truncated)? as usize;
    let start = *pos + 2;
    let bytes = body.get(start..start + alen).ok_or(NetinfoError::Truncated)?;
    *pos = start + alen;
    Ok(match (atype, alen) {
        (0x04, 4) => Some(IpAddr::V4([bytes[0], bytes[1], bytes[2], bytes[3]].into())),
        (0x06, 16) => {
            let mut b = [0u8; 16];
            b.copy_from_slice(bytes);
            Some(IpAddr::V6(b.into()))
        }
        _ => None,
    })
}

/// A parsed NETINFO message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Netinfo {
    /// Unix timestamp the sender observed, 0 if the sender is a client and
    /// chooses not to report one.
    pub timestamp: u32,
    /// The address the sender believes belongs to the recipient.
    pub other_addr: Option<IpAddr>,
    /// The sender's own canonical addresses.
    pub my_addrs: Vec<IpAddr>,
}

#[derive(Debug, thiserror::Error)]
pub enum NetinfoError {
    #[error("NETINFO payload truncated")]
    Truncated,
}

impl Netinfo {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        match &self.other_addr {
            Some(addr) => encode_addr(&mut out, addr),
            None => encode_addr(&mut out, &std::net::Ipv4Addr::UNSPECIFIED.into()),
        }
        let n: u8 = self.my_addrs.len().min(u8::MAX as usize) as u8;
        out.push(n);
        for addr in self.my_addrs.iter().take(n as usize) {
            encode_addr(&mut out, addr);
        }
        out
    }

    pub fn decode(body: &[u8]) -> Result<Self, NetinfoError> {
        if body.len() < 4 {
            return Err(NetinfoError::Truncated);
        }
        let timestamp = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
        let mut pos = 4;
        let other_addr = decode_addr(body, &mut pos)?.filter(|a| !a.is_unspecified());
        let n_my_addrs = *body.get(pos).ok_or(NetinfoError::Truncated)?;
        pos += 1;
        let mut my_addrs = Vec::with_capacity(n_my_addrs as usize);
        for _ in 0..n_my_addrs {
            if let Some(addr) = decode_addr(body, &mut pos)? {
                my_addrs.push(addr);
            }
        }
        Ok(Self {
            timestamp,
            other_addr,
            my_addrs,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn round_trips_with_addresses() {
        let netinfo = Netinfo {
            timestamp: 12345,
            other_addr: Some(Ipv4Addr::new(203, 0, 113, 1).into()),
            my_addrs: vec![Ipv4Addr::new(198, 51, 100, 7).into()],
        };
        let encoded = netinfo.encode();
        let decoded = Netinfo::decode(&encoded).unwrap();
        assert_eq!(decoded, netinfo);
    }

    #[test]
    fn unspecified_other_addr_decodes_to_none() {
        let netinfo = Netinfo {
            timestamp: 0,
            other_addr: None,
            my_addrs: vec![],
        };
        let decoded = Netinfo::decode(&netinfo.encode()).unwrap();
        assert_eq!(decoded.other_addr, None);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        assert!(matches!(Netinfo::decode(&[0, 0]), Err(NetinfoError::Truncated)));
    }
}
