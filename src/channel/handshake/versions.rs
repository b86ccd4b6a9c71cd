//! VERSIONS cell: a flat list of `u16` link-protocol versions.
//!
//! Always serialized with a 2-byte circuit id regardless of the eventual
//! negotiated width (spec.md §6), which is why this is framed through
//! [`crate::cell::pack_var`] directly rather than through the general
//! [`crate::cell::framer::Framer`] path used once a protocol is negotiated.

/// Encodes a VERSIONS body: each version as a big-endian `u16`.
pub fn encode(versions: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(versions.len() * 2);
    for v in versions {
        out.extend_from_slice(&v.to_be_bytes());
    }
    out
}

/// Decodes a VERSIONS body into its list of versions.
pub fn decode(body: &[u8]) -> Vec<u16> {
    body.chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect()
}

/// The numerically highest version present in both `peer` and `mine`, or
/// `None` if the two lists share nothing.
pub fn best_shared(peer: &[u16], mine: &[u16]) -> Option<u16> {
    peer.iter()
        .filter(|v| mine.contains(v))
        .copied()
        .max()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips() {
        let versions = [3u16, 4, 5];
        let encoded = encode(&versions);
        assert_eq!(decode(&encoded), versions);
    }

    #[test]
    fn best_shared_picks_highest_common() {
        assert_eq!(best_shared(&[3, 4, 5], &[3, 4, 5]), Some(5));
        assert_eq!(best_shared(&[3, 4], &[5, 6]), None);
        assert_eq!(best_shared(&[2, 3], &[3, 4, 5]), Some(3));
    }
}
