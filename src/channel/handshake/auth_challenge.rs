//! AUTH_CHALLENGE cell: a 32-byte challenge plus the responder's list of
//! acceptable authentication methods (spec.md §6).

const CHALLENGE_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub challenge: [u8; CHALLENGE_LEN],
    pub methods: Vec<u16>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthChallengeError {
    #[error("AUTH_CHALLENGE payload truncated")]
    Truncated,
}

impl AuthChallenge {
    pub fn new(challenge: [u8; CHALLENGE_LEN], methods: Vec<u16>) -> Self {
        Self { challenge, methods }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CHALLENGE_LEN + 2 + self.methods.len() * 2);
        out.extend_from_slice(&self.challenge);
        out.extend_from_slice(&(self.methods.len() as u16).to_be_bytes());
        for m in &self.methods {
            out.extend_from_slice(&m.to_be_bytes());
        }
        out
    }

    pub fn decode(body: &[u8]) -> Result<Self, AuthChallengeError> {
        if body.len() < CHALLENGE_LEN + 2 {
            return Err(AuthChallengeError::Truncated);
        }
        let mut challenge = [0u8; CHALLENGE_LEN];
        challenge.copy_from_slice(&body[..CHALLENGE_LEN]);
        let n_methods = u16::from_be_bytes([body[CHALLENGE_LEN], body[CHALLENGE_LEN + 1]]) as usize;
        let methods_start = CHALLENGE_LEN + 2;
        let methods_end = methods_start + n_methods * 2;
        let methods_bytes = body.get(methods_start..methods_end).ok_or(AuthChallengeError::Truncated)?;
        let methods = methods_bytes.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();
        Ok(Self { challenge, methods })
    }

    /// Picks the best method we both support, per the preference order in
    /// spec.md §4.6: `ED25519_SHA256_RFC5705 > RSA_SHA256_RFC5705 >
    /// RSA_SHA256_TLSSECRET`.
    pub fn choose_method(&self, preferred: &[crate::config::AuthMethod]) -> Option<crate::config::AuthMethod> {
        preferred
            .iter()
            .find(|m| self.methods.contains(&m.wire_code()))
            .copied()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::AuthMethod;

    #[test]
    fn round_trips() {
        let challenge = AuthChallenge::new([7u8; CHALLENGE_LEN], vec![1, 2, 3]);
        let decoded = AuthChallenge::decode(&challenge.encode()).unwrap();
        assert_eq!(decoded, challenge);
    }

    #[test]
    fn chooses_highest_preference_method_present() {
        let challenge = AuthChallenge::new([0u8; CHALLENGE_LEN], vec![1, 3]);
        let preferred = [
            AuthMethod::Ed25519Sha256Rfc5705,
            AuthMethod::RsaSha256Rfc5705,
            AuthMethod::RsaSha256TlsSecret,
        ];
        assert_eq!(challenge.choose_method(&preferred), Some(AuthMethod::Ed25519Sha256Rfc5705));
    }

    #[test]
    fn no_overlap_yields_none() {
        let challenge = AuthChallenge::new([0u8; CHALLENGE_LEN], vec![99]);
        let preferred = [AuthMethod::RsaSha256TlsSecret];
        assert_eq!(challenge.choose_method(&preferred), None);
    }
}
