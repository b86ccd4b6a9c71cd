//! AUTHENTICATE cell: the initiator's proof of identity, checked by the
//! responder against the method it offered in AUTH_CHALLENGE.
//!
//! Wire format (spec.md §6): `type (2 BE), len (2 BE), body[len]`; `body` is
//! at least 24 bytes, the final 24 being an 8-byte random nonce followed by
//! a 16-byte hash prefix for the two RSA methods, or a `V3_AUTH_BODY_LEN`
//! fixed prefix followed by a 64-byte Ed25519 signature for the Ed method.
//! The fixed portion preceding that tail is the material both sides compute
//! independently from the handshake transcript (certs exchanged, TLS keying
//! material, and so on); this module only checks the signature over it, not
//! the caller-supplied transcript bytes themselves.

use sha2::{Digest, Sha256};

use tor_llcrypto::pk::ed25519::{self, ValidatableEd25519Signature};
use tor_llcrypto::pk::rsa::PublicKey as RsaPublicKey;

use crate::config::AuthMethod;

/// Trailing nonce + RSA hash-prefix length, per spec.md §6.
const RSA_TAIL_LEN: usize = 24;
/// Trailing Ed25519 signature length.
const ED_SIG_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticate {
    pub auth_type: u16,
    pub body: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthenticateError {
    #[error("AUTHENTICATE payload truncated")]
    Truncated,
    #[error("AUTHENTICATE body too short for method {0}")]
    BodyTooShort(u16),
    #[error("AUTHENTICATE signature did not verify")]
    BadSignature,
    #[error("unknown AUTHENTICATE method {0}")]
    UnknownMethod(u16),
}

impl Authenticate {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.body.len());
        out.extend_from_slice(&self.auth_type.to_be_bytes());
        out.extend_from_slice(&(self.body.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self, AuthenticateError> {
        if payload.len() < 4 {
            return Err(AuthenticateError::Truncated);
        }
        let auth_type = u16::from_be_bytes([payload[0], payload[1]]);
        let len = u16::from_be_bytes([payload[2], payload[3]]) as usize;
        let body = payload.get(4..4 + len).ok_or(AuthenticateError::Truncated)?.to_vec();
        Ok(Self { auth_type, body })
    }

    /// Verifies this AUTHENTICATE body against the expected transcript
    /// `expected_fixed_prefix` (the bytes both sides compute independently,
    /// without the trailing nonce/signature), using the method implied by
    /// `auth_type`.
    pub fn verify(
        &self,
        method: AuthMethod,
        expected_fixed_prefix: &[u8],
        rsa_auth_key: Option<&RsaPublicKey>,
        ed_sign_auth_key: Option<&ed25519::Ed25519Identity>,
    ) -> Result<(), AuthenticateError> {
        match method {
            AuthMethod::RsaSha256TlsSecret | AuthMethod::RsaSha256Rfc5705 => {
                if self.body.len() < RSA_TAIL_LEN {
                    return Err(AuthenticateError::BodyTooShort(self.auth_type));
                }
                let fixed = &self.body[..self.body.len() - RSA_TAIL_LEN];
                if fixed != expected_fixed_prefix {
                    return Err(AuthenticateError::BadSignature);
                }
                let sig = &self.body[self.body.len() - RSA_TAIL_LEN..];
                let key = rsa_auth_key.ok_or(AuthenticateError::BadSignature)?;
                let digest = Sha256::digest(fixed);
                key.verify(&digest, sig).map_err(|_| AuthenticateError::BadSignature)
            }
            AuthMethod::Ed25519Sha256Rfc5705 => {
                if self.body.len() < ED_SIG_LEN {
                    return Err(AuthenticateError::BodyTooShort(self.auth_type));
                }
                let fixed = &self.body[..self.body.len() - ED_SIG_LEN];
                if fixed != expected_fixed_prefix {
                    return Err(AuthenticateError::BadSignature);
                }
                let sig_bytes = &self.body[self.body.len() - ED_SIG_LEN..];
                let signature =
                    ed25519::Signature::try_from(sig_bytes).map_err(|_| AuthenticateError::BadSignature)?;
                let identity = ed_sign_auth_key.ok_or(AuthenticateError::BadSignature)?;
                let public_key: ed25519::PublicKey = identity
                    .try_into()
                    .map_err(|_| AuthenticateError::BadSignature)?;
                let validatable = ValidatableEd25519Signature::new(public_key, signature, fixed);
                if ed25519::validate_batch(&[&validatable]) {
                    Ok(())
                } else {
                    Err(AuthenticateError::BadSignature)
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips() {
        let auth = Authenticate {
            auth_type: 3,
            body: vec![1, 2, 3, 4, 5],
        };
        let decoded = Authenticate::decode(&auth.encode()).unwrap();
        assert_eq!(decoded, auth);
    }

    #[test]
    fn rsa_verify_rejects_mismatched_fixed_prefix() {
        let auth = Authenticate {
            auth_type: AuthMethod::RsaSha256TlsSecret.wire_code(),
            body: vec![0u8; RSA_TAIL_LEN + 4],
        };
        let err = auth
            .verify(AuthMethod::RsaSha256TlsSecret, b"not-the-same-prefix", None, None)
            .unwrap_err();
        assert!(matches!(err, AuthenticateError::BadSignature));
    }

    #[test]
    fn ed_verify_rejects_short_body() {
        let auth = Authenticate {
            auth_type: AuthMethod::Ed25519Sha256Rfc5705.wire_code(),
            body: vec![0u8; 10],
        };
        let err = auth
            .verify(AuthMethod::Ed25519Sha256Rfc5705, b"", None, None)
            .unwrap_err();
        assert!(matches!(err, AuthenticateError::BodyTooShort(_)));
    }
}
