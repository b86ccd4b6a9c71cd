//! CERTS cell: parsing the `(type, length, body)` triples and verifying the
//! mixed RSA/Ed25519 certificate chain.
//!
//! Grounded on `tor-cert`'s typestate API
//! (`Ed25519Cert::decode` → `KeyUnknownCert` → `UncheckedCert` →
//! `SigCheckedCert`) and `tor-cert::rsa::RsaCrosscert` for the RSA→Ed25519
//! cross-certificate, verified through `tor_checkable::{SelfSigned,
//! ExternallySigned, Timebound}`.

use std::time::SystemTime;

use tor_cert::rsa::RsaCrosscert;
use tor_cert::Ed25519Cert;
use tor_checkable::{ExternallySigned, SelfSigned, Timebound};
use tor_llcrypto::pk::ed25519::{self, ValidatableEd25519Signature};
use tor_llcrypto::pk::rsa::PublicKey as RsaPublicKey;
use x509_cert::der::Decode;

/// The seven recognized CERTS-cell entry types (§4.6 table). Numeric values
/// match the link-handshake certificate type field in the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertsCellType {
    /// X.509, RSA1024_ID_LINK: link TLS cert.
    RsaIdLink,
    /// X.509, RSA1024_ID_ID: identity cert.
    RsaIdId,
    /// X.509, RSA1024_ID_AUTH: authentication cert.
    RsaIdAuth,
    /// Ed25519Cert, ED_ID_SIGN: id → signing.
    EdIdSign,
    /// Ed25519Cert, ED_SIGN_LINK: signing → link.
    EdSignLink,
    /// Ed25519Cert, ED_SIGN_AUTH: signing → auth.
    EdSignAuth,
    /// Raw RsaCrosscert, RSA1024_ID_EDID.
    RsaIdEdId,
}

impl CertsCellType {
    fn from_wire(value: u8) -> Option<Self> {
        Some(match value {
            1 => CertsCellType::RsaIdLink,
            2 => CertsCellType::RsaIdId,
            3 => CertsCellType::RsaIdAuth,
            4 => CertsCellType::EdIdSign,
            5 => CertsCellType::EdSignLink,
            6 => CertsCellType::EdSignAuth,
            7 => CertsCellType::RsaIdEdId,
            _ => return None,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CertsError {
    #[error("CERTS payload truncated")]
    Truncated,
    #[error("unrecognized certificate type {0}")]
    UnrecognizedType(u8),
    #[error("duplicate certificate type in CERTS cell")]
    Duplicate,
    #[error("malformed X.509 certificate")]
    MalformedX509,
    #[error("malformed Ed25519 certificate: {0}")]
    MalformedEd25519(tor_bytes::Error),
    #[error("malformed RSA cross-certificate: {0}")]
    MalformedCrosscert(tor_bytes::Error),
    #[error("certificate chain verification failed: {0}")]
    ChainInvalid(&'static str),
    #[error("required certificate type missing: {0:?}")]
    Missing(CertsCellType),
}

/// One raw `(type, body)` entry, as parsed off the wire before semantic
/// verification.
pub struct RawCertEntry {
    pub cert_type: CertsCellType,
    pub body: Vec<u8>,
}

/// Parses a CERTS payload: `n (1), {type (1), cert_len (2 BE), cert[cert_len]}
/// × n`. Each type may appear at most once.
pub fn parse(payload: &[u8]) -> Result<Vec<RawCertEntry>, CertsError> {
    let mut pos = 0usize;
    let n = *payload.first().ok_or(CertsError::Truncated)? as usize;
    pos += 1;

    let mut seen = [false; 8];
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        if payload.len() < pos + 3 {
            return Err(CertsError::Truncated);
        }
        let raw_type = payload[pos];
        let cert_type = CertsCellType::from_wire(raw_type).ok_or(CertsError::UnrecognizedType(raw_type))?;
        let len = u16::from_be_bytes([payload[pos + 1], payload[pos + 2]]) as usize;
        pos += 3;
        if payload.len() < pos + len {
            return Err(CertsError::Truncated);
        }
        let body = payload[pos..pos + len].to_vec();
        pos += len;

        if seen[raw_type as usize] {
            return Err(CertsError::Duplicate);
        }
        seen[raw_type as usize] = true;

        out.push(RawCertEntry { cert_type, body });
    }
    Ok(out)
}

/// The outcome of a verified chain: the authenticated identities, when
/// present.
pub struct VerifiedChain {
    pub rsa_identity: tor_llcrypto::pk::rsa::RsaIdentity,
    pub ed25519_identity: Option<ed25519::Ed25519Identity>,
}

pub(crate) fn spki_der(x509_bytes: &[u8]) -> Result<Vec<u8>, CertsError> {
    let cert = x509_cert::Certificate::from_der(x509_bytes).map_err(|_| CertsError::MalformedX509)?;
    Ok(cert
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .raw_bytes()
        .to_vec())
}

/// Verifies the full chain per §4.6: every Ed signature valid and
/// unexpired, the RSA id cert's key matches the cross-cert, and the link
/// cert's key matches the TLS peer key.
///
/// `tls_peer_spki` is the subject public key info of the certificate the
/// TLS layer actually negotiated with, used to confirm the link cert isn't
/// being presented for a different key.
pub fn verify_chain(entries: &[RawCertEntry], tls_peer_spki: &[u8], now: SystemTime) -> Result<VerifiedChain, CertsError> {
    let find = |t: CertsCellType| entries.iter().find(|e| e.cert_type == t);

    let rsa_id = find(CertsCellType::RsaIdId).ok_or(CertsError::Missing(CertsCellType::RsaIdId))?;
    let rsa_link = find(CertsCellType::RsaIdLink).ok_or(CertsError::Missing(CertsCellType::RsaIdLink))?;

    let id_spki = spki_der(&rsa_id.body)?;
    let id_pubkey = RsaPublicKey::from_der(&id_spki).ok_or(CertsError::MalformedX509)?;
    let rsa_identity = id_pubkey.to_rsa_identity();

    let link_spki = spki_der(&rsa_link.body)?;
    if link_spki != tls_peer_spki {
        return Err(CertsError::ChainInvalid("link cert key does not match TLS peer key"));
    }

    let mut ed25519_identity = None;

    if let Some(cross) = find(CertsCellType::RsaIdEdId) {
        let id_sign = find(CertsCellType::EdIdSign).ok_or(CertsError::Missing(CertsCellType::EdIdSign))?;

        let id_sign_unknown = Ed25519Cert::decode(&id_sign.body).map_err(CertsError::MalformedEd25519)?;
        let id_sign_unchecked = id_sign_unknown
            .should_have_signing_key()
            .map_err(|_| CertsError::ChainInvalid("ED_ID_SIGN missing signing key"))?;
        let ed_identity = *id_sign_unchecked.peek_signing_key();
        let (id_sign_checked, id_sign_sig) = id_sign_unchecked
            .dangerously_split()
            .map_err(|_| CertsError::ChainInvalid("ED_ID_SIGN malformed"))?;

        let sign_link = find(CertsCellType::EdSignLink).ok_or(CertsError::Missing(CertsCellType::EdSignLink))?;
        let (_cert, sign_link_sig) = decode_signed_ed_leaf(&sign_link.body, &ed_identity, now)?;

        // Batch-verify both ed25519 leaf signatures together, as the teacher's
        // handshake does for the analogous identity->signing and
        // signing->tls-cert pair.
        if !ed25519::validate_batch(&[&id_sign_sig, &sign_link_sig]) {
            return Err(CertsError::ChainInvalid("invalid ed25519 signature in cert chain"));
        }
        id_sign_checked.is_valid_at(&now).map_err(|_| CertsError::ChainInvalid("ED_ID_SIGN expired"))?;

        let crosscert = RsaCrosscert::decode(&cross.body)
            .map_err(CertsError::MalformedCrosscert)?
            .check_signature(&id_pubkey)
            .map_err(|_| CertsError::ChainInvalid("RSA->Ed crosscert signature invalid"))?
            .check_valid_at(&now)
            .map_err(|_| CertsError::ChainInvalid("RSA->Ed crosscert expired"))?;
        if !crosscert.subject_key_matches(&ed_identity) {
            return Err(CertsError::ChainInvalid("RSA->Ed crosscert subject key mismatch"));
        }

        ed25519_identity = Some(ed_identity);
    }

    Ok(VerifiedChain {
        rsa_identity,
        ed25519_identity,
    })
}

fn decode_signed_ed_leaf(body: &[u8], signing_key: &ed25519::Ed25519Identity, now: SystemTime) -> Result<(tor_cert::SigCheckedCert, ed25519::ValidatableEd25519Signature), CertsError> {
    let unknown = Ed25519Cert::decode(body).map_err(CertsError::MalformedEd25519)?;
    let unchecked = unknown
        .should_be_signed_with(signing_key)
        .map_err(|_| CertsError::ChainInvalid("ed25519 leaf cert key mismatch"))?;
    let (checked, sig) = unchecked.dangerously_split().map_err(|_| CertsError::ChainInvalid("ed25519 leaf cert malformed"))?;
    checked.is_valid_at(&now).map_err(|_| CertsError::ChainInvalid("ed25519 leaf cert expired"))?;
    Ok((checked, sig))
}
