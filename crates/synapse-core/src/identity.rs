//! Agent identity derivation and auth verification.
//!
//! A connecting client proves control of an Ed25519 key by signing the
//! canonical challenge string. The durable agent id is a hash of the
//! base64 SPKI DER public key exactly as the client supplied it, so a
//! fixed key pair maps to the same identity across sessions and
//! restarts.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::ids::AgentId;

/// Domain prefix of the canonical auth string. Versioned so a future
/// scheme change cannot replay old signatures.
pub const AUTH_DOMAIN_PREFIX: &str = "SYNAPSE_AUTH_V1";

/// Ed25519 public key length in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Ed25519 detached signature length in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// Challenge nonce length in bytes before base64 encoding.
const NONCE_LEN: usize = 32;

/// Generates a cryptographically strong base64 challenge nonce.
#[must_use]
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

/// Builds the canonical string the client must sign:
/// `SYNAPSE_AUTH_V1|v=<proto>|nonce=<nonce>|agent=<name>|pub=<pub>`.
#[must_use]
pub fn auth_canonical_string(proto: u8, nonce: &str, agent_name: &str, pub_der_b64: &str) -> String {
    format!("{AUTH_DOMAIN_PREFIX}|v={proto}|nonce={nonce}|agent={agent_name}|pub={pub_der_b64}")
}

/// Derives the stable agent id from the base64 SPKI DER public key:
/// `agent_<sha256 hex of the base64 string>`.
#[must_use]
pub fn agent_id_from_public_key(pub_der_b64: &str) -> AgentId {
    let digest = Sha256::digest(pub_der_b64.as_bytes());
    AgentId::from_string(format!("agent_{}", hex::encode(digest)))
}

/// Verifies a detached base64 Ed25519 signature over the canonical auth
/// string.
///
/// The public key is base64 SPKI DER; the raw Ed25519 key is the
/// trailing [`PUBLIC_KEY_LEN`] bytes of the DER blob. Returns `false`
/// for any malformed key, malformed signature, or verification failure;
/// the caller maps that to `signature_verification_failed`.
#[must_use]
pub fn verify_auth_signature(pub_der_b64: &str, signature_b64: &str, message: &str) -> bool {
    let Ok(der) = BASE64.decode(pub_der_b64) else {
        return false;
    };
    if der.len() < PUBLIC_KEY_LEN {
        return false;
    }
    let raw: [u8; PUBLIC_KEY_LEN] = match der[der.len() - PUBLIC_KEY_LEN..].try_into() {
        Ok(raw) => raw,
        Err(_) => return false,
    };
    let Ok(key) = VerifyingKey::from_bytes(&raw) else {
        return false;
    };

    let Ok(sig_bytes) = BASE64.decode(signature_b64) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return false;
    };

    key.verify(message.as_bytes(), &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    use super::*;

    /// Fixed 12-byte SPKI header for an Ed25519 public key.
    const SPKI_HEADER: [u8; 12] = [
        0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
    ];

    fn spki_b64(key: &SigningKey) -> String {
        let mut der = SPKI_HEADER.to_vec();
        der.extend_from_slice(key.verifying_key().as_bytes());
        BASE64.encode(der)
    }

    #[test]
    fn test_agent_id_is_deterministic() {
        let key = SigningKey::generate(&mut OsRng);
        let pub_b64 = spki_b64(&key);
        assert_eq!(
            agent_id_from_public_key(&pub_b64),
            agent_id_from_public_key(&pub_b64)
        );
        assert!(agent_id_from_public_key(&pub_b64)
            .as_str()
            .starts_with("agent_"));
    }

    #[test]
    fn test_signature_roundtrip() {
        let key = SigningKey::generate(&mut OsRng);
        let pub_b64 = spki_b64(&key);
        let nonce = generate_nonce();
        let message = auth_canonical_string(1, &nonce, "alice", &pub_b64);
        let signature = BASE64.encode(key.sign(message.as_bytes()).to_bytes());

        assert!(verify_auth_signature(&pub_b64, &signature, &message));
    }

    #[test]
    fn test_tampered_message_fails() {
        let key = SigningKey::generate(&mut OsRng);
        let pub_b64 = spki_b64(&key);
        let message = auth_canonical_string(1, "nonce", "alice", &pub_b64);
        let signature = BASE64.encode(key.sign(message.as_bytes()).to_bytes());

        let tampered = auth_canonical_string(1, "nonce", "mallory", &pub_b64);
        assert!(!verify_auth_signature(&pub_b64, &signature, &tampered));
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let message = auth_canonical_string(1, "nonce", "alice", "pub");
        let signature = BASE64.encode(key.sign(message.as_bytes()).to_bytes());

        assert!(!verify_auth_signature(&spki_b64(&other), &signature, &message));
    }

    #[test]
    fn test_garbage_inputs_fail_closed() {
        assert!(!verify_auth_signature("!!!", "sig", "msg"));
        assert!(!verify_auth_signature(&BASE64.encode([0u8; 8]), "sig", "msg"));
        let key = SigningKey::generate(&mut OsRng);
        assert!(!verify_auth_signature(&spki_b64(&key), "not-base64!!!", "msg"));
    }

    #[test]
    fn test_nonce_length_and_uniqueness() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_ne!(a, b);
        let decoded = BASE64.decode(&a).expect("nonce decodes");
        assert!(decoded.len() >= 24);
    }
}
