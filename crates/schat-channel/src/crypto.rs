//! Session key agreement and payload encryption
//!
//! Each session is keyed from an X25519 exchange between a fresh ephemeral
//! on both sides. Ephemerals are signed with the long-term Ed25519 identity.

use aes_gcm::Aes256Gcm;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use sha2::{Digest, Sha256, Sha512};
use x25519_dalek::{EphemeralSecret, PublicKey};

use schat_core::{CipherAlgorithm, DigestAlgorithm};

use crate::error::{ChannelError, Result};
use crate::frame::SessionNumber;

const REQUEST_CONTEXT: &[u8] = b"schat session request";
const RESPONSE_CONTEXT: &[u8] = b"schat session response";

// ----------------------------------------------------------------------------
// Key agreement
// ----------------------------------------------------------------------------

/// Fresh X25519 ephemeral and its public half
pub fn generate_ephemeral() -> (EphemeralSecret, [u8; 32]) {
    let secret = EphemeralSecret::random_from_rng(rand_core::OsRng);
    let public = PublicKey::from(&secret).to_bytes();
    (secret, public)
}

/// Bytes the requester signs
pub fn request_transcript(session_number: SessionNumber, requester_ephemeral: &[u8; 32]) -> Vec<u8> {
    let mut transcript = Vec::with_capacity(REQUEST_CONTEXT.len() + 4 + 32);
    transcript.extend_from_slice(REQUEST_CONTEXT);
    transcript.extend_from_slice(&session_number.to_le_bytes());
    transcript.extend_from_slice(requester_ephemeral);
    transcript
}

/// Bytes the responder signs
pub fn response_transcript(
    session_number: SessionNumber,
    requester_ephemeral: &[u8; 32],
    responder_ephemeral: &[u8; 32],
) -> Vec<u8> {
    let mut transcript = Vec::with_capacity(RESPONSE_CONTEXT.len() + 4 + 64);
    transcript.extend_from_slice(RESPONSE_CONTEXT);
    transcript.extend_from_slice(&session_number.to_le_bytes());
    transcript.extend_from_slice(requester_ephemeral);
    transcript.extend_from_slice(responder_ephemeral);
    transcript
}

/// Derive the 32-byte session key from the shared secret and both ephemerals
pub fn derive_session_key(
    digest: DigestAlgorithm,
    secret: EphemeralSecret,
    peer_ephemeral: &[u8; 32],
    requester_ephemeral: &[u8; 32],
    responder_ephemeral: &[u8; 32],
    session_number: SessionNumber,
) -> Result<[u8; 32]> {
    let shared = secret.diffie_hellman(&PublicKey::from(*peer_ephemeral));
    if !shared.was_contributory() {
        return Err(ChannelError::crypto("non-contributory key exchange"));
    }

    let mut input = Vec::with_capacity(32 * 3 + 4);
    input.extend_from_slice(shared.as_bytes());
    input.extend_from_slice(requester_ephemeral);
    input.extend_from_slice(responder_ephemeral);
    input.extend_from_slice(&session_number.to_le_bytes());

    let mut key = [0u8; 32];
    match digest {
        DigestAlgorithm::Sha256 => key.copy_from_slice(&Sha256::digest(&input)),
        DigestAlgorithm::Sha512 => key.copy_from_slice(&Sha512::digest(&input)[..32]),
    }
    Ok(key)
}

/// First of our ciphers the peer also offers
pub fn negotiate_cipher(ours: &[CipherAlgorithm], theirs: &[CipherAlgorithm]) -> Option<CipherAlgorithm> {
    ours.iter().copied().find(|cipher| theirs.contains(cipher))
}

// ----------------------------------------------------------------------------
// Payload encryption
// ----------------------------------------------------------------------------

/// AEAD keyed for one session direction
pub enum SessionCipher {
    ChaCha20Poly1305(Box<ChaCha20Poly1305>),
    Aes256Gcm(Box<Aes256Gcm>),
}

impl SessionCipher {
    pub fn new(algorithm: CipherAlgorithm, key: &[u8; 32]) -> Result<Self> {
        let invalid = |_| ChannelError::crypto("invalid session key length");
        Ok(match algorithm {
            CipherAlgorithm::ChaCha20Poly1305 => {
                SessionCipher::ChaCha20Poly1305(Box::new(ChaCha20Poly1305::new_from_slice(key).map_err(invalid)?))
            }
            CipherAlgorithm::Aes256Gcm => {
                SessionCipher::Aes256Gcm(Box::new(Aes256Gcm::new_from_slice(key).map_err(invalid)?))
            }
        })
    }

    pub fn encrypt(&self, sequence: u64, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = nonce_for(sequence);
        let payload = Payload { msg: plaintext, aad };
        let sealed = match self {
            SessionCipher::ChaCha20Poly1305(cipher) => cipher.encrypt(Nonce::from_slice(&nonce), payload),
            SessionCipher::Aes256Gcm(cipher) => cipher.encrypt(Nonce::from_slice(&nonce), payload),
        };
        sealed.map_err(|_| ChannelError::crypto("encryption failed"))
    }

    pub fn decrypt(&self, sequence: u64, aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let nonce = nonce_for(sequence);
        let payload = Payload { msg: ciphertext, aad };
        let opened = match self {
            SessionCipher::ChaCha20Poly1305(cipher) => cipher.decrypt(Nonce::from_slice(&nonce), payload),
            SessionCipher::Aes256Gcm(cipher) => cipher.decrypt(Nonce::from_slice(&nonce), payload),
        };
        opened.map_err(|_| ChannelError::crypto("authentication failed"))
    }
}

impl core::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SessionCipher::ChaCha20Poly1305(_) => f.write_str("SessionCipher(chacha20-poly1305)"),
            SessionCipher::Aes256Gcm(_) => f.write_str("SessionCipher(aes-256-gcm)"),
        }
    }
}

/// Sequence number, little-endian, zero-padded to 96 bits
fn nonce_for(sequence: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..8].copy_from_slice(&sequence.to_le_bytes());
    nonce
}
