//! Local identity: Ed25519 signing key and the certificate presenting it
//!
//! The certificate file is TOML with a `subject` and a hex `public_key`; the
//! private key file holds the 32-byte Ed25519 seed as 64 hex characters.

use std::fs;
use std::path::Path;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::{CryptoRng, OsRng, RngCore};
use serde::{Deserialize, Serialize};

use schat_core::Certificate;

use crate::error::{ChannelError, Result};

// ----------------------------------------------------------------------------
// Identity Key Pair (Ed25519)
// ----------------------------------------------------------------------------

/// Ed25519 signing key pair
#[derive(Debug, Clone)]
pub struct IdentityKeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl IdentityKeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::generate_with_rng(&mut OsRng)
    }

    /// Generate a new key pair with a custom RNG
    pub fn generate_with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        Self::from_bytes(&seed)
    }

    /// Create from the raw 32-byte seed
    pub fn from_bytes(private_key: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(private_key);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    pub fn private_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn sign<T: AsRef<[u8]>>(&self, data: T) -> [u8; 64] {
        self.signing_key.sign(data.as_ref()).to_bytes()
    }

    /// Verify a signature made by `public_key`
    pub fn verify<D: AsRef<[u8]>>(public_key: &[u8; 32], data: D, signature: &[u8]) -> Result<()> {
        let verifying_key = VerifyingKey::from_bytes(public_key).map_err(|_| ChannelError::Signature)?;
        let signature: [u8; 64] = signature.try_into().map_err(|_| ChannelError::Signature)?;
        let signature = Signature::from_bytes(&signature);
        verifying_key
            .verify(data.as_ref(), &signature)
            .map_err(|_| ChannelError::Signature)
    }
}

// ----------------------------------------------------------------------------
// Identity (key pair + certificate)
// ----------------------------------------------------------------------------

/// Signing key together with the certificate presented to peers
#[derive(Debug, Clone)]
pub struct Identity {
    keypair: IdentityKeyPair,
    certificate: Certificate,
}

#[derive(Debug, Serialize, Deserialize)]
struct CertificateFile {
    subject: String,
    public_key: String,
}

impl Identity {
    /// Fresh identity for `subject`
    pub fn generate(subject: impl Into<String>) -> Self {
        let keypair = IdentityKeyPair::generate();
        let certificate = Certificate::new(subject, keypair.public_key_bytes());
        Self { keypair, certificate }
    }

    /// Pair a key with a certificate, checking that they match
    pub fn new(keypair: IdentityKeyPair, certificate: Certificate) -> Result<Self> {
        if keypair.public_key_bytes() != certificate.public_key {
            return Err(ChannelError::identity(format!(
                "private key does not match the certificate of {}",
                certificate.subject
            )));
        }
        Ok(Self { keypair, certificate })
    }

    /// Load the certificate and private key files
    pub fn load(certificate_path: &Path, private_key_path: &Path) -> Result<Self> {
        let certificate = fs::read_to_string(certificate_path)
            .map_err(|e| ChannelError::identity(format!("cannot read {}: {}", certificate_path.display(), e)))?;
        let certificate = parse_certificate(&certificate)?;

        let private_key = fs::read_to_string(private_key_path)
            .map_err(|e| ChannelError::identity(format!("cannot read {}: {}", private_key_path.display(), e)))?;
        let keypair = IdentityKeyPair::from_bytes(&decode_key(private_key.trim())?);

        Self::new(keypair, certificate)
    }

    /// Write the certificate and private key files
    pub fn save(&self, certificate_path: &Path, private_key_path: &Path) -> Result<()> {
        let certificate = CertificateFile {
            subject: self.certificate.subject.clone(),
            public_key: hex::encode(self.certificate.public_key),
        };
        fs::write(certificate_path, toml::to_string(&certificate)?)?;
        fs::write(private_key_path, format!("{}\n", hex::encode(self.keypair.private_key_bytes())))?;
        Ok(())
    }

    pub fn keypair(&self) -> &IdentityKeyPair {
        &self.keypair
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }
}

/// Parse the TOML certificate format
pub fn parse_certificate(contents: &str) -> Result<Certificate> {
    let file: CertificateFile = toml::from_str(contents)?;
    if file.subject.trim().is_empty() {
        return Err(ChannelError::identity("certificate subject is empty"));
    }
    Ok(Certificate::new(file.subject, decode_key(file.public_key.trim())?))
}

fn decode_key(hex_key: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_key)?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| ChannelError::identity(format!("expected a 32-byte key, got {} bytes", bytes.len())))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
