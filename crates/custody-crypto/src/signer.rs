use std::fmt;
use std::ops::Deref;

use chrono::Utc;
use custody_types::{Link, LinkSignature, SIGNATURE_ALGORITHM};
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::spki::{DecodePublicKey, EncodePublicKey};
use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use ed25519_dalek::{Signer, Verifier};
use sha2::{Digest as _, Sha256};

use crate::canonical::{canonicalize, CanonicalError};

/// Errors from signing and key handling. Verification never errors.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("link {sequence} is already signed")]
    AlreadySigned { sequence: u64 },

    #[error("canonical encoding failed: {0}")]
    Canonical(#[from] CanonicalError),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("key encoding failed: {0}")]
    KeyEncoding(String),
}

/// An operator's Ed25519 signing identity.
pub struct OperatorKeypair {
    signer_id: String,
    key: ed25519_dalek::SigningKey,
}

/// An operator's Ed25519 verifying key.
#[derive(Clone, PartialEq, Eq)]
pub struct OperatorPublicKey(ed25519_dalek::VerifyingKey);

/// Ed25519 signature.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

/// Generate a fresh keypair from the OS RNG.
pub fn generate_keypair(signer_id: impl Into<String>) -> OperatorKeypair {
    OperatorKeypair::generate(signer_id)
}

/// The bytes actually passed to Ed25519: the lowercase hex SHA-256 digest of
/// the content, as ASCII.
fn signing_message(content_bytes: &[u8]) -> Vec<u8> {
    hex::encode(Sha256::digest(content_bytes)).into_bytes()
}

impl OperatorKeypair {
    pub fn generate(signer_id: impl Into<String>) -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            signer_id: signer_id.into(),
            key: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

    pub fn from_secret_bytes(signer_id: impl Into<String>, bytes: [u8; 32]) -> Self {
        Self {
            signer_id: signer_id.into(),
            key: ed25519_dalek::SigningKey::from_bytes(&bytes),
        }
    }

    /// Load a PKCS#8 PEM private key.
    pub fn from_pkcs8_pem(signer_id: impl Into<String>, pem: &str) -> Result<Self, SigningError> {
        let key = ed25519_dalek::SigningKey::from_pkcs8_pem(pem)
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        Ok(Self {
            signer_id: signer_id.into(),
            key,
        })
    }

    /// PKCS#8 PEM encoding of the private key. The buffer is zeroed on drop.
    pub fn to_pkcs8_pem(&self) -> Result<impl Deref<Target = String>, SigningError> {
        self.key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| SigningError::KeyEncoding(e.to_string()))
    }

    pub fn signer_id(&self) -> &str {
        &self.signer_id
    }

    pub fn public_key(&self) -> OperatorPublicKey {
        OperatorPublicKey(self.key.verifying_key())
    }

    pub fn public_key_hex(&self) -> String {
        self.public_key().to_hex()
    }

    /// Sign canonical content bytes.
    pub fn sign(&self, content_bytes: &[u8]) -> Signature {
        Signature(self.key.sign(&signing_message(content_bytes)))
    }
}

impl fmt::Debug for OperatorKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorKeypair")
            .field("signer_id", &self.signer_id)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl OperatorPublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SigningError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SigningError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;
        let key = ed25519_dalek::VerifyingKey::from_bytes(&arr)
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        Ok(Self(key))
    }

    pub fn from_hex(s: &str) -> Result<Self, SigningError> {
        let bytes = hex::decode(s.trim()).map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Load an SPKI PEM public key.
    pub fn from_public_key_pem(pem: &str) -> Result<Self, SigningError> {
        let key = ed25519_dalek::VerifyingKey::from_public_key_pem(pem)
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        Ok(Self(key))
    }

    pub fn to_public_key_pem(&self) -> Result<String, SigningError> {
        self.0
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| SigningError::KeyEncoding(e.to_string()))
    }

    pub fn as_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    /// Verify `signature` over canonical content bytes.
    pub fn verify(&self, content_bytes: &[u8], signature: &Signature) -> bool {
        self.0
            .verify(&signing_message(content_bytes), &signature.0)
            .is_ok()
    }
}

impl fmt::Debug for OperatorPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperatorPublicKey({})", self.to_hex())
    }
}

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 64] = bytes.try_into().ok()?;
        Some(Self(ed25519_dalek::Signature::from_bytes(&arr)))
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", hex::encode(&self.0.to_bytes()[..8]))
    }
}

/// Check raw signature and public key bytes against content bytes.
///
/// Malformed keys or signatures simply fail.
pub fn verify(content_bytes: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    let Ok(key) = OperatorPublicKey::from_bytes(public_key) else {
        return false;
    };
    let Some(signature) = Signature::from_bytes(signature) else {
        return false;
    };
    key.verify(content_bytes, &signature)
}

/// Sign a link over its canonical form without the signature block.
pub fn sign_link(link: Link, keypair: &OperatorKeypair) -> Result<Link, SigningError> {
    if link.is_signed() {
        return Err(SigningError::AlreadySigned {
            sequence: link.sequence,
        });
    }
    let bytes = canonicalize(&link.signable())?;
    let signature = keypair.sign(&bytes);
    tracing::debug!(
        sequence = link.sequence,
        signer = keypair.signer_id(),
        "link signed"
    );

    let block = LinkSignature {
        signature: signature.to_hex(),
        public_key: keypair.public_key_hex(),
        signer_id: keypair.signer_id().to_string(),
        signed_at: Utc::now(),
        algorithm: SIGNATURE_ALGORITHM.to_string(),
    };
    let sequence = link.sequence;
    link.with_signature(block)
        .map_err(|_| SigningError::AlreadySigned { sequence })
}

/// Returns `true` if the link carries a signature that verifies against the
/// embedded public key. Unsigned links return `false`.
pub fn verify_link_signature(link: &Link) -> bool {
    let Some(block) = &link.signature else {
        return false;
    };
    if block.algorithm != SIGNATURE_ALGORITHM {
        return false;
    }
    let (Ok(signature), Ok(public_key)) = (hex::decode(&block.signature), hex::decode(&block.public_key))
    else {
        return false;
    };
    match canonicalize(&link.signable()) {
        Ok(bytes) => verify(&bytes, &signature, &public_key),
        Err(_) => false,
    }
}
