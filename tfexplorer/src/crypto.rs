use ed25519_dalek::{PublicKey, Signature, Verifier};
use sha2::{Digest, Sha256};
use std::convert::TryFrom;
use std::fmt;

/// Verify an ed25519 signature over `message`, made by the owner of the hex encoded public
/// key.
pub fn verify(pubkey_hex: &str, message: &[u8], signature: &[u8]) -> Result<(), SignatureError> {
    let key_bytes = hex::decode(pubkey_hex).map_err(|e| SignatureError::Key(e.to_string()))?;
    let key = PublicKey::from_bytes(&key_bytes).map_err(|e| SignatureError::Key(e.to_string()))?;
    let signature =
        Signature::try_from(signature).map_err(|e| SignatureError::Malformed(e.to_string()))?;
    key.verify(message, &signature)
        .map_err(|_| SignatureError::Invalid)
}

/// Like [`verify`], but the signature is hex encoded.
pub fn verify_hex(pubkey_hex: &str, message: &[u8], signature_hex: &str) -> Result<(), SignatureError> {
    let signature =
        hex::decode(signature_hex).map_err(|e| SignatureError::Malformed(e.to_string()))?;
    verify(pubkey_hex, message, &signature)
}

/// Sha256 digest of a message, as signed by clients for challenges.
pub fn challenge_hash(challenge: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(challenge.as_bytes());
    hasher.finalize().to_vec()
}

/// An error while checking a signature.
#[derive(Debug, Clone, PartialEq)]
pub enum SignatureError {
    /// The public key could not be decoded.
    Key(String),
    /// The signature could not be decoded.
    Malformed(String),
    /// The signature does not match the message and key.
    Invalid,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SignatureError::Key(e) => write!(f, "invalid public key: {}", e),
            SignatureError::Malformed(e) => write!(f, "malformed signature: {}", e),
            SignatureError::Invalid => write!(f, "signature verification failed"),
        }
    }
}

impl std::error::Error for SignatureError {}
