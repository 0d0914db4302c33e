//! Loading of the ed25519 keys used to sign and verify license keys.

use std::path::Path;

use ed25519_dalek::{SigningKey, VerifyingKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyLoadError {
    #[error("reading key file: {0}")]
    Io(#[from] std::io::Error),
    #[error("key is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("key must be 32 bytes, got {0}")]
    Length(usize),
    #[error("invalid public key: {0}")]
    Invalid(#[from] ed25519_dalek::SignatureError),
}

fn decode_key_bytes(hex_text: &str) -> Result<[u8; 32], KeyLoadError> {
    let bytes = hex::decode(hex_text.trim())?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| KeyLoadError::Length(len))
}

/// Parse a hex-encoded ed25519 public key.
pub fn parse_verifying_key(hex_text: &str) -> Result<VerifyingKey, KeyLoadError> {
    Ok(VerifyingKey::from_bytes(&decode_key_bytes(hex_text)?)?)
}

/// Load a hex-encoded ed25519 signing key from a file.
pub fn load_signing_key(path: &Path) -> Result<SigningKey, KeyLoadError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(SigningKey::from_bytes(&decode_key_bytes(&contents)?))
}
