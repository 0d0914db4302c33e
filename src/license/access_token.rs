//! Opaque bearer tokens derived from a license key.
//!
//! The token is a one-way function of the key, so a deployment can present it
//! in place of the key without ever sending the key itself.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Prefix identifying a license-key-based access token.
pub const LICENSE_ACCESS_TOKEN_PREFIX: &str = "slk_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessTokenError {
    #[error("invalid token prefix")]
    InvalidPrefix,
    #[error("invalid token encoding")]
    InvalidEncoding,
}

/// SHA-256 digest of a license key, as stored alongside the license.
pub fn license_key_hash(license_key: &str) -> Vec<u8> {
    Sha256::digest(license_key.as_bytes()).to_vec()
}

/// Generate the access token for a license key: `slk_` + hex(sha256(key)).
pub fn generate_access_token(license_key: &str) -> String {
    format!(
        "{}{}",
        LICENSE_ACCESS_TOKEN_PREFIX,
        hex::encode(license_key_hash(license_key))
    )
}

/// Extract the raw license key hash from an access token.
pub fn extract_access_token_contents(token: &str) -> Result<Vec<u8>, AccessTokenError> {
    let encoded = token
        .strip_prefix(LICENSE_ACCESS_TOKEN_PREFIX)
        .ok_or(AccessTokenError::InvalidPrefix)?;
    hex::decode(encoded).map_err(|_| AccessTokenError::InvalidEncoding)
}

/// Whether a presented credential uses the access token format.
pub fn is_access_token(value: &str) -> bool {
    value.starts_with(LICENSE_ACCESS_TOKEN_PREFIX)
}
