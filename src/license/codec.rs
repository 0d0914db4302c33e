//! License key encoding, signing and verification.
//!
//! A signed key is URL-safe unpadded base64 of a JSON wrapper:
//!
//! ```text
//! {"sig": {"format": "ed25519", "blob": <base64>}, "info": <base64 of info JSON>}
//! ```
//!
//! where the info JSON is `{v, n, t, u, c, e, sf_sub_id?, sf_opp_id?}`. The
//! signature covers the raw info bytes exactly as they appear in the wrapper.
//! An unset creation time travels as the zero time `0001-01-01T00:00:00Z`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SIGNATURE_FORMAT: &str = "ed25519";

#[derive(Debug, Error)]
pub enum LicenseKeyError {
    #[error("decoding license key: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("parsing license key: {0}")]
    Json(#[from] serde_json::Error),
    #[error("license key version mismatch: encoded {encoded}, derived {derived}")]
    VersionMismatch { encoded: u32, derived: u32 },
    #[error("unsupported signature format {0:?}")]
    SignatureFormat(String),
    #[error("verifying license key signature: {0}")]
    Signature(#[from] ed25519_dalek::SignatureError),
}

/// Entitlement metadata carried inside a signed license key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseInfo {
    #[serde(rename = "t")]
    pub tags: Vec<String>,
    #[serde(rename = "u")]
    pub user_count: u32,
    #[serde(rename = "c", default, with = "created_at")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "e")]
    pub expires_at: DateTime<Utc>,
    #[serde(rename = "sf_sub_id", default, skip_serializing_if = "Option::is_none")]
    pub salesforce_subscription_id: Option<String>,
    #[serde(rename = "sf_opp_id", default, skip_serializing_if = "Option::is_none")]
    pub salesforce_opportunity_id: Option<String>,
}

impl LicenseInfo {
    /// Format revision implied by which optional fields are populated.
    ///
    /// Version 2 added the Salesforce subscription, version 3 added the
    /// creation time.
    pub fn version(&self) -> u32 {
        if self.salesforce_subscription_id.is_none() {
            return 1;
        }
        if !self.created_at.is_some_and(|t| !created_at::is_zero(&t)) {
            return 2;
        }
        3
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

#[derive(Serialize, Deserialize)]
struct EncodedInfo {
    #[serde(rename = "v")]
    version: u32,
    /// Random bytes so identical infos never produce identical keys.
    #[serde(rename = "n")]
    nonce: [u8; 8],
    #[serde(flatten)]
    info: LicenseInfo,
}

#[derive(Serialize, Deserialize)]
struct KeySignature {
    format: String,
    #[serde(with = "b64")]
    blob: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct SignedKey {
    sig: KeySignature,
    #[serde(with = "b64")]
    info: Vec<u8>,
}

/// Encode and sign a license key.
pub fn encode_license_key(
    info: &LicenseInfo,
    signing_key: &SigningKey,
) -> Result<String, LicenseKeyError> {
    let mut nonce = [0u8; 8];
    OsRng.fill_bytes(&mut nonce);

    let encoded_info = serde_json::to_vec(&EncodedInfo {
        version: info.version(),
        nonce,
        info: info.clone(),
    })?;
    let signature = signing_key.sign(&encoded_info);

    let wrapper = serde_json::to_vec(&SignedKey {
        sig: KeySignature {
            format: SIGNATURE_FORMAT.to_string(),
            blob: signature.to_bytes().to_vec(),
        },
        info: encoded_info,
    })?;
    Ok(URL_SAFE_NO_PAD.encode(wrapper))
}

/// Remove all whitespace from a pasted license key.
pub fn compact_license_key(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Parse a signed license key and verify it against `public_key`.
///
/// Whitespace anywhere in `text` is ignored, since keys are routinely pasted
/// from email. Returns the decoded info and the raw signature blob.
pub fn verify_license_key(
    text: &str,
    public_key: &VerifyingKey,
) -> Result<(LicenseInfo, Vec<u8>), LicenseKeyError> {
    let compact = compact_license_key(text);
    let wrapper = URL_SAFE_NO_PAD.decode(compact.as_bytes())?;
    let signed: SignedKey = serde_json::from_slice(&wrapper)?;

    let decoded: EncodedInfo = serde_json::from_slice(&signed.info)?;
    let derived = decoded.info.version();
    if decoded.version != derived {
        return Err(LicenseKeyError::VersionMismatch {
            encoded: decoded.version,
            derived,
        });
    }

    if signed.sig.format != SIGNATURE_FORMAT {
        return Err(LicenseKeyError::SignatureFormat(signed.sig.format));
    }
    let signature = Signature::from_slice(&signed.sig.blob)?;
    public_key.verify_strict(&signed.info, &signature)?;

    Ok((decoded.info, signed.sig.blob))
}

/// The creation time is always on the wire. Keys minted before it existed
/// carry the zero time, which decodes as unset.
mod created_at {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    const ZERO_TIME: &str = "0001-01-01T00:00:00Z";
    const ZERO_TIME_UNIX: i64 = -62_135_596_800;

    pub fn is_zero(t: &DateTime<Utc>) -> bool {
        matches!(t.timestamp(), ZERO_TIME_UNIX | 0)
    }

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match (*value).filter(|t| !is_zero(t)) {
            Some(t) => t.serialize(serializer),
            None => serializer.serialize_str(ZERO_TIME),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let value = Option::<DateTime<Utc>>::deserialize(deserializer)?;
        Ok(value.filter(|t| !is_zero(t)))
    }
}

/// Byte fields are carried as standard padded base64 strings.
mod b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
