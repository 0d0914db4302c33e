use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use super::Condition;
use crate::license::LicenseInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LicenseType {
    Key,
}

/// License payload stored alongside a `key` license.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseKeyData {
    pub info: LicenseInfo,
    pub signed_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionLicense {
    pub id: String,
    pub subscription_id: String,
    pub license_type: LicenseType,
    pub license_data: LicenseKeyData,
    pub created_at: i64,
    pub expire_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<i64>,
    /// Deployment that first validated this license
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl SubscriptionLicense {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expire_at <= now
    }

    pub fn is_revoked(&self, now: i64) -> bool {
        self.revoked_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LicenseWithConditions {
    #[serde(flatten)]
    pub license: SubscriptionLicense,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Default)]
pub struct ListLicensesFilter {
    pub subscription_id: Option<String>,
    /// Case-sensitive substring of the signed key
    pub license_key_substring: Option<String>,
    pub salesforce_opportunity_id: Option<String>,
    pub limit: Option<i64>,
}

/// Request body for issuing a new license key.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateLicenseKey {
    #[serde(default)]
    pub tags: Vec<String>,
    pub user_count: u32,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub salesforce_opportunity_id: Option<String>,
    /// Free-form note recorded on the CREATED condition
    #[serde(default)]
    pub message: Option<String>,
}

/// Mutable license fields as supplied in update requests.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LicensePayload {
    pub detected_instance_id: String,
}

/// Column intents for a license upsert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertLicenseOptions {
    pub detected_instance_id: Option<Option<String>>,
    pub revoked_at: Option<i64>,
    pub force_update: bool,
}
