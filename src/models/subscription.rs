use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InstanceType {
    Primary,
    Secondary,
    /// Internal and development instances, exempt from instance binding
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub display_name: Option<String>,
    pub instance_domain: Option<String>,
    pub instance_type: Option<InstanceType>,
    pub salesforce_subscription_id: Option<String>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<i64>,
}

impl Subscription {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    pub fn is_internal(&self) -> bool {
        self.instance_type == Some(InstanceType::Internal)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionWithConditions {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub conditions: Vec<Condition>,
}

/// Lifecycle events recorded against subscriptions and licenses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionStatus {
    Created,
    Archived,
    Revoked,
    InstanceUsageDetected,
}

/// An entry in a resource's append-only condition log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub status: ConditionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub transition_time: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SalesforceSubscription {
    pub subscription_id: String,
}

/// Subscription as supplied in create/update requests. Empty strings and
/// missing enums are the zero value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SubscriptionPayload {
    pub id: String,
    pub display_name: String,
    pub instance_domain: String,
    pub instance_type: Option<InstanceType>,
    pub salesforce: Option<SalesforceSubscription>,
}

impl SubscriptionPayload {
    pub fn salesforce_subscription_id(&self) -> &str {
        self.salesforce
            .as_ref()
            .map(|s| s.subscription_id.as_str())
            .unwrap_or("")
    }
}

/// Column intents for a subscription upsert. `None` leaves a column alone;
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertSubscriptionOptions {
    pub display_name: Option<Option<String>>,
    pub instance_domain: Option<Option<String>>,
    pub instance_type: Option<Option<InstanceType>>,
    pub salesforce_subscription_id: Option<Option<String>>,
    pub created_at: Option<i64>,
    pub archived_at: Option<i64>,
    /// Write every field, including absent ones, except protected columns
    pub force_update: bool,
}

#[derive(Debug, Default)]
pub struct ListSubscriptionsFilter {
    /// Any of these IDs
    pub ids: Vec<String>,
    pub is_archived: Option<bool>,
    /// Any of these normalized domains
    pub instance_domains: Vec<String>,
    pub display_name_substring: Option<String>,
    pub salesforce_subscription_ids: Vec<String>,
    pub limit: Option<i64>,
}
