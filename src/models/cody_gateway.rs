use serde::{Deserialize, Serialize};

/// Stored Cody Gateway access for a subscription. Unset limits fall back to
/// the defaults implied by the subscription's active license.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodyGatewayAccess {
    pub subscription_id: String,
    pub enabled: bool,
    pub chat_completions_rate_limit: Option<i64>,
    pub chat_completions_rate_limit_interval_seconds: Option<i64>,
    pub code_completions_rate_limit: Option<i64>,
    pub code_completions_rate_limit_interval_seconds: Option<i64>,
    pub embeddings_rate_limit: Option<i64>,
    pub embeddings_rate_limit_interval_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl CodyGatewayAccess {
    /// Access for a subscription that has never been configured.
    pub fn unconfigured(subscription_id: &str) -> Self {
        Self {
            subscription_id: subscription_id.to_string(),
            enabled: false,
            chat_completions_rate_limit: None,
            chat_completions_rate_limit_interval_seconds: None,
            code_completions_rate_limit: None,
            code_completions_rate_limit_interval_seconds: None,
            embeddings_rate_limit: None,
            embeddings_rate_limit_interval_seconds: None,
            created_at: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RateLimitPayload {
    pub limit: i64,
    pub interval_duration_seconds: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CodyGatewayAccessPayload {
    pub enabled: bool,
    pub chat_completions_rate_limit: Option<RateLimitPayload>,
    pub code_completions_rate_limit: Option<RateLimitPayload>,
    pub embeddings_rate_limit: Option<RateLimitPayload>,
}

/// Column intents for a Cody Gateway access upsert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertCodyGatewayAccessOptions {
    pub enabled: Option<bool>,
    pub chat_completions_rate_limit: Option<Option<i64>>,
    pub chat_completions_rate_limit_interval_seconds: Option<Option<i64>>,
    pub code_completions_rate_limit: Option<Option<i64>>,
    pub code_completions_rate_limit_interval_seconds: Option<Option<i64>>,
    pub embeddings_rate_limit: Option<Option<i64>>,
    pub embeddings_rate_limit_interval_seconds: Option<Option<i64>>,
    pub force_update: bool,
}
