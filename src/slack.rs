//! Slack notifications.
//!
//! Messages are posted to an incoming-webhook URL. With no URL configured the
//! message is only logged, so local deployments need no Slack workspace.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::models::{LicenseKeyData, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlackPayload {
    pub text: String,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("posting to Slack: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Slack returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Destination for operator-facing notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn post(&self, payload: SlackPayload) -> Result<(), NotifyError>;
}

#[derive(Clone)]
pub struct SlackClient {
    webhook_url: Option<String>,
    http_client: Client,
}

impl SlackClient {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            webhook_url,
            http_client: Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for SlackClient {
    async fn post(&self, payload: SlackPayload) -> Result<(), NotifyError> {
        let Some(webhook_url) = &self.webhook_url else {
            tracing::info!(text = %payload.text, "Slack webhook not configured, logging message only");
            return Ok(());
        };

        let response = self
            .http_client
            .post(webhook_url)
            .json(&payload)
            .send()
            .await?;

        if response.status().is_success() {
            tracing::debug!("Slack message posted");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(NotifyError::Status { status, body })
        }
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format("%b %-d, %Y %-I:%M%P UTC").to_string()
}

/// Announcement posted when a new license key is issued.
pub fn render_license_creation_message(
    now: DateTime<Utc>,
    env_name: &str,
    subscription: &Subscription,
    key: &LicenseKeyData,
    creation_message: Option<&str>,
) -> String {
    let info = &key.info;
    let days_remaining = (info.expires_at - now).num_seconds() as f64 / 86400.0;
    let tags = if info.tags.is_empty() {
        "none".to_string()
    } else {
        format!("`{}`", info.tags.join("`, `"))
    };

    format!(
        "A new license was created for subscription {} ({}, env {}):\n\n\
         • *Expiration (UTC)*: {} ({:.1} days remaining)\n\
         • *User count*: {}\n\
         • *License tags*: {}\n\
         • *Salesforce subscription*: {}\n\
         • *Salesforce opportunity*: {}\n\
         • *Message*: {}",
        subscription
            .display_name
            .as_deref()
            .unwrap_or(&subscription.id),
        subscription.id,
        env_name,
        format_time(info.expires_at),
        days_remaining,
        info.user_count,
        tags,
        subscription
            .salesforce_subscription_id
            .as_deref()
            .unwrap_or("unknown"),
        info.salesforce_opportunity_id.as_deref().unwrap_or("unknown"),
        creation_message.unwrap_or(""),
    )
}

/// Security alert for a license presented by an instance it is not bound to.
pub fn render_instance_mismatch_message(
    subscription_id: &str,
    license_id: &str,
    detected_instance_id: &str,
    instance_id: &str,
) -> String {
    format!(
        "License {} of subscription {} has already been used by instance `{}`, \
         but was just presented by instance `{}`",
        license_id, subscription_id, detected_instance_id, instance_id
    )
}
