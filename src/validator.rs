//! Request-time license validation.
//!
//! `check_license_key` resolves a presented license key (or its `slk_` access
//! token) to a stored license and decides whether the calling instance may
//! use it. The first instance to present a license is bound to it; any other
//! instance presenting the same license afterwards is rejected and reported.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::db::{StoreError, StoreResult};
use crate::error::{AppError, Result};
use crate::license::{
    compact_license_key, extract_access_token_contents, is_access_token, verify_license_key,
};
use crate::models::{Subscription, SubscriptionLicense};
use crate::slack::{Notifier, SlackPayload, render_instance_mismatch_message};

pub const REASON_EXPIRED: &str = "license has expired";
pub const REASON_REVOKED: &str = "license has been revoked";
pub const REASON_SUBSCRIPTION_NOT_FOUND: &str = "subscription not found";
pub const REASON_USED_BY_ANOTHER_INSTANCE: &str =
    "license has already been used by another instance";

const DEFAULT_NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

/// License lookups and the instance binding write.
pub trait LicenseStore: Send + Sync {
    fn get_by_license_key(&self, license_key: &str) -> StoreResult<Vec<SubscriptionLicense>>;
    fn get_by_license_key_hash(&self, hash: &[u8]) -> StoreResult<Vec<SubscriptionLicense>>;
    fn set_detected_instance(&self, license_id: &str, instance_id: &str) -> StoreResult<()>;
    /// Fails with [`StoreError::NotFound`] when the subscription does not exist.
    fn get_subscription(&self, subscription_id: &str) -> StoreResult<Subscription>;
}

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Accept every check without consulting the store.
    pub bypass_all_license_checks: bool,
    pub public_key: VerifyingKey,
    pub notification_timeout: Duration,
}

impl ValidatorConfig {
    pub fn new(public_key: VerifyingKey) -> Self {
        Self {
            bypass_all_license_checks: false,
            public_key,
            notification_timeout: DEFAULT_NOTIFICATION_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckLicenseKeyResult {
    pub valid: bool,
    /// Empty when `valid`.
    pub reason: String,
}

impl CheckLicenseKeyResult {
    fn valid() -> Self {
        Self {
            valid: true,
            reason: String::new(),
        }
    }

    fn invalid(reason: &str) -> Self {
        Self {
            valid: false,
            reason: reason.to_string(),
        }
    }
}

pub struct LicenseValidator {
    config: ValidatorConfig,
    store: Arc<dyn LicenseStore>,
    notifier: Arc<dyn Notifier>,
}

/// Every codec failure collapses to this one error so callers cannot tell
/// which verification step rejected the key.
fn invalid_key(err: impl std::fmt::Display) -> AppError {
    tracing::debug!(error = %err, "license key failed verification");
    AppError::InvalidArgument("key is invalid".to_string())
}

impl LicenseValidator {
    pub fn new(
        config: ValidatorConfig,
        store: Arc<dyn LicenseStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            store,
            notifier,
        }
    }

    pub async fn check_license_key(
        &self,
        license_key: &str,
        instance_id: &str,
    ) -> Result<CheckLicenseKeyResult> {
        if license_key.is_empty() {
            return Err(AppError::InvalidArgument(
                "license key is required".to_string(),
            ));
        }
        if instance_id.is_empty() {
            return Err(AppError::InvalidArgument(
                "instance ID is required".to_string(),
            ));
        }

        if self.config.bypass_all_license_checks {
            tracing::warn!(
                instance_id = %instance_id,
                "bypassing license check: all license checks are disabled"
            );
            return Ok(CheckLicenseKeyResult::valid());
        }

        let license = self.resolve_license(license_key)?;
        let now = Utc::now().timestamp();

        if license.is_expired(now) {
            return Ok(CheckLicenseKeyResult::invalid(REASON_EXPIRED));
        }
        if license.is_revoked(now) {
            return Ok(CheckLicenseKeyResult::invalid(REASON_REVOKED));
        }

        let subscription = match self.store.get_subscription(&license.subscription_id) {
            Ok(subscription) => subscription,
            Err(StoreError::NotFound(_)) => {
                return Ok(CheckLicenseKeyResult::invalid(
                    REASON_SUBSCRIPTION_NOT_FOUND,
                ));
            }
            Err(e) => return Err(AppError::internal(e, "failed to look up subscription")),
        };

        if subscription.is_internal() {
            return Ok(CheckLicenseKeyResult::valid());
        }

        let Some(detected) = license.detected_instance_id.as_deref() else {
            self.store
                .set_detected_instance(&license.id, instance_id)
                .map_err(|e| AppError::internal(e, "failed to record instance usage"))?;
            tracing::info!(
                target: "audit",
                license_id = %license.id,
                subscription_id = %license.subscription_id,
                instance_id = %instance_id,
                "license bound to instance"
            );
            return Ok(CheckLicenseKeyResult::valid());
        };

        if detected.to_lowercase() == instance_id.to_lowercase() {
            return Ok(CheckLicenseKeyResult::valid());
        }

        self.notify_instance_mismatch(&license, detected, instance_id);
        Ok(CheckLicenseKeyResult::invalid(
            REASON_USED_BY_ANOTHER_INSTANCE,
        ))
    }

    /// Keys are stored without whitespace, so the compacted form is used for
    /// both verification and lookup.
    fn resolve_license(&self, license_key: &str) -> Result<SubscriptionLicense> {
        let license_key = compact_license_key(license_key);
        let lookup = if is_access_token(&license_key) {
            let hash = extract_access_token_contents(&license_key).map_err(invalid_key)?;
            self.store.get_by_license_key_hash(&hash)
        } else {
            verify_license_key(&license_key, &self.config.public_key).map_err(invalid_key)?;
            self.store.get_by_license_key(&license_key)
        };
        let matches = lookup.map_err(|e| AppError::internal(e, "failed to look up license"))?;

        let mut matches = matches.into_iter();
        let Some(license) = matches.next() else {
            return Err(AppError::NotFound("license not found".to_string()));
        };
        if matches.next().is_some() {
            return Err(AppError::internal(
                format!("multiple licenses match license {}", license.id),
                "failed to look up license",
            ));
        }
        Ok(license)
    }

    /// Detached from the caller: the alert goes out even if the request is
    /// cancelled, and delivery failures are only logged.
    fn notify_instance_mismatch(
        &self,
        license: &SubscriptionLicense,
        detected_instance_id: &str,
        instance_id: &str,
    ) {
        tracing::warn!(
            license_id = %license.id,
            subscription_id = %license.subscription_id,
            detected_instance_id = %detected_instance_id,
            instance_id = %instance_id,
            "license presented by a different instance than the one bound to it"
        );

        let payload = SlackPayload {
            text: render_instance_mismatch_message(
                &license.subscription_id,
                &license.id,
                detected_instance_id,
                instance_id,
            ),
        };
        let notifier = Arc::clone(&self.notifier);
        let timeout = self.config.notification_timeout;
        let license_id = license.id.clone();

        tokio::spawn(async move {
            match tokio::time::timeout(timeout, notifier.post(payload)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(error = %e, license_id = %license_id, "failed to post instance mismatch alert");
                }
                Err(_) => {
                    tracing::warn!(license_id = %license_id, "instance mismatch alert timed out");
                }
            }
        });
    }
}
