//! Translation of update requests into upsert options.
//!
//! An update carries the resource payload and an optional field mask:
//!
//! - no mask: every non-zero payload field is written, zero fields are left
//!   alone;
//! - `*`: every updatable field is written, zero values included;
//! - explicit paths: exactly the named fields are written, zero values
//!   included. Nested paths such as `chat_completions_rate_limit.limit`
//!   address a single sub-field.
//!
//! Unknown paths reject the whole request before anything is written.

use thiserror::Error;

use crate::error::AppError;
use crate::models::*;

pub const WILDCARD: &str = "*";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MaskError {
    #[error("unknown field path: {0}")]
    UnknownPath(String),
}

impl From<MaskError> for AppError {
    fn from(err: MaskError) -> Self {
        AppError::InvalidArgument(err.to_string())
    }
}

/// A payload that can be applied to its resource's upsert options.
pub trait MaskedResource {
    type Options: Default;

    /// Every path accepted in a mask, excluding the wildcard.
    const FIELD_PATHS: &'static [&'static str];

    /// Set every field whose payload value is non-zero.
    fn apply_present(&self, opts: &mut Self::Options);

    /// Set the field at `path` to its payload value, zero included. Only
    /// called with entries of [`Self::FIELD_PATHS`].
    fn apply_path(&self, path: &str, opts: &mut Self::Options);

    fn set_force_update(opts: &mut Self::Options);
}

pub fn translate<R: MaskedResource>(
    resource: &R,
    mask: &[String],
) -> Result<R::Options, MaskError> {
    if let Some(unknown) = mask
        .iter()
        .find(|p| p.as_str() != WILDCARD && !R::FIELD_PATHS.contains(&p.as_str()))
    {
        return Err(MaskError::UnknownPath(unknown.clone()));
    }

    let mut opts = R::Options::default();
    if mask.is_empty() {
        resource.apply_present(&mut opts);
        return Ok(opts);
    }

    if mask.iter().any(|p| p == WILDCARD) {
        R::set_force_update(&mut opts);
        for path in R::FIELD_PATHS {
            resource.apply_path(path, &mut opts);
        }
    }
    for path in mask.iter().filter(|p| p.as_str() != WILDCARD) {
        resource.apply_path(path, &mut opts);
    }
    Ok(opts)
}

/// Empty strings clear the column.
fn nullable(value: &str) -> Option<Option<String>> {
    if value.is_empty() {
        Some(None)
    } else {
        Some(Some(value.to_string()))
    }
}

fn non_empty(value: &str) -> Option<Option<String>> {
    (!value.is_empty()).then(|| Some(value.to_string()))
}

fn non_zero(value: i64) -> Option<Option<i64>> {
    (value != 0).then_some(Some(value))
}

impl MaskedResource for SubscriptionPayload {
    type Options = UpsertSubscriptionOptions;

    const FIELD_PATHS: &'static [&'static str] = &[
        "instance_domain",
        "instance_type",
        "display_name",
        "salesforce.subscription_id",
    ];

    fn apply_present(&self, opts: &mut Self::Options) {
        opts.instance_domain = non_empty(&self.instance_domain);
        opts.display_name = non_empty(&self.display_name);
        opts.salesforce_subscription_id = non_empty(self.salesforce_subscription_id());
        if self.instance_type.is_some() {
            opts.instance_type = Some(self.instance_type);
        }
    }

    fn apply_path(&self, path: &str, opts: &mut Self::Options) {
        match path {
            "instance_domain" => opts.instance_domain = nullable(&self.instance_domain),
            "instance_type" => opts.instance_type = Some(self.instance_type),
            "display_name" => opts.display_name = nullable(&self.display_name),
            "salesforce.subscription_id" => {
                opts.salesforce_subscription_id = nullable(self.salesforce_subscription_id())
            }
            _ => {}
        }
    }

    fn set_force_update(opts: &mut Self::Options) {
        opts.force_update = true;
    }
}

impl MaskedResource for LicensePayload {
    type Options = UpsertLicenseOptions;

    const FIELD_PATHS: &'static [&'static str] = &["detected_instance_id"];

    fn apply_present(&self, opts: &mut Self::Options) {
        opts.detected_instance_id = non_empty(&self.detected_instance_id);
    }

    fn apply_path(&self, path: &str, opts: &mut Self::Options) {
        if path == "detected_instance_id" {
            opts.detected_instance_id = nullable(&self.detected_instance_id);
        }
    }

    fn set_force_update(opts: &mut Self::Options) {
        opts.force_update = true;
    }
}

const RATE_LIMITS: [&str; 3] = [
    "chat_completions_rate_limit",
    "code_completions_rate_limit",
    "embeddings_rate_limit",
];

type RateLimitColumns<'a> = (&'a mut Option<Option<i64>>, &'a mut Option<Option<i64>>);

fn rate_limit_columns<'a>(
    opts: &'a mut UpsertCodyGatewayAccessOptions,
    name: &str,
) -> Option<RateLimitColumns<'a>> {
    match name {
        "chat_completions_rate_limit" => Some((
            &mut opts.chat_completions_rate_limit,
            &mut opts.chat_completions_rate_limit_interval_seconds,
        )),
        "code_completions_rate_limit" => Some((
            &mut opts.code_completions_rate_limit,
            &mut opts.code_completions_rate_limit_interval_seconds,
        )),
        "embeddings_rate_limit" => Some((
            &mut opts.embeddings_rate_limit,
            &mut opts.embeddings_rate_limit_interval_seconds,
        )),
        _ => None,
    }
}

impl CodyGatewayAccessPayload {
    fn rate_limit(&self, name: &str) -> Option<&RateLimitPayload> {
        match name {
            "chat_completions_rate_limit" => self.chat_completions_rate_limit.as_ref(),
            "code_completions_rate_limit" => self.code_completions_rate_limit.as_ref(),
            "embeddings_rate_limit" => self.embeddings_rate_limit.as_ref(),
            _ => None,
        }
    }
}

impl MaskedResource for CodyGatewayAccessPayload {
    type Options = UpsertCodyGatewayAccessOptions;

    const FIELD_PATHS: &'static [&'static str] = &[
        "enabled",
        "chat_completions_rate_limit",
        "chat_completions_rate_limit.limit",
        "chat_completions_rate_limit.interval_duration_seconds",
        "code_completions_rate_limit",
        "code_completions_rate_limit.limit",
        "code_completions_rate_limit.interval_duration_seconds",
        "embeddings_rate_limit",
        "embeddings_rate_limit.limit",
        "embeddings_rate_limit.interval_duration_seconds",
    ];

    fn apply_present(&self, opts: &mut Self::Options) {
        if self.enabled {
            opts.enabled = Some(true);
        }
        for name in RATE_LIMITS {
            let Some(rate_limit) = self.rate_limit(name) else {
                continue;
            };
            if let Some((limit, interval)) = rate_limit_columns(opts, name) {
                *limit = non_zero(rate_limit.limit);
                *interval = non_zero(rate_limit.interval_duration_seconds);
            }
        }
    }

    fn apply_path(&self, path: &str, opts: &mut Self::Options) {
        if path == "enabled" {
            opts.enabled = Some(self.enabled);
            return;
        }

        let (name, sub_field) = match path.split_once('.') {
            Some((name, sub_field)) => (name, Some(sub_field)),
            None => (path, None),
        };
        // An absent sub-message resets to the default limits.
        let rate_limit = self.rate_limit(name);
        let limit_value = Some(rate_limit.map(|r| r.limit));
        let interval_value = Some(rate_limit.map(|r| r.interval_duration_seconds));

        let Some((limit, interval)) = rate_limit_columns(opts, name) else {
            return;
        };
        match sub_field {
            None => {
                *limit = limit_value;
                *interval = interval_value;
            }
            Some("limit") => *limit = limit_value,
            Some("interval_duration_seconds") => *interval = interval_value,
            Some(_) => {}
        }
    }

    fn set_force_update(opts: &mut Self::Options) {
        opts.force_update = true;
    }
}
