use std::sync::Arc;

use axum::{extract::State, http::HeaderMap};
use chrono::Utc;
use serde::Deserialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path, Query};
use crate::license::{LicenseInfo, encode_license_key};
use crate::models::*;
use crate::slack::{Notifier, SlackPayload, render_license_creation_message};
use crate::update_mask::translate;
use crate::util::extract_request_info;

use super::filters;

/// Requested tags followed by the deployment's required tags, without
/// duplicates or blanks.
fn merge_tags(requested: &[String], required: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::with_capacity(requested.len() + required.len());
    for tag in requested.iter().chain(required) {
        let tag = tag.trim();
        if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

/// Best effort: failures are logged, never returned.
fn post_creation_notice(
    notifier: Arc<dyn Notifier>,
    payload: SlackPayload,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = notifier.post(payload).await {
            tracing::warn!(error = %e, "failed to post license creation to Slack");
        }
    })
}

fn load_license(conn: &rusqlite::Connection, id: &str) -> Result<LicenseWithConditions> {
    queries::get_license_with_conditions(conn, id)?
        .ok_or_else(|| AppError::NotFound("license not found".into()))
}

/// POST /v1/subscriptions/{id}/licenses
pub async fn create_license(
    State(state): State<AppState>,
    Path(subscription_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CreateLicenseKey>,
) -> Result<Json<LicenseWithConditions>> {
    let Some(signing_key) = state.signing_key.as_ref() else {
        return Err(AppError::internal(
            "LICENSE_SIGNING_KEY_FILE is not set",
            "license signing is not configured",
        ));
    };
    if body.user_count == 0 {
        return Err(AppError::InvalidArgument(
            "user_count must be greater than zero".into(),
        ));
    }
    let now = Utc::now();
    if body.expires_at <= now {
        return Err(AppError::InvalidArgument(
            "expires_at must be in the future".into(),
        ));
    }

    let conn = state.db.get()?;
    let subscription = queries::get_subscription(&conn, &subscription_id)?
        .ok_or_else(|| AppError::NotFound("subscription not found".into()))?;
    if subscription.is_archived() {
        return Err(AppError::InvalidArgument(
            "target subscription is archived".into(),
        ));
    }

    let info = LicenseInfo {
        tags: merge_tags(&body.tags, &state.required_license_tags),
        user_count: body.user_count,
        created_at: Some(now),
        expires_at: body.expires_at,
        salesforce_subscription_id: subscription.salesforce_subscription_id.clone(),
        salesforce_opportunity_id: body
            .salesforce_opportunity_id
            .clone()
            .filter(|id| !id.is_empty()),
    };
    let signed_key = encode_license_key(&info, signing_key)
        .map_err(|e| AppError::internal(e, "failed to sign license key"))?;
    let data = LicenseKeyData { info, signed_key };

    let license = queries::create_license_key(
        &conn,
        &subscription_id,
        &data,
        now.timestamp(),
        body.message.as_deref(),
    )?;

    let payload = SlackPayload {
        text: render_license_creation_message(
            Utc::now(),
            &state.env_name,
            &subscription,
            &data,
            body.message.as_deref(),
        ),
    };
    post_creation_notice(Arc::clone(&state.notifier), payload);

    let (ip, user_agent) = extract_request_info(&headers);
    tracing::info!(
        target: "audit",
        subscription_id = %subscription_id,
        license_id = %license.id,
        ip = ?ip,
        user_agent = ?user_agent,
        "license created"
    );

    Ok(Json(load_license(&conn, &license.id)?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListLicensesQuery {
    pub subscription_id: Vec<String>,
    pub license_key_substring: Vec<String>,
    pub salesforce_opportunity_id: Vec<String>,
    /// With newest-first ordering, `page_size=1` yields the active license.
    pub page_size: Option<i64>,
}

impl ListLicensesQuery {
    fn into_filter(self) -> Result<ListLicensesFilter> {
        Ok(ListLicensesFilter {
            subscription_id: filters::single("subscription_id", self.subscription_id)?,
            license_key_substring: filters::substring(
                "license_key_substring",
                self.license_key_substring,
            )?,
            salesforce_opportunity_id: filters::single(
                "salesforce_opportunity_id",
                self.salesforce_opportunity_id,
            )?,
            limit: self.page_size,
        })
    }
}

fn load_licenses(
    conn: &rusqlite::Connection,
    filter: &ListLicensesFilter,
) -> Result<Vec<LicenseWithConditions>> {
    let licenses = queries::list_licenses(conn, filter)?;
    let mut result = Vec::with_capacity(licenses.len());
    for license in licenses {
        let conditions = queries::list_license_conditions(conn, &license.id)?;
        result.push(LicenseWithConditions {
            license,
            conditions,
        });
    }
    Ok(result)
}

/// GET /v1/licenses
/// Newest first, across all subscriptions unless filtered.
pub async fn list_all_licenses(
    State(state): State<AppState>,
    Query(query): Query<ListLicensesQuery>,
) -> Result<Json<Vec<LicenseWithConditions>>> {
    let filter = query.into_filter()?;
    let conn = state.db.get()?;
    Ok(Json(load_licenses(&conn, &filter)?))
}

/// GET /v1/subscriptions/{id}/licenses
/// Newest first.
pub async fn list_licenses(
    State(state): State<AppState>,
    Path(subscription_id): Path<String>,
    Query(query): Query<ListLicensesQuery>,
) -> Result<Json<Vec<LicenseWithConditions>>> {
    if !query.subscription_id.is_empty() {
        return Err(AppError::InvalidArgument(
            "invalid filter: \"subscription_id\" is taken from the path".into(),
        ));
    }
    let mut filter = query.into_filter()?;

    let conn = state.db.get()?;
    if queries::get_subscription(&conn, &subscription_id)?.is_none() {
        return Err(AppError::NotFound("subscription not found".into()));
    }
    filter.subscription_id = Some(subscription_id);
    Ok(Json(load_licenses(&conn, &filter)?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RevokeLicenseRequest {
    pub reason: String,
}

/// POST /v1/licenses/{id}/revoke
pub async fn revoke_license(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RevokeLicenseRequest>,
) -> Result<Json<LicenseWithConditions>> {
    let conn = state.db.get()?;
    let existing = load_license(&conn, &id)?;
    if existing.license.revoked_at.is_some() {
        return Err(AppError::InvalidArgument(
            "license is already revoked".into(),
        ));
    }

    let reason = (!body.reason.is_empty()).then_some(body.reason.as_str());
    let license = queries::revoke_license(&conn, &id, reason, queries::now())?;

    let (ip, user_agent) = extract_request_info(&headers);
    tracing::info!(
        target: "audit",
        subscription_id = %license.subscription_id,
        license_id = %license.id,
        ip = ?ip,
        user_agent = ?user_agent,
        "license revoked"
    );

    Ok(Json(load_license(&conn, &id)?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateLicenseRequest {
    pub license: LicensePayload,
    #[serde(default)]
    pub update_mask: Vec<String>,
}

/// PATCH /v1/licenses/{id}
/// Only the instance binding is mutable; clearing it lets a new instance
/// claim the license.
pub async fn update_license(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<UpdateLicenseRequest>,
) -> Result<Json<LicenseWithConditions>> {
    let opts = translate(&body.license, &body.update_mask)?;

    let conn = state.db.get()?;
    let license = queries::upsert_license(&conn, &id, &opts, None)?;

    let (ip, user_agent) = extract_request_info(&headers);
    tracing::info!(
        target: "audit",
        subscription_id = %license.subscription_id,
        license_id = %license.id,
        update_mask = ?body.update_mask,
        ip = ?ip,
        user_agent = ?user_agent,
        "license updated"
    );

    Ok(Json(load_license(&conn, &id)?))
}
