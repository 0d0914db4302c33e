use axum::{extract::State, http::HeaderMap};
use serde::Deserialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path, Query};
use crate::models::*;
use crate::update_mask::translate;
use crate::util::{extract_request_info, normalize_instance_domain};

use super::filters;

fn normalize_domain(domain: &str) -> Result<String> {
    normalize_instance_domain(domain)
        .map_err(|e| AppError::InvalidArgument(format!("invalid instance domain: {}", e)))
}

fn load_subscription(
    conn: &rusqlite::Connection,
    id: &str,
) -> Result<SubscriptionWithConditions> {
    queries::get_subscription_with_conditions(conn, id)?
        .ok_or_else(|| AppError::NotFound("subscription not found".into()))
}

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub subscription: SubscriptionPayload,
    /// Recorded on the CREATED condition
    #[serde(default)]
    pub message: Option<String>,
}

/// POST /v1/subscriptions
pub async fn create_subscription(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateSubscriptionRequest>,
) -> Result<Json<SubscriptionWithConditions>> {
    let sub = body.subscription;
    if sub.display_name.trim().is_empty() {
        return Err(AppError::InvalidArgument(
            "display_name is required".into(),
        ));
    }
    let Some(instance_type) = sub.instance_type else {
        return Err(AppError::InvalidArgument(
            "instance_type is required".into(),
        ));
    };
    if !sub.id.is_empty() {
        return Err(AppError::InvalidArgument(
            "subscription id cannot be set".into(),
        ));
    }
    let instance_domain = if sub.instance_domain.is_empty() {
        None
    } else {
        Some(normalize_domain(&sub.instance_domain)?)
    };

    let conn = state.db.get()?;
    let id = queries::generate_subscription_id();
    if queries::get_subscription(&conn, &id)?.is_some() {
        return Err(AppError::Internal("generated subscription ID is taken".into()));
    }

    let now = queries::now();
    let salesforce_subscription_id = sub.salesforce_subscription_id();
    queries::upsert_subscription(
        &conn,
        &id,
        &UpsertSubscriptionOptions {
            display_name: Some(Some(sub.display_name.clone())),
            instance_domain: instance_domain.map(Some),
            instance_type: Some(Some(instance_type)),
            salesforce_subscription_id: (!salesforce_subscription_id.is_empty())
                .then(|| Some(salesforce_subscription_id.to_string())),
            created_at: Some(now),
            ..Default::default()
        },
        Some(&Condition {
            status: ConditionStatus::Created,
            message: body.message,
            transition_time: now,
        }),
    )?;

    let (ip, user_agent) = extract_request_info(&headers);
    tracing::info!(
        target: "audit",
        subscription_id = %id,
        ip = ?ip,
        user_agent = ?user_agent,
        "subscription created"
    );

    Ok(Json(load_subscription(&conn, &id)?))
}

/// GET /v1/subscriptions/{id}
pub async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SubscriptionWithConditions>> {
    let conn = state.db.get()?;
    Ok(Json(load_subscription(&conn, &id)?))
}

/// Repeatable filters match any of their values; distinct filters are
/// combined with AND.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListSubscriptionsQuery {
    pub subscription_id: Vec<String>,
    pub is_archived: Option<bool>,
    pub instance_domain: Vec<String>,
    /// Case-insensitive substring of the display name
    pub display_name: Vec<String>,
    pub salesforce_subscription_id: Vec<String>,
    pub page_size: Option<i64>,
}

/// GET /v1/subscriptions
pub async fn list_subscriptions(
    State(state): State<AppState>,
    Query(query): Query<ListSubscriptionsQuery>,
) -> Result<Json<Vec<SubscriptionWithConditions>>> {
    let filter = ListSubscriptionsFilter {
        ids: filters::repeated("subscription_id", query.subscription_id)?,
        is_archived: query.is_archived,
        instance_domains: filters::repeated("instance_domain", query.instance_domain)?
            .iter()
            .map(|d| normalize_domain(d))
            .collect::<Result<_>>()?,
        display_name_substring: filters::substring("display_name", query.display_name)?,
        salesforce_subscription_ids: filters::repeated(
            "salesforce_subscription_id",
            query.salesforce_subscription_id,
        )?,
        limit: query.page_size,
    };

    let conn = state.db.get()?;
    let subscriptions = queries::list_subscriptions(&conn, &filter)?;

    let mut result = Vec::with_capacity(subscriptions.len());
    for subscription in subscriptions {
        let conditions = queries::list_subscription_conditions(&conn, &subscription.id)?;
        result.push(SubscriptionWithConditions {
            subscription,
            conditions,
        });
    }
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub subscription: SubscriptionPayload,
    #[serde(default)]
    pub update_mask: Vec<String>,
}

/// PATCH /v1/subscriptions/{id}
pub async fn update_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<UpdateSubscriptionRequest>,
) -> Result<Json<SubscriptionWithConditions>> {
    if !body.subscription.id.is_empty() && body.subscription.id != id {
        return Err(AppError::InvalidArgument(
            "subscription id does not match path".into(),
        ));
    }

    let conn = state.db.get()?;
    let existing = load_subscription(&conn, &id)?;
    if existing.subscription.is_archived() {
        return Err(AppError::InvalidArgument(
            "archived subscriptions cannot be updated".into(),
        ));
    }

    let mut opts = translate(&body.subscription, &body.update_mask)?;
    if let Some(Some(domain)) = opts.instance_domain.as_mut() {
        *domain = normalize_domain(domain)?;
    }
    queries::upsert_subscription(&conn, &id, &opts, None)?;

    let (ip, user_agent) = extract_request_info(&headers);
    tracing::info!(
        target: "audit",
        subscription_id = %id,
        update_mask = ?body.update_mask,
        ip = ?ip,
        user_agent = ?user_agent,
        "subscription updated"
    );

    Ok(Json(load_subscription(&conn, &id)?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ArchiveSubscriptionRequest {
    pub reason: String,
}

/// POST /v1/subscriptions/{id}/archive
/// Revokes every active license of the subscription, then archives it.
pub async fn archive_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ArchiveSubscriptionRequest>,
) -> Result<Json<SubscriptionWithConditions>> {
    let conn = state.db.get()?;
    load_subscription(&conn, &id)?;

    let archived_at = queries::now();
    let revoke_message = if body.reason.is_empty() {
        "Subscription archival".to_string()
    } else {
        format!("Subscription archival: {}", body.reason)
    };
    let (ip, user_agent) = extract_request_info(&headers);

    let mut revoked_licenses = Vec::new();
    for license in queries::list_licenses_for_subscription(&conn, &id)? {
        if license.revoked_at.is_some() {
            continue;
        }
        if let Err(e) =
            queries::revoke_license(&conn, &license.id, Some(&revoke_message), archived_at)
        {
            tracing::info!(
                target: "audit",
                subscription_id = %id,
                revoked_licenses = ?revoked_licenses,
                ip = ?ip,
                user_agent = ?user_agent,
                "subscription archival interrupted"
            );
            return Err(AppError::internal(
                e,
                &format!("failed to revoke license {}", license.id),
            ));
        }
        revoked_licenses.push(license.id);
    }

    queries::upsert_subscription(
        &conn,
        &id,
        &UpsertSubscriptionOptions {
            archived_at: Some(archived_at),
            ..Default::default()
        },
        Some(&Condition {
            status: ConditionStatus::Archived,
            message: (!body.reason.is_empty()).then_some(body.reason),
            transition_time: archived_at,
        }),
    )?;

    tracing::info!(
        target: "audit",
        subscription_id = %id,
        revoked_licenses = ?revoked_licenses,
        ip = ?ip,
        user_agent = ?user_agent,
        "subscription archived"
    );

    Ok(Json(load_subscription(&conn, &id)?))
}
