use axum::{extract::State, http::HeaderMap};
use serde::Deserialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::models::*;
use crate::update_mask::translate;
use crate::util::extract_request_info;

/// GET /v1/subscriptions/{id}/cody-gateway-access
pub async fn get_cody_gateway_access(
    State(state): State<AppState>,
    Path(subscription_id): Path<String>,
) -> Result<Json<CodyGatewayAccess>> {
    let conn = state.db.get()?;
    if queries::get_subscription(&conn, &subscription_id)?.is_none() {
        return Err(AppError::NotFound("subscription not found".into()));
    }

    let access = queries::get_cody_gateway_access(&conn, &subscription_id)?
        .unwrap_or_else(|| CodyGatewayAccess::unconfigured(&subscription_id));
    Ok(Json(access))
}

#[derive(Debug, Deserialize)]
pub struct UpdateCodyGatewayAccessRequest {
    pub access: CodyGatewayAccessPayload,
    #[serde(default)]
    pub update_mask: Vec<String>,
}

/// PATCH /v1/subscriptions/{id}/cody-gateway-access
pub async fn update_cody_gateway_access(
    State(state): State<AppState>,
    Path(subscription_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<UpdateCodyGatewayAccessRequest>,
) -> Result<Json<CodyGatewayAccess>> {
    let opts = translate(&body.access, &body.update_mask)?;

    let conn = state.db.get()?;
    let subscription = queries::get_subscription(&conn, &subscription_id)?
        .ok_or_else(|| AppError::NotFound("subscription not found".into()))?;
    if subscription.is_archived() {
        return Err(AppError::InvalidArgument(
            "archived subscriptions cannot be updated".into(),
        ));
    }

    let access = queries::upsert_cody_gateway_access(&conn, &subscription_id, &opts)?;

    let (ip, user_agent) = extract_request_info(&headers);
    tracing::info!(
        target: "audit",
        subscription_id = %subscription_id,
        update_mask = ?body.update_mask,
        ip = ?ip,
        user_agent = ?user_agent,
        "cody gateway access updated"
    );

    Ok(Json(access))
}
