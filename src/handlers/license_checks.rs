use axum::extract::State;
use serde::Deserialize;

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;
use crate::validator::CheckLicenseKeyResult;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CheckLicenseKeyRequest {
    /// Signed license key, or an `slk_` access token derived from one
    pub license_key: String,
    pub instance_id: String,
}

/// POST /v1/license-checks
pub async fn check_license_key(
    State(state): State<AppState>,
    Json(body): Json<CheckLicenseKeyRequest>,
) -> Result<Json<CheckLicenseKeyResult>> {
    let result = state
        .validator
        .check_license_key(&body.license_key, &body.instance_id)
        .await?;
    Ok(Json(result))
}
