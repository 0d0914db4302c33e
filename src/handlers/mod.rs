mod cody_gateway;
mod filters;
mod license_checks;
mod licenses;
mod subscriptions;

pub use cody_gateway::*;
pub use license_checks::*;
pub use licenses::*;
pub use subscriptions::*;

use axum::{
    Router,
    routing::{get, patch, post},
};

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/v1/license-checks", post(check_license_key))
        .route("/v1/subscriptions", post(create_subscription))
        .route("/v1/subscriptions", get(list_subscriptions))
        .route("/v1/subscriptions/{id}", get(get_subscription))
        .route("/v1/subscriptions/{id}", patch(update_subscription))
        .route("/v1/subscriptions/{id}/archive", post(archive_subscription))
        .route("/v1/subscriptions/{id}/licenses", post(create_license))
        .route("/v1/subscriptions/{id}/licenses", get(list_licenses))
        .route("/v1/licenses", get(list_all_licenses))
        .route("/v1/licenses/{id}", patch(update_license))
        .route("/v1/licenses/{id}/revoke", post(revoke_license))
        .route(
            "/v1/subscriptions/{id}/cody-gateway-access",
            get(get_cody_gateway_access),
        )
        .route(
            "/v1/subscriptions/{id}/cody-gateway-access",
            patch(update_cody_gateway_access),
        )
}

async fn health() -> &'static str {
    "ok"
}
