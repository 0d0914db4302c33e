use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::json;

use crate::common::*;

use entitlements::license::verify_license_key;

fn create_body(user_count: u32, expires_in: Duration) -> Option<serde_json::Value> {
    Some(json!({
        "tags": ["plan:enterprise"],
        "user_count": user_count,
        "expires_at": (Utc::now() + expires_in).to_rfc3339(),
        "salesforce_opportunity_id": "opp-1",
        "message": "first license"
    }))
}

#[tokio::test]
async fn test_create_license_signs_and_notifies() {
    let app = test_app();
    let sub = create_test_subscription(&app.conn(), "Acme", None);

    let (status, json) = app
        .request(
            "POST",
            &format!("/v1/subscriptions/{}/licenses", sub.id),
            create_body(50, Duration::days(365)),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["subscription_id"], sub.id);
    assert_eq!(json["license_type"], "key");
    assert_eq!(json["conditions"][0]["status"], "CREATED");
    assert_eq!(json["conditions"][0]["message"], "first license");

    let key = json["license_data"]["signed_key"].as_str().unwrap();
    let (info, _) = verify_license_key(key, &test_signing_key().verifying_key()).unwrap();
    assert_eq!(info.user_count, 50);
    assert_eq!(info.tags, vec!["plan:enterprise", "dev"]);
    assert_eq!(info.salesforce_opportunity_id.as_deref(), Some("opp-1"));
    assert!(info.created_at.is_some());

    settle().await;
    let texts = app.notifier.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("Acme"));
    assert!(texts[0].contains("*User count*: 50"));
}

#[tokio::test]
async fn test_create_license_validation() {
    let app = test_app();
    let sub = create_test_subscription(&app.conn(), "Acme", None);
    let uri = format!("/v1/subscriptions/{}/licenses", sub.id);

    let (status, json) = app
        .request("POST", &uri, create_body(0, Duration::days(1)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "user_count must be greater than zero");

    let (status, json) = app
        .request("POST", &uri, create_body(5, Duration::days(-1)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "expires_at must be in the future");

    let (status, _) = app
        .request(
            "POST",
            "/v1/subscriptions/missing/licenses",
            create_body(5, Duration::days(1)),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_license_on_archived_subscription() {
    let app = test_app();
    let sub = create_test_subscription(&app.conn(), "Acme", None);
    app.request(
        "POST",
        &format!("/v1/subscriptions/{}/archive", sub.id),
        Some(json!({})),
    )
    .await;

    let (status, json) = app
        .request(
            "POST",
            &format!("/v1/subscriptions/{}/licenses", sub.id),
            create_body(5, Duration::days(1)),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "target subscription is archived");
}

#[tokio::test]
async fn test_list_and_revoke_licenses() {
    let app = test_app();
    let sub = create_test_subscription(&app.conn(), "Acme", None);
    let license = create_test_license(&app.conn(), &sub.id, Duration::days(30));

    let (status, json) = app
        .request("GET", &format!("/v1/subscriptions/{}/licenses", sub.id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);

    let revoke_uri = format!("/v1/licenses/{}/revoke", license.id);
    let (status, json) = app
        .request("POST", &revoke_uri, Some(json!({ "reason": "fraud" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["revoked_at"].is_i64());
    assert_eq!(json["conditions"][0]["status"], "REVOKED");

    let (status, _) = app
        .request("POST", &revoke_uri, Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request("POST", "/v1/licenses/missing/revoke", Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reset_instance_binding() {
    let app = test_app();
    let sub = create_test_subscription(&app.conn(), "Acme", None);
    let license = create_test_license(&app.conn(), &sub.id, Duration::days(30));
    queries::set_detected_instance(&app.conn(), &license.id, "instance-a", queries::now())
        .unwrap();

    let uri = format!("/v1/licenses/{}", license.id);

    // An empty payload without a mask changes nothing.
    let (status, json) = app
        .request("PATCH", &uri, Some(json!({ "license": {} })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["detected_instance_id"], "instance-a");

    let (status, json) = app
        .request(
            "PATCH",
            &uri,
            Some(json!({ "license": {}, "update_mask": ["detected_instance_id"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.get("detected_instance_id").is_none());

    let (status, _) = app
        .request(
            "PATCH",
            "/v1/licenses/missing",
            Some(json!({ "license": {}, "update_mask": ["detected_instance_id"] })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_licenses_filters() {
    let app = test_app();
    let sub = create_test_subscription(&app.conn(), "Acme", None);
    let other = create_test_subscription(&app.conn(), "Globex", None);
    let older = create_test_license(&app.conn(), &sub.id, Duration::days(30));
    let newer = create_test_license(&app.conn(), &sub.id, Duration::days(60));
    create_test_license(&app.conn(), &other.id, Duration::days(30));

    let (status, json) = app
        .request(
            "GET",
            &format!("/v1/subscriptions/{}/licenses?page_size=1", sub.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let active = json.as_array().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["id"], newer.id);

    let (_, json) = app.request("GET", "/v1/licenses", None).await;
    assert_eq!(json.as_array().unwrap().len(), 3);

    let needle = &older.license_data.signed_key[48..64];
    let (status, json) = app
        .request(
            "GET",
            &format!("/v1/licenses?license_key_substring={needle}"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let found = json.as_array().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["id"], older.id);

    let (_, json) = app
        .request(
            "GET",
            &format!("/v1/licenses?subscription_id={}", other.id),
            None,
        )
        .await;
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_list_licenses_filter_validation() {
    let app = test_app();
    let sub = create_test_subscription(&app.conn(), "Acme", None);

    let (status, json) = app
        .request("GET", "/v1/licenses?license_key_substring=ab", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        json["error"],
        r#"invalid filter: "license_key_substring" must be at least 3 characters"#
    );

    let (status, _) = app
        .request(
            "GET",
            "/v1/licenses?license_key_substring=abc&license_key_substring=def",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = app
        .request("GET", "/v1/licenses?salesforce_opportunity_id=", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        json["error"],
        r#"invalid filter: "salesforce_opportunity_id" provided but is empty"#
    );

    let (status, _) = app
        .request(
            "GET",
            &format!("/v1/subscriptions/{}/licenses?subscription_id=x", sub.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
