use axum::http::StatusCode;
use chrono::Duration;
use serde_json::json;

use crate::common::*;

use entitlements::license::generate_access_token;

fn check_body(license_key: &str, instance_id: &str) -> Option<serde_json::Value> {
    Some(json!({ "license_key": license_key, "instance_id": instance_id }))
}

#[tokio::test]
async fn test_first_instance_binds_and_others_are_rejected() {
    let app = test_app();
    let sub = create_test_subscription(&app.conn(), "Acme", Some(InstanceType::Primary));
    let license = create_test_license(&app.conn(), &sub.id, Duration::days(30));
    let key = license.license_data.signed_key.clone();

    let (status, json) = app
        .request("POST", "/v1/license-checks", check_body(&key, "instance-a"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({ "valid": true, "reason": "" }));

    let bound = queries::get_license(&app.conn(), &license.id).unwrap().unwrap();
    assert_eq!(bound.detected_instance_id.as_deref(), Some("instance-a"));

    let (_, json) = app
        .request("POST", "/v1/license-checks", check_body(&key, "INSTANCE-A"))
        .await;
    assert_eq!(json["valid"], true);

    let (status, json) = app
        .request("POST", "/v1/license-checks", check_body(&key, "instance-b"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["valid"], false);
    assert_eq!(
        json["reason"],
        "license has already been used by another instance"
    );

    settle().await;
    let texts = app.notifier.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("instance-a"));
    assert!(texts[0].contains("instance-b"));
    assert!(texts[0].contains(&license.id));

    // Exactly one INSTANCE_USAGE_DETECTED, from the first check.
    let conditions = queries::list_license_conditions(&app.conn(), &license.id).unwrap();
    let detections = conditions
        .iter()
        .filter(|c| c.status == ConditionStatus::InstanceUsageDetected)
        .count();
    assert_eq!(detections, 1);
}

#[tokio::test]
async fn test_access_token_check() {
    let app = test_app();
    let sub = create_test_subscription(&app.conn(), "Acme", None);
    let license = create_test_license(&app.conn(), &sub.id, Duration::days(30));
    let token = generate_access_token(&license.license_data.signed_key);

    let (status, json) = app
        .request("POST", "/v1/license-checks", check_body(&token, "instance-a"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["valid"], true);
}

#[tokio::test]
async fn test_expired_and_revoked_licenses() {
    let app = test_app();
    let sub = create_test_subscription(&app.conn(), "Acme", None);
    let expired = create_test_license(&app.conn(), &sub.id, Duration::seconds(-10));
    let revoked = create_test_license(&app.conn(), &sub.id, Duration::days(30));
    queries::revoke_license(&app.conn(), &revoked.id, None, queries::now() - 1).unwrap();

    let (_, json) = app
        .request(
            "POST",
            "/v1/license-checks",
            check_body(&expired.license_data.signed_key, "inst"),
        )
        .await;
    assert_eq!(json, json!({ "valid": false, "reason": "license has expired" }));

    let (_, json) = app
        .request(
            "POST",
            "/v1/license-checks",
            check_body(&revoked.license_data.signed_key, "inst"),
        )
        .await;
    assert_eq!(
        json,
        json!({ "valid": false, "reason": "license has been revoked" })
    );
}

#[tokio::test]
async fn test_internal_subscription_skips_binding() {
    let app = test_app();
    let sub = create_test_subscription(&app.conn(), "Dev", Some(InstanceType::Internal));
    let license = create_test_license(&app.conn(), &sub.id, Duration::days(30));

    for instance in ["a", "b"] {
        let (_, json) = app
            .request(
                "POST",
                "/v1/license-checks",
                check_body(&license.license_data.signed_key, instance),
            )
            .await;
        assert_eq!(json["valid"], true);
    }
    let license = queries::get_license(&app.conn(), &license.id).unwrap().unwrap();
    assert!(license.detected_instance_id.is_none());
}

#[tokio::test]
async fn test_invalid_input() {
    let app = test_app();

    let (status, json) = app
        .request("POST", "/v1/license-checks", check_body("garbage", "inst"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "key is invalid");

    let (status, _) = app
        .request("POST", "/v1/license-checks", check_body("garbage", ""))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(
            "POST",
            "/v1/license-checks",
            check_body(&generate_access_token("unknown"), "inst"),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bypass_accepts_everything() {
    let app = test_app_with(|config| config.bypass_all_license_checks = true);
    let (status, json) = app
        .request("POST", "/v1/license-checks", check_body("garbage", "inst"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["valid"], true);
}

#[tokio::test]
async fn test_key_pasted_with_line_breaks() {
    let app = test_app();
    let sub = create_test_subscription(&app.conn(), "Acme", None);
    let license = create_test_license(&app.conn(), &sub.id, Duration::days(30));
    let wrapped = license
        .license_data
        .signed_key
        .as_bytes()
        .chunks(40)
        .map(|c| std::str::from_utf8(c).unwrap())
        .collect::<Vec<_>>()
        .join("\n");

    let (status, json) = app
        .request("POST", "/v1/license-checks", check_body(&format!("{wrapped}\n"), "inst"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["valid"], true);

    let bound = queries::get_license(&app.conn(), &license.id).unwrap().unwrap();
    assert_eq!(bound.detected_instance_id.as_deref(), Some("inst"));
}
