use chrono::Duration;

use crate::common::*;

use entitlements::db::StoreError;
use entitlements::license::{LicenseInfo, encode_license_key, license_key_hash};

#[test]
fn test_create_license_stores_key_and_hash() {
    let conn = setup_test_db();
    let sub = create_test_subscription(&conn, "Acme", None);
    let license = create_test_license(&conn, &sub.id, Duration::days(30));

    assert_eq!(license.subscription_id, sub.id);
    assert_eq!(license.license_type, LicenseType::Key);
    assert_eq!(
        license.expire_at,
        license.license_data.info.expires_at.timestamp()
    );
    assert!(license.revoked_at.is_none());
    assert!(license.detected_instance_id.is_none());

    let key = &license.license_data.signed_key;
    let by_key = queries::get_licenses_by_license_key(&conn, key).unwrap();
    assert_eq!(by_key.len(), 1);
    assert_eq!(by_key[0].id, license.id);

    let by_hash =
        queries::get_licenses_by_license_key_hash(&conn, &license_key_hash(key)).unwrap();
    assert_eq!(by_hash.len(), 1);
    assert_eq!(by_hash[0].id, license.id);

    let conditions = queries::list_license_conditions(&conn, &license.id).unwrap();
    assert_eq!(conditions.len(), 1);
    assert_eq!(conditions[0].status, ConditionStatus::Created);
}

#[test]
fn test_unknown_key_matches_nothing() {
    let conn = setup_test_db();
    assert!(queries::get_licenses_by_license_key(&conn, "nope").unwrap().is_empty());
    assert!(queries::get_licenses_by_license_key_hash(&conn, &[1, 2, 3])
        .unwrap()
        .is_empty());
}

#[test]
fn test_set_detected_instance_appends_condition() {
    let conn = setup_test_db();
    let sub = create_test_subscription(&conn, "Acme", None);
    let license = create_test_license(&conn, &sub.id, Duration::days(30));

    let bound = queries::set_detected_instance(&conn, &license.id, "instance-a", queries::now())
        .unwrap();
    assert_eq!(bound.detected_instance_id.as_deref(), Some("instance-a"));
    assert_eq!(bound.license_data.signed_key, license.license_data.signed_key);
    assert_eq!(bound.expire_at, license.expire_at);

    let conditions = queries::list_license_conditions(&conn, &license.id).unwrap();
    let statuses: Vec<_> = conditions.iter().map(|c| c.status).collect();
    assert!(statuses.contains(&ConditionStatus::InstanceUsageDetected));
    assert!(statuses.contains(&ConditionStatus::Created));
}

#[test]
fn test_revoke_license() {
    let conn = setup_test_db();
    let sub = create_test_subscription(&conn, "Acme", None);
    let license = create_test_license(&conn, &sub.id, Duration::days(30));

    let now = queries::now();
    let revoked = queries::revoke_license(&conn, &license.id, Some("churned"), now).unwrap();
    assert_eq!(revoked.revoked_at, Some(now));
    assert!(revoked.is_revoked(now));

    let conditions = queries::list_license_conditions(&conn, &license.id).unwrap();
    assert_eq!(conditions[0].status, ConditionStatus::Revoked);
    assert_eq!(conditions[0].message.as_deref(), Some("churned"));
}

#[test]
fn test_force_update_never_touches_immutable_columns() {
    let conn = setup_test_db();
    let sub = create_test_subscription(&conn, "Acme", None);
    let license = create_test_license(&conn, &sub.id, Duration::days(30));
    let now = queries::now();
    queries::revoke_license(&conn, &license.id, None, now).unwrap();
    queries::set_detected_instance(&conn, &license.id, "instance-a", now).unwrap();

    let reset = queries::upsert_license(
        &conn,
        &license.id,
        &UpsertLicenseOptions {
            force_update: true,
            ..Default::default()
        },
        None,
    )
    .unwrap();

    assert_eq!(reset.detected_instance_id, None);
    assert_eq!(reset.revoked_at, Some(now));
    assert_eq!(reset.subscription_id, sub.id);
    assert_eq!(reset.expire_at, license.expire_at);
    assert_eq!(reset.created_at, license.created_at);
    assert_eq!(reset.license_data.signed_key, license.license_data.signed_key);
}

#[test]
fn test_upsert_missing_license_is_not_found() {
    let conn = setup_test_db();
    let err = queries::upsert_license(
        &conn,
        "missing",
        &UpsertLicenseOptions {
            detected_instance_id: Some(None),
            ..Default::default()
        },
        None,
    )
    .unwrap_err();
    assert!(matches!(err, StoreError::NotFound("license")));
}

#[test]
fn test_list_licenses_newest_first() {
    let conn = setup_test_db();
    let sub = create_test_subscription(&conn, "Acme", None);
    let first = create_test_license(&conn, &sub.id, Duration::days(30));
    let second = create_test_license(&conn, &sub.id, Duration::days(60));

    let licenses = queries::list_licenses_for_subscription(&conn, &sub.id).unwrap();
    let ids: Vec<_> = licenses.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);
}

#[test]
fn test_list_licenses_filters() {
    let conn = setup_test_db();
    let acme = create_test_subscription(&conn, "Acme", None);
    let globex = create_test_subscription(&conn, "Globex", None);
    let older = create_test_license(&conn, &acme.id, Duration::days(30));
    let newer = create_test_license(&conn, &acme.id, Duration::days(60));
    let other = create_test_license(&conn, &globex.id, Duration::days(30));

    let all = queries::list_licenses(&conn, &ListLicensesFilter::default()).unwrap();
    assert_eq!(all.len(), 3);

    // Newest first, so a limit of one is the active license.
    let active = queries::list_licenses(
        &conn,
        &ListLicensesFilter {
            subscription_id: Some(acme.id.clone()),
            limit: Some(1),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, newer.id);

    // This stretch of the key encodes signature bytes, unique per key.
    let needle = older.license_data.signed_key[48..64].to_string();
    let by_key = queries::list_licenses(
        &conn,
        &ListLicensesFilter {
            license_key_substring: Some(needle.clone()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(by_key.len(), 1);
    assert_eq!(by_key[0].id, older.id);

    // Keys are base64, so the match is case-sensitive.
    let swapped: String = needle
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            }
        })
        .collect();
    if swapped != needle {
        let by_swapped = queries::list_licenses(
            &conn,
            &ListLicensesFilter {
                license_key_substring: Some(swapped),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(by_swapped.iter().all(|l| l.id != older.id));
    }

    let by_other_subscription = queries::list_licenses(
        &conn,
        &ListLicensesFilter {
            subscription_id: Some(globex.id.clone()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(by_other_subscription.len(), 1);
    assert_eq!(by_other_subscription[0].id, other.id);
}

#[test]
fn test_list_licenses_by_salesforce_opportunity() {
    let conn = setup_test_db();
    let sub = create_test_subscription(&conn, "Acme", None);
    create_test_license(&conn, &sub.id, Duration::days(30));

    let info = LicenseInfo {
        tags: vec![],
        user_count: 5,
        created_at: Some(chrono::Utc::now()),
        expires_at: chrono::Utc::now() + Duration::days(10),
        salesforce_subscription_id: None,
        salesforce_opportunity_id: Some("opp-7".to_string()),
    };
    let signed_key = encode_license_key(&info, &test_signing_key()).unwrap();
    let tagged = queries::create_license_key(
        &conn,
        &sub.id,
        &LicenseKeyData { info, signed_key },
        queries::now(),
        None,
    )
    .unwrap();

    let found = queries::list_licenses(
        &conn,
        &ListLicensesFilter {
            salesforce_opportunity_id: Some("opp-7".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, tagged.id);
}
