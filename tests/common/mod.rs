//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use ed25519_dalek::SigningKey;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde_json::Value;
use tower::ServiceExt;

pub use entitlements::db::{AppState, DbPool, queries};
pub use entitlements::models::*;
use entitlements::license::{LicenseInfo, encode_license_key};
use entitlements::slack::{Notifier, NotifyError, SlackPayload};
use entitlements::validator::ValidatorConfig;

/// Single-connection in-memory pool: every checkout sees the same database.
pub fn test_pool() -> DbPool {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        entitlements::db::init_db(&conn).unwrap();
    }
    pool
}

pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    entitlements::db::init_db(&conn).unwrap();
    conn
}

pub fn test_signing_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub posted: Mutex<Vec<SlackPayload>>,
}

impl RecordingNotifier {
    pub fn texts(&self) -> Vec<String> {
        self.posted
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.text.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn post(&self, payload: SlackPayload) -> Result<(), NotifyError> {
        self.posted.lock().unwrap().push(payload);
        Ok(())
    }
}

pub struct TestApp {
    pub state: AppState,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestApp {
    pub fn router(&self) -> Router {
        entitlements::app(self.state.clone())
    }

    pub fn conn(&self) -> r2d2::PooledConnection<SqliteConnectionManager> {
        self.state.db.get().unwrap()
    }

    /// Send a request and decode the JSON response body.
    pub async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}

pub fn test_app_with(configure: impl FnOnce(&mut ValidatorConfig)) -> TestApp {
    let signing_key = test_signing_key();
    let mut validator_config = ValidatorConfig::new(signing_key.verifying_key());
    configure(&mut validator_config);

    let notifier = Arc::new(RecordingNotifier::default());
    let mut state = AppState::new(
        test_pool(),
        validator_config,
        notifier.clone(),
        Some(signing_key),
    );
    state.required_license_tags = vec!["dev".to_string()];
    state.env_name = "test".to_string();
    TestApp { state, notifier }
}

pub fn test_app() -> TestApp {
    test_app_with(|_| {})
}

pub fn create_test_subscription(
    conn: &Connection,
    display_name: &str,
    instance_type: Option<InstanceType>,
) -> Subscription {
    let id = queries::generate_subscription_id();
    let now = queries::now();
    queries::upsert_subscription(
        conn,
        &id,
        &UpsertSubscriptionOptions {
            display_name: Some(Some(display_name.to_string())),
            instance_type: Some(instance_type),
            created_at: Some(now),
            ..Default::default()
        },
        Some(&Condition {
            status: ConditionStatus::Created,
            message: None,
            transition_time: now,
        }),
    )
    .unwrap()
}

/// Sign and store a license key expiring `expires_in` from now.
pub fn create_test_license(
    conn: &Connection,
    subscription_id: &str,
    expires_in: Duration,
) -> SubscriptionLicense {
    let now = Utc::now();
    let info = LicenseInfo {
        tags: vec!["dev".to_string()],
        user_count: 10,
        created_at: Some(now),
        expires_at: now + expires_in,
        salesforce_subscription_id: None,
        salesforce_opportunity_id: None,
    };
    let signed_key = encode_license_key(&info, &test_signing_key()).unwrap();
    queries::create_license_key(
        conn,
        subscription_id,
        &LicenseKeyData { info, signed_key },
        now.timestamp(),
        None,
    )
    .unwrap()
}

pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}
