mod from_row;
pub mod queries;
mod store;
pub mod upsert;

pub use store::SqliteStore;

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use thiserror::Error;

use crate::slack::Notifier;
use crate::validator::{LicenseValidator, ValidatorConfig};

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The named entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// The write conflicts with existing data (e.g. a unique column).
    #[error("{0}")]
    Conflict(String),
    #[error("encoding stored data: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Pool(#[from] r2d2::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub validator: Arc<LicenseValidator>,
    pub notifier: Arc<dyn Notifier>,
    /// Key used to sign newly issued licenses (issuance disabled when unset)
    pub signing_key: Option<Arc<SigningKey>>,
    pub required_license_tags: Vec<String>,
    pub env_name: String,
}

impl AppState {
    /// Wire a validator backed by `db` and the given notifier.
    pub fn new(
        db: DbPool,
        validator_config: ValidatorConfig,
        notifier: Arc<dyn Notifier>,
        signing_key: Option<SigningKey>,
    ) -> Self {
        let validator = LicenseValidator::new(
            validator_config,
            Arc::new(SqliteStore::new(db.clone())),
            Arc::clone(&notifier),
        );
        Self {
            db,
            validator: Arc::new(validator),
            notifier,
            signing_key: signing_key.map(Arc::new),
            required_license_tags: Vec::new(),
            env_name: "dev".to_string(),
        }
    }
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path)
        .with_init(|c| c.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;"));
    Pool::builder().build(manager)
}

pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            display_name TEXT,
            instance_domain TEXT UNIQUE,
            instance_type TEXT,
            salesforce_subscription_id TEXT,
            created_at INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at INTEGER,
            archived_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS subscription_conditions (
            subscription_id TEXT NOT NULL REFERENCES subscriptions(id),
            status TEXT NOT NULL,
            message TEXT,
            transition_time INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_subscription_conditions_subscription
            ON subscription_conditions(subscription_id);

        -- Immutable columns are nullable so partial upserts can target an
        -- existing row without restating them.
        CREATE TABLE IF NOT EXISTS subscription_licenses (
            id TEXT PRIMARY KEY,
            subscription_id TEXT REFERENCES subscriptions(id),
            license_type TEXT,
            license_data TEXT,
            license_key_hash BLOB,
            created_at INTEGER NOT NULL DEFAULT (unixepoch()),
            expire_at INTEGER,
            revoked_at INTEGER,
            detected_instance_id TEXT,
            updated_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_subscription_licenses_subscription
            ON subscription_licenses(subscription_id);
        CREATE INDEX IF NOT EXISTS idx_subscription_licenses_key_hash
            ON subscription_licenses(license_key_hash);

        CREATE TABLE IF NOT EXISTS subscription_license_conditions (
            license_id TEXT NOT NULL REFERENCES subscription_licenses(id),
            status TEXT NOT NULL,
            message TEXT,
            transition_time INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_subscription_license_conditions_license
            ON subscription_license_conditions(license_id);

        CREATE TABLE IF NOT EXISTS cody_gateway_access (
            subscription_id TEXT PRIMARY KEY REFERENCES subscriptions(id),
            enabled INTEGER NOT NULL DEFAULT 0,
            chat_completions_rate_limit INTEGER,
            chat_completions_rate_limit_interval_seconds INTEGER,
            code_completions_rate_limit INTEGER,
            code_completions_rate_limit_interval_seconds INTEGER,
            embeddings_rate_limit INTEGER,
            embeddings_rate_limit_interval_seconds INTEGER,
            created_at INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at INTEGER
        );
        "#,
    )
}
