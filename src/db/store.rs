use crate::models::{Subscription, SubscriptionLicense};
use crate::validator::LicenseStore;

use super::queries::{self, now};
use super::{DbPool, StoreError, StoreResult};

/// [`LicenseStore`] over the SQLite pool. Each call checks out its own
/// connection and returns it before the next.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl LicenseStore for SqliteStore {
    fn get_by_license_key(&self, license_key: &str) -> StoreResult<Vec<SubscriptionLicense>> {
        let conn = self.pool.get()?;
        queries::get_licenses_by_license_key(&conn, license_key)
    }

    fn get_by_license_key_hash(&self, hash: &[u8]) -> StoreResult<Vec<SubscriptionLicense>> {
        let conn = self.pool.get()?;
        queries::get_licenses_by_license_key_hash(&conn, hash)
    }

    fn set_detected_instance(&self, license_id: &str, instance_id: &str) -> StoreResult<()> {
        let conn = self.pool.get()?;
        queries::set_detected_instance(&conn, license_id, instance_id, now())?;
        Ok(())
    }

    fn get_subscription(&self, subscription_id: &str) -> StoreResult<Subscription> {
        let conn = self.pool.get()?;
        queries::get_subscription(&conn, subscription_id)?.ok_or(StoreError::NotFound("subscription"))
    }
}
