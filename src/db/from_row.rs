//! Row mapping for the entity tables.

use rusqlite::types::Type;
use rusqlite::{Connection, Params, Row};

use super::StoreResult;
use crate::models::*;

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

pub const SUBSCRIPTION_COLS: &str = "id, display_name, instance_domain, instance_type, \
     salesforce_subscription_id, created_at, updated_at, archived_at";

pub const LICENSE_COLS: &str = "id, subscription_id, license_type, license_data, created_at, \
     expire_at, revoked_at, detected_instance_id, updated_at";

pub const CONDITION_COLS: &str = "status, message, transition_time";

pub const CODY_GATEWAY_ACCESS_COLS: &str = "subscription_id, enabled, \
     chat_completions_rate_limit, chat_completions_rate_limit_interval_seconds, \
     code_completions_rate_limit, code_completions_rate_limit_interval_seconds, \
     embeddings_rate_limit, embeddings_rate_limit_interval_seconds, created_at, updated_at";

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_enum<T: std::str::FromStr>(idx: usize, value: String) -> rusqlite::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.parse().map_err(|e| conversion_error(idx, e))
}

impl FromRow for Subscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let instance_type: Option<String> = row.get(3)?;
        Ok(Subscription {
            id: row.get(0)?,
            display_name: row.get(1)?,
            instance_domain: row.get(2)?,
            instance_type: instance_type.map(|t| parse_enum(3, t)).transpose()?,
            salesforce_subscription_id: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            archived_at: row.get(7)?,
        })
    }
}

impl FromRow for SubscriptionLicense {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let license_data: String = row.get(3)?;
        Ok(SubscriptionLicense {
            id: row.get(0)?,
            subscription_id: row.get(1)?,
            license_type: parse_enum(2, row.get(2)?)?,
            license_data: serde_json::from_str(&license_data)
                .map_err(|e| conversion_error(3, e))?,
            created_at: row.get(4)?,
            expire_at: row.get(5)?,
            revoked_at: row.get(6)?,
            detected_instance_id: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

impl FromRow for Condition {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Condition {
            status: parse_enum(0, row.get(0)?)?,
            message: row.get(1)?,
            transition_time: row.get(2)?,
        })
    }
}

impl FromRow for CodyGatewayAccess {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(CodyGatewayAccess {
            subscription_id: row.get(0)?,
            enabled: row.get(1)?,
            chat_completions_rate_limit: row.get(2)?,
            chat_completions_rate_limit_interval_seconds: row.get(3)?,
            code_completions_rate_limit: row.get(4)?,
            code_completions_rate_limit_interval_seconds: row.get(5)?,
            embeddings_rate_limit: row.get(6)?,
            embeddings_rate_limit_interval_seconds: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: impl Params,
) -> StoreResult<Option<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    match rows.next()? {
        Some(row) => Ok(Some(T::from_row(row)?)),
        None => Ok(None),
    }
}

pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: impl Params,
) -> StoreResult<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| T::from_row(row))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
