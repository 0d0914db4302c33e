use chrono::Utc;
use rusqlite::{Connection, ErrorCode, params, types::Value};
use uuid::Uuid;

use crate::license::license_key_hash;
use crate::models::*;

use super::from_row::{
    CODY_GATEWAY_ACCESS_COLS, CONDITION_COLS, LICENSE_COLS, SUBSCRIPTION_COLS, query_all,
    query_one,
};
use super::upsert::{FieldOption, UpsertBuilder};
use super::{StoreError, StoreResult};

pub fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Map unique-constraint failures to a conflict the caller can report.
fn map_conflict(err: rusqlite::Error, message: &str) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::Conflict(message.to_string())
        }
        other => other.into(),
    }
}

// ============ Subscriptions ============

pub fn generate_subscription_id() -> String {
    gen_id()
}

pub fn get_subscription(conn: &Connection, id: &str) -> StoreResult<Option<Subscription>> {
    query_one(
        conn,
        &format!("SELECT {} FROM subscriptions WHERE id = ?1", SUBSCRIPTION_COLS),
        params![id],
    )
}

pub fn list_subscriptions(
    conn: &Connection,
    filter: &ListSubscriptionsFilter,
) -> StoreResult<Vec<Subscription>> {
    let mut conditions = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    push_any_of(&mut conditions, &mut values, "id", &filter.ids);
    match filter.is_archived {
        Some(true) => conditions.push("archived_at IS NOT NULL".to_string()),
        Some(false) => conditions.push("archived_at IS NULL".to_string()),
        None => {}
    }
    push_any_of(
        &mut conditions,
        &mut values,
        "instance_domain",
        &filter.instance_domains,
    );
    push_any_of(
        &mut conditions,
        &mut values,
        "salesforce_subscription_id",
        &filter.salesforce_subscription_ids,
    );
    if let Some(substring) = &filter.display_name_substring {
        values.push(like_pattern(substring).into());
        conditions.push(format!("display_name LIKE ?{} ESCAPE '\\'", values.len()));
    }

    let sql = select_filtered(
        &format!("SELECT {} FROM subscriptions", SUBSCRIPTION_COLS),
        &conditions,
        "created_at DESC, id",
        filter.limit,
        &mut values,
    );
    query_all(conn, &sql, rusqlite::params_from_iter(values))
}

/// `column IN (...)` over `candidates`; no condition when empty.
fn push_any_of(
    conditions: &mut Vec<String>,
    values: &mut Vec<Value>,
    column: &str,
    candidates: &[String],
) {
    if candidates.is_empty() {
        return;
    }
    let mut placeholders = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        values.push(candidate.clone().into());
        placeholders.push(format!("?{}", values.len()));
    }
    conditions.push(format!("{} IN ({})", column, placeholders.join(", ")));
}

/// Substring match pattern for `LIKE ... ESCAPE '\'`.
fn like_pattern(substring: &str) -> String {
    let mut pattern = String::with_capacity(substring.len() + 2);
    pattern.push('%');
    for c in substring.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn select_filtered(
    select: &str,
    conditions: &[String],
    order_by: &str,
    limit: Option<i64>,
    values: &mut Vec<Value>,
) -> String {
    let mut sql = select.to_string();
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" ORDER BY ");
    sql.push_str(order_by);
    if let Some(limit) = limit.filter(|l| *l > 0) {
        values.push(limit.into());
        sql.push_str(&format!(" LIMIT ?{}", values.len()));
    }
    sql
}

/// Upsert a subscription and optionally record a condition, atomically.
pub fn upsert_subscription(
    conn: &Connection,
    id: &str,
    opts: &UpsertSubscriptionOptions,
    condition: Option<&Condition>,
) -> StoreResult<Subscription> {
    let tx = conn.unchecked_transaction()?;

    let mut b = UpsertBuilder::new("subscriptions", "id", opts.force_update).with_updated_at();
    b.field("id", id.to_string(), [])
        .field("display_name", opts.display_name.clone(), [])
        .field("instance_domain", opts.instance_domain.clone(), [])
        .field(
            "instance_type",
            opts.instance_type
                .map(|t| t.map(|t| t.as_ref().to_string())),
            [],
        )
        .field(
            "salesforce_subscription_id",
            opts.salesforce_subscription_id.clone(),
            [],
        )
        .field(
            "created_at",
            opts.created_at,
            [
                FieldOption::ColumnDefault,
                FieldOption::IgnoreZeroOnForceUpdate,
            ],
        )
        .field(
            "archived_at",
            opts.archived_at,
            [FieldOption::IgnoreZeroOnForceUpdate],
        );
    b.execute(&tx)
        .map_err(|e| map_conflict(e, "instance domain is already in use"))?;

    if let Some(condition) = condition {
        insert_subscription_condition(&tx, id, condition)?;
    }

    let subscription = get_subscription(&tx, id)?.ok_or(StoreError::NotFound("subscription"))?;
    tx.commit()?;
    Ok(subscription)
}

pub fn insert_subscription_condition(
    conn: &Connection,
    subscription_id: &str,
    condition: &Condition,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO subscription_conditions (subscription_id, status, message, transition_time)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            subscription_id,
            condition.status.as_ref(),
            condition.message,
            condition.transition_time
        ],
    )?;
    Ok(())
}

pub fn list_subscription_conditions(
    conn: &Connection,
    subscription_id: &str,
) -> StoreResult<Vec<Condition>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM subscription_conditions WHERE subscription_id = ?1
             ORDER BY transition_time DESC, rowid DESC",
            CONDITION_COLS
        ),
        params![subscription_id],
    )
}

pub fn get_subscription_with_conditions(
    conn: &Connection,
    id: &str,
) -> StoreResult<Option<SubscriptionWithConditions>> {
    let Some(subscription) = get_subscription(conn, id)? else {
        return Ok(None);
    };
    let conditions = list_subscription_conditions(conn, id)?;
    Ok(Some(SubscriptionWithConditions {
        subscription,
        conditions,
    }))
}

// ============ Licenses ============

/// Every column of a license row. Absent values are left untouched on
/// conflict; immutable columns can never be reset by a force-update.
#[derive(Default)]
struct LicenseRow {
    subscription_id: Option<String>,
    license_type: Option<String>,
    license_data: Option<String>,
    license_key_hash: Option<Vec<u8>>,
    created_at: Option<i64>,
    expire_at: Option<i64>,
    revoked_at: Option<i64>,
    detected_instance_id: Option<Option<String>>,
    force_update: bool,
}

fn immutable<T>() -> [FieldOption<T>; 2] {
    [
        FieldOption::ColumnDefault,
        FieldOption::IgnoreZeroOnForceUpdate,
    ]
}

fn write_license_row(conn: &Connection, id: &str, row: LicenseRow) -> StoreResult<bool> {
    let mut b =
        UpsertBuilder::new("subscription_licenses", "id", row.force_update).with_updated_at();
    b.field("id", id.to_string(), [])
        .field("subscription_id", row.subscription_id, immutable())
        .field("license_type", row.license_type, immutable())
        .field("license_data", row.license_data, immutable())
        .field("license_key_hash", row.license_key_hash, immutable())
        .field("created_at", row.created_at, immutable())
        .field("expire_at", row.expire_at, immutable())
        .field("revoked_at", row.revoked_at, immutable())
        .field("detected_instance_id", row.detected_instance_id, []);
    Ok(b.execute(conn)?)
}

/// Store a newly signed license key with its CREATED condition.
pub fn create_license_key(
    conn: &Connection,
    subscription_id: &str,
    data: &LicenseKeyData,
    created_at: i64,
    message: Option<&str>,
) -> StoreResult<SubscriptionLicense> {
    let id = gen_id();
    let tx = conn.unchecked_transaction()?;

    write_license_row(
        &tx,
        &id,
        LicenseRow {
            subscription_id: Some(subscription_id.to_string()),
            license_type: Some(LicenseType::Key.as_ref().to_string()),
            license_data: Some(serde_json::to_string(data)?),
            license_key_hash: Some(license_key_hash(&data.signed_key)),
            created_at: Some(created_at),
            expire_at: Some(data.info.expires_at.timestamp()),
            ..Default::default()
        },
    )?;
    insert_license_condition(
        &tx,
        &id,
        &Condition {
            status: ConditionStatus::Created,
            message: message.map(String::from),
            transition_time: created_at,
        },
    )?;

    let license = get_license(&tx, &id)?.ok_or(StoreError::NotFound("license"))?;
    tx.commit()?;
    Ok(license)
}

pub fn get_license(conn: &Connection, id: &str) -> StoreResult<Option<SubscriptionLicense>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscription_licenses WHERE id = ?1",
            LICENSE_COLS
        ),
        params![id],
    )
}

/// Newest first.
pub fn list_licenses(
    conn: &Connection,
    filter: &ListLicensesFilter,
) -> StoreResult<Vec<SubscriptionLicense>> {
    let mut conditions = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(subscription_id) = &filter.subscription_id {
        values.push(subscription_id.clone().into());
        conditions.push(format!("subscription_id = ?{}", values.len()));
    }
    if let Some(substring) = &filter.license_key_substring {
        // instr() keeps the match case-sensitive; keys are base64.
        values.push(substring.clone().into());
        conditions.push(format!(
            "instr(json_extract(license_data, '$.signed_key'), ?{}) > 0",
            values.len()
        ));
    }
    if let Some(opportunity_id) = &filter.salesforce_opportunity_id {
        values.push(opportunity_id.clone().into());
        conditions.push(format!(
            "json_extract(license_data, '$.info.sf_opp_id') = ?{}",
            values.len()
        ));
    }

    let sql = select_filtered(
        &format!("SELECT {} FROM subscription_licenses", LICENSE_COLS),
        &conditions,
        "created_at DESC, rowid DESC",
        filter.limit,
        &mut values,
    );
    query_all(conn, &sql, rusqlite::params_from_iter(values))
}

pub fn list_licenses_for_subscription(
    conn: &Connection,
    subscription_id: &str,
) -> StoreResult<Vec<SubscriptionLicense>> {
    list_licenses(
        conn,
        &ListLicensesFilter {
            subscription_id: Some(subscription_id.to_string()),
            ..Default::default()
        },
    )
}

pub fn get_licenses_by_license_key(
    conn: &Connection,
    license_key: &str,
) -> StoreResult<Vec<SubscriptionLicense>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM subscription_licenses
             WHERE json_extract(license_data, '$.signed_key') = ?1",
            LICENSE_COLS
        ),
        params![license_key],
    )
}

pub fn get_licenses_by_license_key_hash(
    conn: &Connection,
    hash: &[u8],
) -> StoreResult<Vec<SubscriptionLicense>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM subscription_licenses WHERE license_key_hash = ?1",
            LICENSE_COLS
        ),
        params![hash],
    )
}

/// Apply mutable-field changes to an existing license, optionally recording
/// a condition.
pub fn upsert_license(
    conn: &Connection,
    id: &str,
    opts: &UpsertLicenseOptions,
    condition: Option<&Condition>,
) -> StoreResult<SubscriptionLicense> {
    let tx = conn.unchecked_transaction()?;
    if get_license(&tx, id)?.is_none() {
        return Err(StoreError::NotFound("license"));
    }

    write_license_row(
        &tx,
        id,
        LicenseRow {
            revoked_at: opts.revoked_at,
            detected_instance_id: opts.detected_instance_id.clone(),
            force_update: opts.force_update,
            ..Default::default()
        },
    )?;
    if let Some(condition) = condition {
        insert_license_condition(&tx, id, condition)?;
    }

    let license = get_license(&tx, id)?.ok_or(StoreError::NotFound("license"))?;
    tx.commit()?;
    Ok(license)
}

pub fn revoke_license(
    conn: &Connection,
    id: &str,
    message: Option<&str>,
    revoked_at: i64,
) -> StoreResult<SubscriptionLicense> {
    upsert_license(
        conn,
        id,
        &UpsertLicenseOptions {
            revoked_at: Some(revoked_at),
            ..Default::default()
        },
        Some(&Condition {
            status: ConditionStatus::Revoked,
            message: message.map(String::from),
            transition_time: revoked_at,
        }),
    )
}

/// Bind a license to the first instance seen using it. Unconditional: the
/// last concurrent writer wins.
pub fn set_detected_instance(
    conn: &Connection,
    license_id: &str,
    instance_id: &str,
    detected_at: i64,
) -> StoreResult<SubscriptionLicense> {
    upsert_license(
        conn,
        license_id,
        &UpsertLicenseOptions {
            detected_instance_id: Some(Some(instance_id.to_string())),
            ..Default::default()
        },
        Some(&Condition {
            status: ConditionStatus::InstanceUsageDetected,
            message: Some(format!("Instance {} detected", instance_id)),
            transition_time: detected_at,
        }),
    )
}

pub fn insert_license_condition(
    conn: &Connection,
    license_id: &str,
    condition: &Condition,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO subscription_license_conditions (license_id, status, message, transition_time)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            license_id,
            condition.status.as_ref(),
            condition.message,
            condition.transition_time
        ],
    )?;
    Ok(())
}

pub fn list_license_conditions(
    conn: &Connection,
    license_id: &str,
) -> StoreResult<Vec<Condition>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM subscription_license_conditions WHERE license_id = ?1
             ORDER BY transition_time DESC, rowid DESC",
            CONDITION_COLS
        ),
        params![license_id],
    )
}

pub fn get_license_with_conditions(
    conn: &Connection,
    id: &str,
) -> StoreResult<Option<LicenseWithConditions>> {
    let Some(license) = get_license(conn, id)? else {
        return Ok(None);
    };
    let conditions = list_license_conditions(conn, id)?;
    Ok(Some(LicenseWithConditions {
        license,
        conditions,
    }))
}

// ============ Cody Gateway Access ============

pub fn get_cody_gateway_access(
    conn: &Connection,
    subscription_id: &str,
) -> StoreResult<Option<CodyGatewayAccess>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM cody_gateway_access WHERE subscription_id = ?1",
            CODY_GATEWAY_ACCESS_COLS
        ),
        params![subscription_id],
    )
}

/// Upsert gateway access. An all-absent `opts` issues no statement at all.
pub fn upsert_cody_gateway_access(
    conn: &Connection,
    subscription_id: &str,
    opts: &UpsertCodyGatewayAccessOptions,
) -> StoreResult<CodyGatewayAccess> {
    let mut b =
        UpsertBuilder::new("cody_gateway_access", "subscription_id", opts.force_update)
            .with_updated_at();
    b.field("subscription_id", subscription_id.to_string(), [])
        .field(
            "enabled",
            opts.enabled,
            [
                FieldOption::ColumnDefault,
                FieldOption::ValueOnForceUpdate(Some(false)),
            ],
        )
        .field(
            "chat_completions_rate_limit",
            opts.chat_completions_rate_limit,
            [],
        )
        .field(
            "chat_completions_rate_limit_interval_seconds",
            opts.chat_completions_rate_limit_interval_seconds,
            [],
        )
        .field(
            "code_completions_rate_limit",
            opts.code_completions_rate_limit,
            [],
        )
        .field(
            "code_completions_rate_limit_interval_seconds",
            opts.code_completions_rate_limit_interval_seconds,
            [],
        )
        .field("embeddings_rate_limit", opts.embeddings_rate_limit, [])
        .field(
            "embeddings_rate_limit_interval_seconds",
            opts.embeddings_rate_limit_interval_seconds,
            [],
        );
    b.execute(conn)?;

    Ok(get_cody_gateway_access(conn, subscription_id)?
        .unwrap_or_else(|| CodyGatewayAccess::unconfigured(subscription_id)))
}
