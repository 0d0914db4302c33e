//! Builder for single-statement `INSERT ... ON CONFLICT DO UPDATE` upserts.
//!
//! Every field lands in the insert column list so a fresh row is always fully
//! materialized. A field only lands in the `DO UPDATE SET` list when it
//! carries a non-default value or the builder is force-updating. Option
//! fields therefore read as "absent" when `None`, and an upsert in which
//! nothing is present builds no query at all.

use chrono::Utc;
use rusqlite::{Connection, ToSql, types::Value};

/// Per-field modifiers for [`UpsertBuilder::field`].
#[derive(Debug, Clone)]
pub enum FieldOption<T> {
    /// When the value is zero and not force-updating, leave the column out of
    /// the insert so the database default applies.
    ColumnDefault,
    /// Never let a force-update reset this column to zero.
    IgnoreZeroOnForceUpdate,
    /// When force-updating a zero value, write this value instead.
    ValueOnForceUpdate(T),
}

pub struct UpsertBuilder {
    table: &'static str,
    primary_key: &'static str,
    force_update: bool,
    track_updated_at: bool,
    insert: Vec<(&'static str, Value)>,
    update: Vec<&'static str>,
}

/// A built upsert statement with its named parameters.
#[derive(Debug, Clone)]
pub struct UpsertQuery {
    pub sql: String,
    params: Vec<(String, Value)>,
}

impl UpsertQuery {
    pub fn params(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.params.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn execute(&self, conn: &Connection) -> rusqlite::Result<usize> {
        let params: Vec<(&str, &dyn ToSql)> = self
            .params
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect();
        conn.execute(&self.sql, params.as_slice())
    }
}

impl UpsertBuilder {
    pub fn new(table: &'static str, primary_key: &'static str, force_update: bool) -> Self {
        Self {
            table,
            primary_key,
            force_update,
            track_updated_at: false,
            insert: Vec::new(),
            update: Vec::new(),
        }
    }

    /// Bump `updated_at` whenever the statement updates anything.
    pub fn with_updated_at(mut self) -> Self {
        self.track_updated_at = true;
        self
    }

    /// Add a column. Zero means `T::default()`.
    pub fn field<T>(
        &mut self,
        column: &'static str,
        value: T,
        options: impl IntoIterator<Item = FieldOption<T>>,
    ) -> &mut Self
    where
        T: Default + PartialEq + Into<Value>,
    {
        if self.insert.iter().any(|(c, _)| *c == column) {
            return self;
        }

        let mut column_default = false;
        let mut ignore_zero_on_force = false;
        let mut value_on_force = None;
        for option in options {
            match option {
                FieldOption::ColumnDefault => column_default = true,
                FieldOption::IgnoreZeroOnForceUpdate => ignore_zero_on_force = true,
                FieldOption::ValueOnForceUpdate(v) => value_on_force = Some(v),
            }
        }

        // The conflict target is only ever inserted.
        if column == self.primary_key {
            self.insert.push((column, value.into()));
            return self;
        }

        let is_zero = value == T::default();
        if !is_zero {
            self.insert.push((column, value.into()));
            self.update.push(column);
            return self;
        }

        if !self.force_update || ignore_zero_on_force {
            if !column_default {
                self.insert.push((column, value.into()));
            }
            return self;
        }

        let value = value_on_force.unwrap_or(value);
        self.insert.push((column, value.into()));
        self.update.push(column);
        self
    }

    /// Columns that will be written on conflict, in call order.
    pub fn update_columns(&self) -> &[&'static str] {
        &self.update
    }

    /// Build the statement, or `None` when there is nothing to update. Callers
    /// must skip execution entirely in that case.
    pub fn build_query(&self) -> Option<UpsertQuery> {
        if self.update.is_empty() {
            return None;
        }

        let mut insert = self.insert.clone();
        let mut update = self.update.clone();
        if self.track_updated_at {
            insert.push(("updated_at", Utc::now().timestamp().into()));
            update.push("updated_at");
        }

        let columns: Vec<&str> = insert.iter().map(|(c, _)| *c).collect();
        let placeholders: Vec<String> = columns.iter().map(|c| format!(":{}", c)).collect();
        let sets: Vec<String> = update
            .iter()
            .map(|c| format!("{} = EXCLUDED.{}", c, c))
            .collect();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
            self.table,
            columns.join(", "),
            placeholders.join(", "),
            self.primary_key,
            sets.join(", ")
        );
        let params = insert
            .into_iter()
            .map(|(c, v)| (format!(":{}", c), v))
            .collect();

        Some(UpsertQuery { sql, params })
    }

    /// Execute the upsert. Returns `false` without touching the database when
    /// no column needs updating.
    pub fn execute(&self, conn: &Connection) -> rusqlite::Result<bool> {
        match self.build_query() {
            Some(query) => {
                query.execute(conn)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
