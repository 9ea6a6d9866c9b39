//! Single-value lookups run through the active dialect

use std::sync::Arc;

use serde_json::Value as JsonValue;

use dynrest_common::error::Result;
use dynrest_engine::{BindSet, BoundParam, ConnectionPool, Dialect, SqlValue};

/// A configured statement that returns at most one interesting column
#[derive(Clone)]
pub(crate) struct SqlLookup {
    pool: ConnectionPool,
    dialect: Arc<dyn Dialect>,
    sql: String,
    column: String,
}

impl SqlLookup {
    pub(crate) fn new(
        pool: ConnectionPool,
        dialect: Arc<dyn Dialect>,
        sql: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            dialect,
            sql: sql.into(),
            column: column.into(),
        }
    }

    /// Run the statement with `value` bound as `:bind` and read the column
    /// of the first row. A missing row or a null column is `None`.
    pub(crate) async fn fetch(&self, bind: &str, value: &str) -> Result<Option<String>> {
        let mut binds = BindSet::new();
        binds.insert(BoundParam::new(bind, SqlValue::Text(value.to_string())));

        let mut conn = self.pool.acquire().await?;
        let rows = self
            .dialect
            .run_query(&mut *conn, &self.sql, &binds, true)
            .await?;

        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let cell = row.get(&self.column).or_else(|| {
            row.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(&self.column))
                .map(|(_, v)| v)
        });

        Ok(match cell {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        })
    }
}
