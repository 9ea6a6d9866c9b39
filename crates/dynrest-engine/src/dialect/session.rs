use async_trait::async_trait;
use tracing::debug;

use dynrest_common::config::Engine;
use dynrest_common::error::Result;

use super::{abort, Dialect, OutputValues, ProcedureCall};
use crate::bind::{BindSet, Row, SqlValue};
use crate::connection::{Params, SqlConnection, Statement};
use crate::datefmt;
use crate::placeholder::{self, PlaceholderKind};

/// Engines with positional binds only; OUT parameters are emulated with
/// session variables inside one transaction
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionDialect;

/// Replace every `:name` with a positional marker, collecting values in
/// order of appearance. Dates are sent as text and converted by the engine.
fn positional(sql: &str, binds: &BindSet) -> (String, Vec<SqlValue>) {
    let placeholders = placeholder::scan(sql);
    let mut values = Vec::new();

    let rewritten = placeholder::rewrite(sql, &placeholders, |p| {
        if p.kind != PlaceholderKind::Query {
            return None;
        }
        match binds.get(&p.name) {
            Some(bound) => match (&bound.value, bound.date_format.as_deref()) {
                (SqlValue::Date(date), Some(format)) => {
                    values.push(SqlValue::Text(datefmt::render(date, format)));
                    Some(format!(
                        "STR_TO_DATE(?, '{}')",
                        datefmt::to_str_to_date(format)
                    ))
                }
                (value, _) => {
                    values.push(value.clone());
                    Some("?".to_string())
                }
            },
            None => {
                values.push(SqlValue::Null);
                Some("?".to_string())
            }
        }
    });

    (rewritten, values)
}

fn column_value(row: &Row, column: &str) -> SqlValue {
    row.get(column)
        .or_else(|| {
            row.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(column))
                .map(|(_, v)| v)
        })
        .map_or(SqlValue::Null, SqlValue::from_json)
}

impl SessionDialect {
    async fn emulate(
        conn: &mut dyn SqlConnection,
        call: &ProcedureCall,
        binds: &BindSet,
        auto_commit: bool,
    ) -> Result<OutputValues> {
        conn.begin().await?;

        for output in &call.outputs {
            conn.execute(&Statement::new(format!("SET @{} = NULL", output.name)))
                .await?;
        }

        let (sql, values) = positional(&call.sql, binds);
        debug!(sql = %sql, binds = values.len(), "Executing procedure");
        conn.execute(&Statement::new(sql).with_params(Params::Positional(values)))
            .await?;

        let mut outputs = OutputValues::new();
        for output in &call.outputs {
            let select = format!("SELECT @{0} AS {0}", output.name);
            let outcome = conn.execute(&Statement::new(select)).await?;
            let raw = outcome
                .rows
                .first()
                .map_or(SqlValue::Null, |row| column_value(row, &output.name));
            outputs.insert(output.name.clone(), output.out_type.coerce(raw));
        }

        if auto_commit {
            conn.commit().await?;
        }
        Ok(outputs)
    }
}

#[async_trait]
impl Dialect for SessionDialect {
    fn engine(&self) -> Engine {
        Engine::Session
    }

    fn literal(&self, value: &SqlValue) -> String {
        value.to_backslash_literal()
    }

    async fn run_query(
        &self,
        conn: &mut dyn SqlConnection,
        sql: &str,
        binds: &BindSet,
        auto_commit: bool,
    ) -> Result<Vec<Row>> {
        let (sql, values) = positional(sql, binds);
        let statement = Statement::new(sql)
            .with_params(Params::Positional(values))
            .auto_commit(auto_commit);

        let result = conn.execute(&statement).await;
        match result {
            Ok(outcome) => Ok(outcome.rows),
            Err(e) => Err(abort(conn, e).await),
        }
    }

    async fn run_procedure(
        &self,
        conn: &mut dyn SqlConnection,
        call: &ProcedureCall,
        binds: &BindSet,
        auto_commit: bool,
    ) -> Result<OutputValues> {
        let result = Self::emulate(conn, call, binds, auto_commit).await;
        match result {
            Ok(outputs) => Ok(outputs),
            Err(e) => Err(abort(conn, e).await),
        }
    }
}
