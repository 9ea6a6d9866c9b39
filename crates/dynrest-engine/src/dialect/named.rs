use async_trait::async_trait;
use tracing::debug;

use dynrest_common::config::Engine;
use dynrest_common::error::Result;

use super::{abort, distinct_inputs, Dialect, OutputValues, ProcedureCall};
use crate::bind::{BindSet, Row, SqlValue};
use crate::connection::{NamedBind, Params, SqlConnection, Statement};
use crate::placeholder::{self, PlaceholderKind};

/// Engines that bind by name and support OUT parameters natively
#[derive(Debug, Clone, Copy, Default)]
pub struct NamedDialect;

fn input_binds(names: &[&str], binds: &BindSet) -> Vec<NamedBind> {
    names
        .iter()
        .map(|name| NamedBind::input(*name, binds.value_or_null(name)))
        .collect()
}

#[async_trait]
impl Dialect for NamedDialect {
    fn engine(&self) -> Engine {
        Engine::Named
    }

    async fn run_query(
        &self,
        conn: &mut dyn SqlConnection,
        sql: &str,
        binds: &BindSet,
        auto_commit: bool,
    ) -> Result<Vec<Row>> {
        let placeholders = placeholder::scan(sql);
        let params = input_binds(&distinct_inputs(&placeholders), binds);
        let statement = Statement::new(sql)
            .with_params(Params::Named(params))
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
        let placeholders = placeholder::scan(&call.sql);

        // Declared outputs become OUT binds under the same name.
        let sql = placeholder::rewrite(&call.sql, &placeholders, |p| {
            (p.kind == PlaceholderKind::Output && call.output(&p.name).is_some())
                .then(|| format!(":{}", p.name))
        });

        let mut params = input_binds(&distinct_inputs(&placeholders), binds);
        params.extend(
            call.outputs
                .iter()
                .map(|o| NamedBind::output(&o.name, o.out_type)),
        );
        debug!(sql = %sql, binds = params.len(), "Executing procedure");

        let statement = Statement::new(sql)
            .with_params(Params::Named(params))
            .auto_commit(auto_commit);
        let result = conn.execute(&statement).await;
        let mut outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => return Err(abort(conn, e).await),
        };

        Ok(call
            .outputs
            .iter()
            .map(|o| {
                let raw = outcome.out_values.remove(&o.name).unwrap_or(SqlValue::Null);
                (o.name.clone(), o.out_type.coerce(raw))
            })
            .collect())
    }
}
