//! Execution of one endpoint request
//!
//! Every statement of the endpoint is prepared and validated before a
//! connection is leased, so a request with bad input never reaches the
//! database. The lease is returned on every path when it drops.

use std::sync::Arc;

use tracing::{debug, info, warn};

use dynrest_common::error::{Error, ParameterIssue, Result};
use dynrest_common::types::{EndpointSpec, HttpMethod, ParameterClass};

use crate::bind::{BindSet, BoundParam, OutType, Row, SqlValue};
use crate::dialect::{Dialect, OutputParam, OutputValues, ProcedureCall};
use crate::placeholder::{self, Extracted, PlaceholderKind};
use crate::pool::ConnectionPool;
use crate::validate::{validate_value, BindSource, ParameterMap};

/// Which statements an endpoint runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionShape {
    ProcedureOnly,
    QueryOnly,
    ProcedureThenQuery,
}

impl ExecutionShape {
    /// Shape of `spec`; an endpoint with neither statement is misconfigured
    pub fn of(spec: &EndpointSpec) -> Result<Self> {
        match (spec.procedure_text(), spec.query_text()) {
            (Some(_), Some(_)) => Ok(Self::ProcedureThenQuery),
            (Some(_), None) => Ok(Self::ProcedureOnly),
            (None, Some(_)) => Ok(Self::QueryOnly),
            (None, None) => Err(Error::EndpointMisconfigured(format!(
                "endpoint '{}' has neither a query nor a procedure",
                spec.name
            ))),
        }
    }
}

/// A statement with its placeholders normalised to `:name` and its input
/// values validated
#[derive(Debug)]
struct Prepared {
    sql: String,
    binds: BindSet,
    outputs: Vec<OutputParam>,
}

/// Runs endpoint requests against the pool through one dialect
pub struct Executor {
    pool: ConnectionPool,
    dialect: Arc<dyn Dialect>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("engine", &self.dialect.engine())
            .field("pool", &self.pool)
            .finish()
    }
}

impl Executor {
    pub fn new(pool: ConnectionPool, dialect: Arc<dyn Dialect>) -> Self {
        Self { pool, dialect }
    }

    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    #[must_use]
    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    /// Run `spec` with the request values in `source` and return its rows.
    ///
    /// A procedure-only endpoint returns one row holding its outputs.
    pub async fn execute(&self, spec: &EndpointSpec, source: &BindSource) -> Result<Vec<Row>> {
        let shape = ExecutionShape::of(spec)?;
        let params = ParameterMap::for_endpoint(spec);
        let mut issues = Vec::new();

        let procedure = match spec.procedure_text() {
            Some(text) => Some(prepare(text, spec, &params, source, true, &mut issues)?),
            None => None,
        };
        let query = match spec.query_text() {
            Some(text) => Some(prepare(text, spec, &params, source, false, &mut issues)?),
            None => None,
        };
        if !issues.is_empty() {
            debug!(endpoint = %spec.name, issues = issues.len(), "Request rejected by validation");
            return Err(Error::ValidationFailed(issues));
        }

        let is_get = source.method() == HttpMethod::Get;
        let mut conn = self.pool.acquire().await?;
        info!(endpoint = %spec.name, shape = ?shape, engine = ?self.dialect.engine(), "Executing endpoint");

        let result = match (procedure, query) {
            (None, Some(query)) => {
                self.dialect
                    .run_query(&mut *conn, &query.sql, &query.binds, true)
                    .await
            }
            (Some(procedure), query) => {
                let call = ProcedureCall {
                    sql: procedure.sql,
                    outputs: procedure.outputs,
                };
                let outcome = match self
                    .dialect
                    .run_procedure(&mut *conn, &call, &procedure.binds, !is_get)
                    .await
                {
                    Ok(outputs) => match query {
                        Some(query) => {
                            let sql = substitute_outputs(self.dialect.as_ref(), &query.sql, &outputs);
                            debug!(sql = %sql, "Running trailing query with procedure outputs");
                            self.dialect
                                .run_query(&mut *conn, &sql, &query.binds, !is_get)
                                .await
                        }
                        None => Ok(vec![outputs_row(&call, &outputs)]),
                    },
                    Err(e) => Err(e),
                };

                // Side effects of a GET are never kept.
                if is_get {
                    if let Err(e) = conn.rollback().await {
                        warn!(endpoint = %spec.name, error = %e, "Rollback after GET procedure failed, discarding connection");
                        conn.discard();
                    }
                }
                outcome
            }
            (None, None) => Err(Error::EndpointMisconfigured(format!(
                "endpoint '{}' has no statement to run",
                spec.name
            ))),
        };

        if let Err(e) = &result {
            warn!(endpoint = %spec.name, error = %e, "Endpoint execution failed");
        }
        result
    }
}

/// Normalise one statement and validate the values it binds.
///
/// Structural problems fail immediately; value problems are appended to
/// `issues` so every bad parameter is reported at once.
fn prepare(
    text: &str,
    spec: &EndpointSpec,
    params: &ParameterMap,
    source: &BindSource,
    is_procedure: bool,
    issues: &mut Vec<ParameterIssue>,
) -> Result<Prepared> {
    let extracted = placeholder::extract(text)?;

    if is_procedure {
        for name in &extracted.path_params {
            if !spec.url_pattern.contains(&format!("{{{name}}}")) {
                return Err(Error::Rewrite(format!(
                    "procedure uses {{{name}}} but the URL pattern has no such placeholder"
                )));
            }
        }
    }

    let placeholders = placeholder::scan(text);
    let sql = placeholder::rewrite(text, &placeholders, |p| match p.kind {
        PlaceholderKind::Path | PlaceholderKind::Dollar => Some(format!(":{}", p.name)),
        PlaceholderKind::Query | PlaceholderKind::Output => None,
    });

    let binds = bind_inputs(&extracted, params, source, issues)?;
    let outputs = if is_procedure {
        extracted
            .output_params
            .iter()
            .map(|name| OutputParam {
                name: name.clone(),
                out_type: OutType::for_kind(&params.lookup_any(name).kind),
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(Prepared {
        sql,
        binds,
        outputs,
    })
}

fn bind_inputs(
    extracted: &Extracted,
    params: &ParameterMap,
    source: &BindSource,
    issues: &mut Vec<ParameterIssue>,
) -> Result<BindSet> {
    let mut binds = BindSet::new();
    let mut push = |result: std::result::Result<BoundParam, ParameterIssue>| match result {
        Ok(bound) => binds.insert(bound),
        Err(issue) => issues.push(issue),
    };

    for name in &extracted.path_params {
        let raw = source
            .path_value(name)
            .map(|v| serde_json::Value::String(v.to_string()));
        let spec = params.lookup(ParameterClass::Path, name);
        push(validate_value(&spec, ParameterClass::Path, raw.as_ref()));
    }

    for name in &extracted.query_params {
        let (class, raw) = source.resolve(params, name);
        let spec = params.lookup(class, name);
        push(validate_value(&spec, class, raw.as_ref()));
    }

    if let Some(name) = &extracted.dollar_param {
        let payload = serde_json::to_string(&source.merged())?;
        binds.insert(BoundParam::new(name, SqlValue::Text(payload)));
    }

    Ok(binds)
}

/// Inline procedure outputs into `@name` placeholders of a trailing query
fn substitute_outputs(dialect: &dyn Dialect, sql: &str, outputs: &OutputValues) -> String {
    let placeholders = placeholder::scan(sql);
    placeholder::rewrite(sql, &placeholders, |p| {
        if p.kind != PlaceholderKind::Output {
            return None;
        }
        outputs.get(&p.name).map(|value| dialect.literal(value))
    })
}

fn outputs_row(call: &ProcedureCall, outputs: &OutputValues) -> Row {
    call.outputs
        .iter()
        .map(|o| {
            let value = outputs.get(&o.name).map_or(serde_json::Value::Null, SqlValue::to_json);
            (o.name.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use dynrest_common::config::{Engine, PoolConfig};
    use dynrest_common::error::IssueReason;
    use serde_json::json;

    use crate::connection::{Direction, Outcome, Params, Statement};
    use crate::dialect::dialect_for;
    use crate::memory::{Call, MemoryConnector};

    fn endpoint(value: serde_json::Value) -> EndpointSpec {
        let mut base = json!({
            "id": "1",
            "name": "test",
            "method": "GET",
            "urlPattern": "/api/orders/{id}"
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), value.as_object()) {
            base.extend(extra.clone());
        }
        serde_json::from_value(base).unwrap()
    }

    fn object(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn source(method: HttpMethod, path: &[(&str, &str)], query: serde_json::Value, body: serde_json::Value) -> BindSource {
        let path: HashMap<String, String> = path
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        BindSource::new(method, path, object(query), object(body))
    }

    fn executor(connector: &MemoryConnector, engine: Engine) -> Executor {
        let pool = ConnectionPool::new(Arc::new(connector.clone()), PoolConfig::default());
        Executor::new(pool, dialect_for(engine))
    }

    fn order_rows(statement: &Statement) -> Result<Outcome> {
        let id = match &statement.params {
            Params::Named(binds) => binds.first().map(|b| b.value.to_json()),
            _ => None,
        };
        Ok(Outcome::from_rows(vec![object(json!({"ID": id, "STATUS": "open"}))]))
    }

    #[test]
    fn test_shape() {
        let spec = endpoint(json!({"sqlQuery": "SELECT 1", "sqlProcedure": "  "}));
        assert_eq!(ExecutionShape::of(&spec).unwrap(), ExecutionShape::QueryOnly);

        let spec = endpoint(json!({"sqlQuery": "SELECT 1", "sqlProcedure": "BEGIN p; END;"}));
        assert_eq!(ExecutionShape::of(&spec).unwrap(), ExecutionShape::ProcedureThenQuery);

        let err = ExecutionShape::of(&endpoint(json!({}))).unwrap_err();
        assert!(matches!(err, Error::EndpointMisconfigured(_)));
    }

    #[tokio::test]
    async fn test_get_order_by_id() {
        let connector = MemoryConnector::new(order_rows);
        let executor = executor(&connector, Engine::Named);
        let spec = endpoint(json!({"sqlQuery": "SELECT * FROM ORDERS WHERE ID=:id"}));

        let rows = executor
            .execute(&spec, &source(HttpMethod::Get, &[("id", "7")], json!({}), json!({})))
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["ID"], json!("7"));
        let statements = connector.statements();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].auto_commit);
        assert_eq!(
            statements[0].params,
            Params::Named(vec![crate::connection::NamedBind::input(
                "id",
                SqlValue::Text("7".into())
            )])
        );
        assert_eq!(executor.pool().idle_count(), 1);
    }

    #[tokio::test]
    async fn test_path_placeholder_in_query_becomes_named_bind() {
        let connector = MemoryConnector::echo();
        let executor = executor(&connector, Engine::Named);
        let spec = endpoint(json!({"sqlQuery": "SELECT * FROM ORDERS WHERE ID = {id}"}));

        executor
            .execute(&spec, &source(HttpMethod::Get, &[("id", "9")], json!({}), json!({})))
            .await
            .unwrap();
        assert_eq!(
            connector.statements()[0].sql,
            "SELECT * FROM ORDERS WHERE ID = :id"
        );
    }

    #[tokio::test]
    async fn test_validation_errors_are_aggregated_before_execution() {
        let connector = MemoryConnector::echo();
        let executor = executor(&connector, Engine::Named);
        let spec = endpoint(json!({
            "method": "POST",
            "urlPattern": "/api/payments",
            "sqlQuery": "INSERT INTO PAYMENTS (AMOUNT, REF) VALUES (:amount, :ref)",
            "payloadParams": [
                {"name": "amount", "type": "number", "precision": 2, "required": true},
                {"name": "ref", "type": "string", "required": true}
            ]
        }));

        let err = executor
            .execute(
                &spec,
                &source(HttpMethod::Post, &[], json!({}), json!({"amount": "1.234", "ref": ""})),
            )
            .await
            .unwrap_err();

        let Error::ValidationFailed(issues) = err else {
            panic!("expected validation failure");
        };
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].reason, IssueReason::TooPrecise { precision: 2 });
        assert_eq!(issues[0].class, ParameterClass::Payload);
        assert_eq!(issues[1].reason, IssueReason::RequiredMissing);
        assert!(connector.journal().is_empty());
        assert_eq!(connector.connections_opened(), 0);
    }

    #[tokio::test]
    async fn test_procedure_output_feeds_trailing_query() {
        let connector = MemoryConnector::new(|statement| {
            let mut outcome = Outcome::default();
            if let Params::Named(binds) = &statement.params {
                for bind in binds {
                    if let Direction::Out(_) = bind.direction {
                        outcome
                            .out_values
                            .insert(bind.name.clone(), SqlValue::Text("42".into()));
                    }
                }
            }
            if statement.sql.starts_with("SELECT") {
                outcome.rows.push(object(json!({"ID": 42})));
            }
            Ok(outcome)
        });
        let executor = executor(&connector, Engine::Named);
        let spec = endpoint(json!({
            "method": "POST",
            "urlPattern": "/api/items",
            "sqlProcedure": "BEGIN create_item(:name, @newId); END;",
            "sqlQuery": "SELECT * FROM ITEMS WHERE ID = @newId AND OWNER = :name",
            "payloadParams": [{"name": "newId", "type": "number"}]
        }));

        let rows = executor
            .execute(&spec, &source(HttpMethod::Post, &[], json!({}), json!({"name": "widget"})))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let statements = connector.statements();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].auto_commit);
        assert_eq!(
            statements[1].sql,
            "SELECT * FROM ITEMS WHERE ID = 42 AND OWNER = :name"
        );
        assert!(statements[1].auto_commit);
        assert!(!connector.journal().contains(&Call::Rollback));
    }

    #[tokio::test]
    async fn test_text_outputs_are_quoted() {
        let connector = MemoryConnector::new(|statement| {
            let mut outcome = Outcome::default();
            outcome
                .out_values
                .insert("code".into(), SqlValue::Text("O'K".into()));
            if statement.sql.starts_with("SELECT") {
                outcome.rows.push(object(json!({"CODE": "O'K"})));
            }
            Ok(outcome)
        });
        let executor = executor(&connector, Engine::Named);
        let spec = endpoint(json!({
            "method": "POST",
            "urlPattern": "/api/codes",
            "sqlProcedure": "BEGIN make_code(@code); END;",
            "sqlQuery": "SELECT * FROM CODES WHERE CODE = @code"
        }));

        executor
            .execute(&spec, &source(HttpMethod::Post, &[], json!({}), json!({})))
            .await
            .unwrap();
        assert_eq!(
            connector.statements()[1].sql,
            "SELECT * FROM CODES WHERE CODE = 'O''K'"
        );
    }

    #[tokio::test]
    async fn test_get_procedure_is_rolled_back() {
        let connector = MemoryConnector::new(|_| Ok(Outcome::default()));
        let executor = executor(&connector, Engine::Named);
        let spec = endpoint(json!({"sqlProcedure": "BEGIN audit_read({id}, @total); END;"}));

        let rows = executor
            .execute(&spec, &source(HttpMethod::Get, &[("id", "3")], json!({}), json!({})))
            .await
            .unwrap();
        assert_eq!(rows, vec![object(json!({"total": null}))]);

        let journal = connector.journal();
        assert!(matches!(&journal[0], Call::Execute(s) if !s.auto_commit));
        assert_eq!(journal.last(), Some(&Call::Rollback));
    }

    #[tokio::test]
    async fn test_unknown_path_placeholder_in_procedure_is_fatal() {
        let connector = MemoryConnector::echo();
        let executor = executor(&connector, Engine::Named);
        let spec = endpoint(json!({"sqlProcedure": "BEGIN p({other}); END;"}));

        let err = executor
            .execute(&spec, &source(HttpMethod::Get, &[("id", "3")], json!({}), json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rewrite(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_dollar_bind_carries_whole_payload() {
        let connector = MemoryConnector::echo();
        let executor = executor(&connector, Engine::Named);
        let spec = endpoint(json!({
            "method": "PUT",
            "sqlProcedure": "BEGIN save_order({id}, $doc); END;"
        }));

        executor
            .execute(
                &spec,
                &source(HttpMethod::Put, &[("id", "5")], json!({}), json!({"qty": 2})),
            )
            .await
            .unwrap();

        let statements = connector.statements();
        assert_eq!(statements[0].sql, "BEGIN save_order(:id, :doc); END;");
        let Params::Named(binds) = &statements[0].params else {
            panic!("expected named binds");
        };
        let doc = binds.iter().find(|b| b.name == "doc").unwrap();
        let SqlValue::Text(text) = &doc.value else {
            panic!("expected text payload");
        };
        let payload: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(payload, json!({"qty": 2, "id": "5"}));
    }

    #[tokio::test]
    async fn test_execution_failure_releases_connection() {
        let connector = MemoryConnector::new(|_| {
            Err(Error::ExecutionFailed("ORA-00942: table or view does not exist".into()))
        });
        let executor = executor(&connector, Engine::Session);
        let spec = endpoint(json!({"sqlQuery": "SELECT * FROM MISSING WHERE ID = :id"}));

        let err = executor
            .execute(&spec, &source(HttpMethod::Get, &[("id", "1")], json!({}), json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "ORA-00942: table or view does not exist");
        assert_eq!(executor.pool().available(), PoolConfig::default().max_size);
        assert_eq!(executor.pool().idle_count(), 1);
    }

    #[tokio::test]
    async fn test_session_engine_procedure_then_query() {
        let connector = MemoryConnector::new(|statement| {
            if statement.sql == "SELECT @newId AS newId" {
                return Ok(Outcome::from_rows(vec![object(json!({"newId": 42}))]));
            }
            Ok(Outcome::default())
        });
        let executor = executor(&connector, Engine::Session);
        let spec = endpoint(json!({
            "method": "POST",
            "urlPattern": "/api/items",
            "sqlProcedure": "CALL create_item(:name, @newId)",
            "sqlQuery": "SELECT * FROM items WHERE id = @newId"
        }));

        executor
            .execute(&spec, &source(HttpMethod::Post, &[], json!({}), json!({"name": "w"})))
            .await
            .unwrap();

        let statements = connector.statements();
        let last = statements.last().unwrap();
        assert_eq!(last.sql, "SELECT * FROM items WHERE id = 42");
        assert!(connector.journal().contains(&Call::Commit));
    }

    #[tokio::test]
    async fn test_undeclared_numeric_output_is_inlined_bare() {
        let connector = MemoryConnector::new(|statement| {
            let mut outcome = Outcome::default();
            outcome
                .out_values
                .insert("newId".into(), SqlValue::Text("42".into()));
            if statement.sql.starts_with("SELECT") {
                outcome.rows.push(object(json!({"ID": 42})));
            }
            Ok(outcome)
        });
        let executor = executor(&connector, Engine::Named);
        let spec = endpoint(json!({
            "method": "POST",
            "urlPattern": "/api/items",
            "sqlProcedure": "BEGIN create_item(@newId); END;",
            "sqlQuery": "SELECT * FROM ITEMS WHERE ID = @newId"
        }));

        executor
            .execute(&spec, &source(HttpMethod::Post, &[], json!({}), json!({})))
            .await
            .unwrap();
        assert_eq!(
            connector.statements()[1].sql,
            "SELECT * FROM ITEMS WHERE ID = 42"
        );
    }

    #[tokio::test]
    async fn test_session_outputs_escape_backslashes() {
        let connector = MemoryConnector::new(|statement| {
            if statement.sql == "SELECT @code AS code" {
                return Ok(Outcome::from_rows(vec![object(json!({"code": "x\\"}))]));
            }
            Ok(Outcome::default())
        });
        let executor = executor(&connector, Engine::Session);
        let spec = endpoint(json!({
            "method": "POST",
            "urlPattern": "/api/codes",
            "sqlProcedure": "CALL make_code(@code)",
            "sqlQuery": "SELECT * FROM codes WHERE code = @code AND owner = 'me'"
        }));

        executor
            .execute(&spec, &source(HttpMethod::Post, &[], json!({}), json!({})))
            .await
            .unwrap();
        assert_eq!(
            connector.statements().last().unwrap().sql,
            "SELECT * FROM codes WHERE code = 'x\\\\' AND owner = 'me'"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_procedure_does_not_reach_idle_pool() {
        let connector = MemoryConnector::echo();
        connector.set_stalled(true);
        let executor = executor(&connector, Engine::Session);
        let spec = endpoint(json!({
            "method": "POST",
            "urlPattern": "/api/items",
            "sqlProcedure": "CALL create_item(:name, @newId)"
        }));
        let request = source(HttpMethod::Post, &[], json!({}), json!({"name": "w"}));

        let waited = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            executor.execute(&spec, &request),
        )
        .await;
        assert!(waited.is_err());
        assert_eq!(connector.journal()[0], Call::Begin);
        assert_eq!(executor.pool().idle_count(), 0);
        assert_eq!(executor.pool().available(), PoolConfig::default().max_size);
    }

    #[tokio::test]
    async fn test_failed_get_rollback_discards_connection() {
        let connector = MemoryConnector::echo();
        connector.set_rollback_ok(false);
        let executor = executor(&connector, Engine::Named);
        let spec = endpoint(json!({"sqlProcedure": "BEGIN audit_read({id}, @total); END;"}));

        executor
            .execute(&spec, &source(HttpMethod::Get, &[("id", "3")], json!({}), json!({})))
            .await
            .unwrap();
        assert_eq!(executor.pool().idle_count(), 0);
        assert_eq!(executor.pool().available(), PoolConfig::default().max_size);
    }
}
