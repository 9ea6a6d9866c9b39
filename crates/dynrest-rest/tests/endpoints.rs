//! End-to-end tests for the endpoint pipeline

use std::sync::Arc;

use actix_web::{test, web, App};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};

use dynrest_auth::{AuthGuard, InMemoryKeyStore, InMemorySessionStore};
use dynrest_common::config::{Engine, PoolConfig, RequestSettings};
use dynrest_common::types::EndpointSpec;
use dynrest_engine::connection::{Outcome, Params, Statement};
use dynrest_engine::{dialect_for, ConnectionPool, Executor, InMemorySpecStore, MemoryConnector};
use dynrest_rest::server::configure;
use dynrest_rest::AppState;

const SECRET: &[u8] = b"integration-test-secret";

fn endpoints() -> Vec<EndpointSpec> {
    serde_json::from_value(json!([
        {
            "id": "1",
            "name": "order",
            "method": "GET",
            "urlPattern": "/api/orders/{id}",
            "sqlQuery": "SELECT * FROM ORDERS WHERE ID=:id"
        },
        {
            "id": "2",
            "name": "create-order",
            "method": "POST",
            "urlPattern": "/api/orders",
            "requireToken": true,
            "sqlProcedure": "BEGIN create_order(:appUser, :qty, @orderId); END;",
            "sqlQuery": "SELECT * FROM ORDERS WHERE ID = @orderId",
            "payloadParams": [
                {"name": "qty", "type": "number", "precision": 0, "minimum": 1, "required": true},
                {"name": "orderId", "type": "number"}
            ]
        },
        {
            "id": "3",
            "name": "retired",
            "method": "GET",
            "urlPattern": "/api/retired",
            "sqlQuery": "SELECT 1 FROM DUAL",
            "status": "inactive"
        }
    ]))
    .unwrap()
}

/// Answers order lookups with one row echoing the bound id
fn database(statement: &Statement) -> dynrest_common::Result<Outcome> {
    let mut outcome = Outcome::default();
    if let Params::Named(binds) = &statement.params {
        for bind in binds {
            match bind.direction {
                dynrest_engine::connection::Direction::Out(_) => {
                    outcome
                        .out_values
                        .insert(bind.name.clone(), dynrest_engine::SqlValue::Text("42".into()));
                }
                dynrest_engine::connection::Direction::In => {}
            }
        }
        if statement.sql.starts_with("SELECT") {
            let id = binds.first().map_or(json!(null), |b| b.value.to_json());
            let row = json!({"ID": id, "STATUS": "open"});
            outcome.rows.push(row.as_object().cloned().unwrap_or_default());
        }
    }
    if statement.sql.contains("= 42") {
        let row = json!({"ID": 42, "STATUS": "new"});
        outcome.rows.push(row.as_object().cloned().unwrap_or_default());
    }
    Ok(outcome)
}

fn state(connector: &MemoryConnector) -> Arc<AppState> {
    let keys = Arc::new(InMemoryKeyStore::new());
    keys.insert_secret("k1", SECRET);
    let sessions = Arc::new(InMemorySessionStore::new());
    sessions.open("j1", "alice");

    let pool = ConnectionPool::new(Arc::new(connector.clone()), PoolConfig::default());
    Arc::new(AppState {
        store: Arc::new(InMemorySpecStore::with_specs("/api", endpoints()).unwrap()),
        guard: Arc::new(AuthGuard::new(keys, sessions)),
        executor: Arc::new(Executor::new(pool, dialect_for(Engine::Named))),
        settings: RequestSettings::default(),
    })
}

fn token(exp_offset: i64) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("k1".to_string());
    let claims = json!({"jti": "j1", "exp": Utc::now().timestamp() + exp_offset});
    encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

macro_rules! app {
    ($connector:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new(state(&$connector)))
                .configure(configure),
        )
        .await
    };
}

#[actix_rt::test]
async fn test_get_order_by_path_id() {
    let connector = MemoryConnector::new(database);
    let app = app!(connector);

    let req = test::TestRequest::get().uri("/api/orders/7").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"], json!([{"ID": "7", "STATUS": "open"}]));
    assert!(body.get("error").is_none());
}

#[actix_rt::test]
async fn test_unmatched_route_is_404() {
    let connector = MemoryConnector::new(database);
    let app = app!(connector);

    for uri in ["/api/customers/1", "/api/retired", "/elsewhere"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404, "{uri}");
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], json!(false));
    }
}

#[actix_rt::test]
async fn test_protected_endpoint_requires_token() {
    let connector = MemoryConnector::new(database);
    let app = app!(connector);

    let req = test::TestRequest::post()
        .uri("/api/orders")
        .set_json(json!({"qty": 2}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    assert!(connector.statements().is_empty());

    let req = test::TestRequest::post()
        .uri("/api/orders")
        .insert_header(("Authorization", format!("Bearer {}", token(-600))))
        .set_json(json!({"qty": 2}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], json!("Unauthorized: token expired"));
}

#[actix_rt::test]
async fn test_create_order_chains_procedure_output() {
    let connector = MemoryConnector::new(database);
    let app = app!(connector);

    let req = test::TestRequest::post()
        .uri("/api/orders")
        .insert_header(("Authorization", format!("Bearer {}", token(600))))
        .set_json(json!({"qty": 2}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let statements = connector.statements();
    assert_eq!(statements.len(), 2);
    let Params::Named(binds) = &statements[0].params else {
        panic!("expected named binds");
    };
    assert_eq!(binds[0].name, "appUser");
    assert_eq!(binds[0].value, dynrest_engine::SqlValue::Text("alice".into()));
    assert_eq!(binds[1].value, dynrest_engine::SqlValue::Integer(2));
    assert_eq!(statements[1].sql, "SELECT * FROM ORDERS WHERE ID = 42");
}

#[actix_rt::test]
async fn test_validation_errors_are_listed() {
    let connector = MemoryConnector::new(database);
    let app = app!(connector);

    let req = test::TestRequest::post()
        .uri("/api/orders")
        .insert_header(("Authorization", format!("Bearer {}", token(600))))
        .set_json(json!({"qty": "1.5"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], json!(false));
    assert_eq!(
        body["errors"],
        json!(["payload parameter 'qty' must be an integer"])
    );
    assert!(connector.statements().is_empty());
}

#[actix_rt::test]
async fn test_non_object_body_is_rejected() {
    let connector = MemoryConnector::new(database);
    let app = app!(connector);

    let req = test::TestRequest::post()
        .uri("/api/orders")
        .insert_header(("Authorization", format!("Bearer {}", token(600))))
        .insert_header(("Content-Type", "application/json"))
        .set_payload("[1, 2, 3]")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_rt::test]
async fn test_health() {
    let connector = MemoryConnector::new(database);
    let app = app!(connector);

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], json!("healthy"));
    assert_eq!(body["engine"], json!("named"));
}
