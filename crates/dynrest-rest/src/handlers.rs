//! HTTP handlers for declared endpoints

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use actix_web::http::header::AUTHORIZATION;
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::Value as JsonValue;
use tracing::{info, warn};
use uuid::Uuid;

use dynrest_auth::AuthGuard;
use dynrest_common::config::RequestSettings;
use dynrest_common::error::{Error, Result};
use dynrest_common::types::{ApiResponse, HttpMethod};
use dynrest_engine::{BindSource, EndpointRegistry, Executor, Row, SpecStore};

/// Shared state of the request pipeline
pub struct AppState {
    pub store: Arc<dyn SpecStore>,
    pub guard: Arc<AuthGuard>,
    pub executor: Arc<Executor>,
    pub settings: RequestSettings,
}

/// Raw pieces of one HTTP request
#[derive(Debug, Clone, Copy)]
pub struct RawRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query_string: &'a str,
    pub authorization: Option<&'a str>,
    pub body: &'a [u8],
}

fn not_found(raw: &RawRequest<'_>) -> Error {
    Error::RouteNotFound {
        method: raw.method.to_string(),
        path: raw.path.to_string(),
    }
}

/// Decode a query string; a repeated key keeps its last value
fn parse_query(query_string: &str) -> serde_json::Map<String, JsonValue> {
    url::form_urlencoded::parse(query_string.as_bytes())
        .map(|(k, v)| (k.into_owned(), JsonValue::String(v.into_owned())))
        .collect()
}

fn parse_body(body: &[u8]) -> Result<serde_json::Map<String, JsonValue>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::Map::new());
    }
    match serde_json::from_slice(body) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(_) => Err(Error::BadRequest("request body must be a JSON object".to_string())),
        Err(e) => Err(Error::BadRequest(format!("request body is not valid JSON: {e}"))),
    }
}

/// Resolve, authorize, bind and execute one request
pub async fn dispatch(state: &AppState, raw: RawRequest<'_>) -> Result<Vec<Row>> {
    let root = &state.settings.api_root;
    let under_root = raw
        .path
        .strip_prefix(root.as_str())
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'));
    if !under_root {
        return Err(not_found(&raw));
    }
    let method = HttpMethod::from_str(raw.method).map_err(|_| not_found(&raw))?;

    let registry = EndpointRegistry::load(state.store.as_ref()).await?;
    let matched = registry
        .resolve(method, raw.path)
        .ok_or_else(|| not_found(&raw))?;
    let spec = matched.spec;

    let identity = if spec.require_token {
        Some(state.guard.authorize(raw.authorization).await?)
    } else {
        None
    };

    let body = if method == HttpMethod::Get {
        serde_json::Map::new()
    } else {
        parse_body(raw.body)?
    };
    let mut source = BindSource::new(method, matched.captures, parse_query(raw.query_string), body);
    if let Some(identity) = identity {
        source.inject(
            &state.settings.identity_param,
            JsonValue::String(identity.subject),
        );
    }

    state.executor.execute(spec, &source).await
}

/// Render a pipeline result in the response envelope
#[must_use]
pub fn respond(result: &Result<Vec<Row>>) -> HttpResponse {
    match result {
        Ok(rows) => HttpResponse::Ok().json(ApiResponse::ok(
            rows.iter().cloned().map(JsonValue::Object).collect(),
        )),
        Err(e) => {
            let status =
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            HttpResponse::build(status).json(ApiResponse::from(e))
        }
    }
}

/// Any method, any path: the declared endpoint table decides
pub async fn endpoint_handler(
    state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let started = Instant::now();
    let request_id = Uuid::new_v4();
    let raw = RawRequest {
        method: req.method().as_str(),
        path: req.path(),
        query_string: req.query_string(),
        authorization: req.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()),
        body: &body,
    };

    let result = dispatch(&state, raw).await;
    let response = respond(&result);

    if state.settings.log_requests {
        let status = response.status().as_u16();
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &result {
            Ok(rows) => info!(
                %request_id, method = raw.method, path = raw.path, status, rows = rows.len(), elapsed_ms,
                "Endpoint request served"
            ),
            Err(e) => warn!(
                %request_id, method = raw.method, path = raw.path, status, code = e.error_code(), elapsed_ms,
                "Endpoint request failed"
            ),
        }
    }

    response
}

/// Health check
pub async fn health_handler(state: web::Data<Arc<AppState>>) -> HttpResponse {
    let pool = state.executor.pool();
    let mut details = HashMap::new();
    details.insert("available_connections", pool.available());
    details.insert("idle_connections", pool.idle_count());

    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "dynrest",
        "version": env!("CARGO_PKG_VERSION"),
        "engine": state.executor.dialect().engine(),
        "pool": details,
    }))
}
