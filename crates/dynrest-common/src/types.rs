//! Endpoint model shared across crates

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

// ============================================================================
// Endpoint Types
// ============================================================================

/// HTTP verbs an endpoint may be declared with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(Error::BadRequest(format!("unsupported HTTP method {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    #[default]
    Active,
    Inactive,
}

/// Declared type of a parameter, with the constraints that apply to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ParamKind {
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
        /// Comma separated list of accepted values
        #[serde(default, skip_serializing_if = "Option::is_none")]
        allowed_values: Option<String>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minimum: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        maximum: Option<f64>,
        /// Digits after the decimal point; 0 means integer
        #[serde(default, skip_serializing_if = "Option::is_none")]
        precision: Option<u32>,
    },
    Date {
        /// Template made of YYYY, MM, DD, HH24, HH, MI, SS and AM/PM tokens
        #[serde(default, skip_serializing_if = "Option::is_none")]
        date_format: Option<String>,
    },
    Object,
    Array,
}

impl ParamKind {
    #[must_use]
    pub fn unconstrained_string() -> Self {
        Self::String {
            max_length: None,
            allowed_values: None,
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String { .. } => "string",
            Self::Number { .. } => "number",
            Self::Date { .. } => "date",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

/// Metadata describing one bindable parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: ParamKind,
    #[serde(default)]
    pub required: bool,
}

impl ParameterSpec {
    /// Descriptor used for names that appear in SQL but were never declared
    pub fn undeclared(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::unconstrained_string(),
            required: false,
        }
    }
}

/// Declarative definition of one routable, SQL-backed operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSpec {
    pub id: String,
    pub name: String,
    pub method: HttpMethod,
    pub url_pattern: String,
    #[serde(default)]
    pub require_token: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_procedure: Option<String>,
    #[serde(default)]
    pub path_params: Vec<ParameterSpec>,
    #[serde(default)]
    pub query_params: Vec<ParameterSpec>,
    #[serde(default)]
    pub payload_params: Vec<ParameterSpec>,
    #[serde(default)]
    pub status: EndpointStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub request_count: u64,
}

fn non_blank(text: Option<&String>) -> Option<&str> {
    text.map(String::as_str).filter(|s| !s.trim().is_empty())
}

impl EndpointSpec {
    /// Query text, ignoring a blank field
    #[must_use]
    pub fn query_text(&self) -> Option<&str> {
        non_blank(self.sql_query.as_ref())
    }

    /// Procedure text, ignoring a blank field
    #[must_use]
    pub fn procedure_text(&self) -> Option<&str> {
        non_blank(self.sql_procedure.as_ref())
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == EndpointStatus::Active
    }

    /// Name of the placeholder written as the optional trailing `/{name}`
    #[must_use]
    pub fn optional_path_param(&self) -> Option<&str> {
        let rest = self.url_pattern.trim_end_matches('/').strip_suffix('}')?;
        let open = rest.rfind("/{")?;
        let name = &rest[open + 2..];
        (!name.is_empty() && !name.contains(['{', '}', '/'])).then_some(name)
    }

    /// Structural problems that make the endpoint unusable.
    ///
    /// An empty list means the definition is sound.
    #[must_use]
    pub fn check(&self, api_root: &str) -> Vec<String> {
        let mut problems = Vec::new();
        let root = format!("{}/", api_root.trim_end_matches('/'));

        if !self.url_pattern.starts_with(&root) {
            problems.push(format!("url pattern must start with {root}"));
        }
        if self.query_text().is_none() && self.procedure_text().is_none() {
            problems.push("either a query or a procedure is required".to_string());
        }

        let optional = self.optional_path_param();
        for param in &self.path_params {
            let placeholder = format!("{{{}}}", param.name);
            if !param.required
                && self.url_pattern.contains(&placeholder)
                && optional != Some(param.name.as_str())
            {
                problems.push(format!(
                    "path parameter '{}' is structurally required and cannot be optional",
                    param.name
                ));
            }
        }

        problems
    }
}

/// Where a parameter's value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterClass {
    Path,
    Query,
    Payload,
}

impl fmt::Display for ParameterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Payload => "payload",
        })
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// Response envelope returned by every endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl ApiResponse {
    #[must_use]
    pub fn ok(data: Vec<serde_json::Value>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            errors: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            errors: None,
        }
    }

    #[must_use]
    pub fn errors(messages: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: None,
            errors: Some(messages),
        }
    }
}

impl From<&Error> for ApiResponse {
    fn from(err: &Error) -> Self {
        match err {
            Error::ValidationFailed(issues) => {
                Self::errors(issues.iter().map(ToString::to_string).collect())
            }
            other => Self::error(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoint(url: &str) -> EndpointSpec {
        serde_json::from_value(json!({
            "id": "1",
            "name": "orders",
            "method": "GET",
            "urlPattern": url,
            "sqlQuery": "SELECT * FROM ORDERS WHERE ID = :id"
        }))
        .unwrap()
    }

    #[test]
    fn test_http_method_parse() {
        assert_eq!("patch".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        let err = "TRACE".parse::<HttpMethod>().unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_parameter_spec_serde() {
        let spec: ParameterSpec = serde_json::from_value(json!({
            "name": "amount",
            "type": "number",
            "required": true,
            "precision": 2,
            "maximum": 100.0
        }))
        .unwrap();

        assert!(spec.required);
        assert_eq!(
            spec.kind,
            ParamKind::Number {
                minimum: None,
                maximum: Some(100.0),
                precision: Some(2)
            }
        );
    }

    #[test]
    fn test_date_format_field_name() {
        let spec: ParameterSpec = serde_json::from_value(json!({
            "name": "from",
            "type": "date",
            "dateFormat": "YYYY-MM-DD"
        }))
        .unwrap();
        assert_eq!(
            spec.kind,
            ParamKind::Date {
                date_format: Some("YYYY-MM-DD".to_string())
            }
        );
        assert!(!spec.required);
    }

    #[test]
    fn test_blank_sql_is_absent() {
        let mut spec = endpoint("/api/orders/{id}");
        spec.sql_procedure = Some("   ".to_string());
        assert!(spec.procedure_text().is_none());
        assert!(spec.query_text().is_some());
    }

    #[test]
    fn test_optional_path_param() {
        assert_eq!(
            endpoint("/api/orders/{id}").optional_path_param(),
            Some("id")
        );
        assert_eq!(endpoint("/api/orders/{id}/lines").optional_path_param(), None);
    }

    #[test]
    fn test_check_rejects_optional_structural_param() {
        let mut spec = endpoint("/api/orders/{id}/lines");
        spec.path_params.push(ParameterSpec::undeclared("id"));
        let problems = spec.check("/api");
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("structurally required"));
    }

    #[test]
    fn test_check_allows_optional_trailing_param() {
        let mut spec = endpoint("/api/orders/{id}");
        spec.path_params.push(ParameterSpec::undeclared("id"));
        assert!(spec.check("/api").is_empty());
    }

    #[test]
    fn test_check_requires_root_and_sql() {
        let mut spec = endpoint("/orders");
        spec.sql_query = None;
        assert_eq!(spec.check("/api").len(), 2);
    }

    #[test]
    fn test_validation_envelope_lists_every_issue() {
        use crate::error::{IssueReason, ParameterIssue};

        let err = Error::ValidationFailed(vec![
            ParameterIssue::new("a", ParameterClass::Query, IssueReason::RequiredMissing),
            ParameterIssue::new("b", ParameterClass::Path, IssueReason::NotNumeric),
        ]);
        let body = ApiResponse::from(&err);
        assert!(!body.success);
        assert_eq!(body.errors.unwrap().len(), 2);
    }
}
