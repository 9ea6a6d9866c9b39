//! Parameter lookup and validation

use std::borrow::Cow;
use std::collections::HashMap;

use serde_json::Value as JsonValue;

use dynrest_common::error::{IssueReason, ParameterIssue};
use dynrest_common::types::{EndpointSpec, HttpMethod, ParamKind, ParameterClass, ParameterSpec};

use crate::bind::{is_numeric_literal, BoundParam, SqlValue};
use crate::datefmt;

/// Declared parameters of one endpoint, keyed by class and name
#[derive(Debug, Clone, Default)]
pub struct ParameterMap {
    path: HashMap<String, ParameterSpec>,
    query: HashMap<String, ParameterSpec>,
    payload: HashMap<String, ParameterSpec>,
}

fn index(params: &[ParameterSpec]) -> HashMap<String, ParameterSpec> {
    params.iter().map(|p| (p.name.clone(), p.clone())).collect()
}

impl ParameterMap {
    #[must_use]
    pub fn for_endpoint(spec: &EndpointSpec) -> Self {
        Self {
            path: index(&spec.path_params),
            query: index(&spec.query_params),
            payload: index(&spec.payload_params),
        }
    }

    fn class_map(&self, class: ParameterClass) -> &HashMap<String, ParameterSpec> {
        match class {
            ParameterClass::Path => &self.path,
            ParameterClass::Query => &self.query,
            ParameterClass::Payload => &self.payload,
        }
    }

    #[must_use]
    pub fn declares(&self, class: ParameterClass, name: &str) -> bool {
        self.class_map(class).contains_key(name)
    }

    /// Descriptor for `name` in `class`, or an unconstrained optional string
    #[must_use]
    pub fn lookup(&self, class: ParameterClass, name: &str) -> Cow<'_, ParameterSpec> {
        self.class_map(class)
            .get(name)
            .map_or_else(|| Cow::Owned(ParameterSpec::undeclared(name)), Cow::Borrowed)
    }

    /// Descriptor for `name` from whichever class declares it
    #[must_use]
    pub fn lookup_any(&self, name: &str) -> Cow<'_, ParameterSpec> {
        self.payload
            .get(name)
            .or_else(|| self.query.get(name))
            .or_else(|| self.path.get(name))
            .map_or_else(|| Cow::Owned(ParameterSpec::undeclared(name)), Cow::Borrowed)
    }
}

/// Raw request values a statement can bind from
#[derive(Debug, Clone)]
pub struct BindSource {
    method: HttpMethod,
    path: HashMap<String, String>,
    query: serde_json::Map<String, JsonValue>,
    body: serde_json::Map<String, JsonValue>,
}

impl BindSource {
    #[must_use]
    pub fn new(
        method: HttpMethod,
        path: HashMap<String, String>,
        query: serde_json::Map<String, JsonValue>,
        body: serde_json::Map<String, JsonValue>,
    ) -> Self {
        // GET requests never bind from a body.
        let body = if method == HttpMethod::Get {
            serde_json::Map::new()
        } else {
            body
        };
        Self {
            method,
            path,
            query,
            body,
        }
    }

    #[must_use]
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    #[must_use]
    pub fn path_value(&self, name: &str) -> Option<&str> {
        self.path.get(name).map(String::as_str)
    }

    /// Add a server-derived value: query map for GET, body otherwise
    pub fn inject(&mut self, name: &str, value: JsonValue) {
        if self.method == HttpMethod::Get {
            self.query.insert(name.to_string(), value);
        } else {
            self.body.insert(name.to_string(), value);
        }
    }

    /// All request values as one map; path captures win over query values,
    /// which lose to body values
    #[must_use]
    pub fn merged(&self) -> serde_json::Map<String, JsonValue> {
        let mut merged = self.query.clone();
        merged.extend(self.body.clone());
        for (name, value) in &self.path {
            merged.insert(name.clone(), JsonValue::String(value.clone()));
        }
        merged
    }

    /// Class an input bind `name` resolves to, and where its value lives
    #[must_use]
    pub fn resolve(&self, params: &ParameterMap, name: &str) -> (ParameterClass, Option<JsonValue>) {
        if self.path.contains_key(name) || params.declares(ParameterClass::Path, name) {
            let value = self.path.get(name).map(|v| JsonValue::String(v.clone()));
            return (ParameterClass::Path, value);
        }
        if self.method != HttpMethod::Get
            && (self.body.contains_key(name) || params.declares(ParameterClass::Payload, name))
        {
            return (ParameterClass::Payload, self.body.get(name).cloned());
        }
        if self.query.contains_key(name) || params.declares(ParameterClass::Query, name) {
            return (ParameterClass::Query, self.query.get(name).cloned());
        }
        let class = if self.method == HttpMethod::Get {
            ParameterClass::Query
        } else {
            ParameterClass::Payload
        };
        (class, None)
    }
}

/// Text form of a raw value; `None` when the value counts as empty
fn raw_text(value: Option<&JsonValue>) -> Option<String> {
    let text = match value? {
        JsonValue::Null => return None,
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    };
    (!text.trim().is_empty()).then_some(text)
}

fn validate_string(
    spec: &ParameterSpec,
    class: ParameterClass,
    text: &str,
    max_length: Option<usize>,
    allowed_values: Option<&str>,
) -> Result<SqlValue, ParameterIssue> {
    let value = text.trim();

    let allowed: Vec<String> = allowed_values
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();
    if !allowed.is_empty() && !allowed.iter().any(|a| a == value) {
        return Err(ParameterIssue::new(
            &spec.name,
            class,
            IssueReason::NotAllowed { allowed },
        ));
    }

    if let Some(max_length) = max_length {
        if value.chars().count() > max_length {
            return Err(ParameterIssue::new(
                &spec.name,
                class,
                IssueReason::TooLong { max_length },
            ));
        }
    }

    Ok(SqlValue::Text(value.to_string()))
}

fn validate_number(
    spec: &ParameterSpec,
    class: ParameterClass,
    text: &str,
    minimum: Option<f64>,
    maximum: Option<f64>,
    precision: Option<u32>,
) -> Result<SqlValue, ParameterIssue> {
    let issue = |reason| ParameterIssue::new(&spec.name, class, reason);
    let value = text.trim();

    if !is_numeric_literal(value) {
        return Err(issue(IssueReason::NotNumeric));
    }
    let number: f64 = value.parse().map_err(|_| issue(IssueReason::NotNumeric))?;

    match precision {
        Some(0) if number.fract() != 0.0 => return Err(issue(IssueReason::NotInteger)),
        Some(precision) if precision > 0 => {
            let decimals = value.split_once('.').map_or(0, |(_, frac)| frac.len());
            if decimals > precision as usize {
                return Err(issue(IssueReason::TooPrecise { precision }));
            }
        }
        _ => {}
    }

    if let Some(minimum) = minimum {
        if number < minimum {
            return Err(issue(IssueReason::BelowMinimum { minimum }));
        }
    }
    if let Some(maximum) = maximum {
        if number > maximum {
            return Err(issue(IssueReason::AboveMaximum { maximum }));
        }
    }

    let integral = precision == Some(0) || !value.contains('.');
    #[allow(clippy::cast_possible_truncation)]
    let as_integer = (number as i64) as f64 == number;
    if integral && as_integer {
        if let Ok(i) = value.split('.').next().unwrap_or(value).parse::<i64>() {
            return Ok(SqlValue::Integer(i));
        }
    }
    Ok(SqlValue::Float(number))
}

/// Validate one raw value against its descriptor.
///
/// Empty values become a null bind unless the parameter is required.
pub fn validate_value(
    spec: &ParameterSpec,
    class: ParameterClass,
    raw: Option<&JsonValue>,
) -> Result<BoundParam, ParameterIssue> {
    let Some(text) = raw_text(raw) else {
        if spec.required {
            return Err(ParameterIssue::new(
                &spec.name,
                class,
                IssueReason::RequiredMissing,
            ));
        }
        return Ok(BoundParam::new(&spec.name, SqlValue::Null));
    };

    match &spec.kind {
        ParamKind::String {
            max_length,
            allowed_values,
        } => validate_string(spec, class, &text, *max_length, allowed_values.as_deref())
            .map(|value| BoundParam::new(&spec.name, value)),
        ParamKind::Number {
            minimum,
            maximum,
            precision,
        } => validate_number(spec, class, &text, *minimum, *maximum, *precision)
            .map(|value| BoundParam::new(&spec.name, value)),
        ParamKind::Date { date_format } => {
            let format = date_format
                .as_deref()
                .filter(|f| !f.trim().is_empty())
                .unwrap_or(datefmt::DEFAULT_DATE_FORMAT);
            let parsed = datefmt::parse(text.trim(), format).ok_or_else(|| {
                ParameterIssue::new(
                    &spec.name,
                    class,
                    IssueReason::BadDate {
                        format: format.to_string(),
                    },
                )
            })?;
            Ok(BoundParam {
                name: spec.name.clone(),
                value: SqlValue::Date(parsed),
                date_format: Some(format.to_string()),
            })
        }
        ParamKind::Object | ParamKind::Array => {
            Ok(BoundParam::new(&spec.name, SqlValue::Text(text)))
        }
    }
}
