//! Error types for dynrest

use std::fmt;

use thiserror::Error;

use crate::types::ParameterClass;

/// Why a bearer token was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingToken,
    MalformedToken,
    UnknownKey,
    InvalidSignature,
    Expired,
    UnknownSession,
}

impl AuthFailure {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingToken => "missing bearer token",
            Self::MalformedToken => "malformed token",
            Self::UnknownKey => "unknown signing key",
            Self::InvalidSignature => "invalid token signature",
            Self::Expired => "token expired",
            Self::UnknownSession => "unknown session",
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason a single parameter value was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum IssueReason {
    RequiredMissing,
    NotAllowed { allowed: Vec<String> },
    TooLong { max_length: usize },
    NotNumeric,
    NotInteger,
    TooPrecise { precision: u32 },
    BelowMinimum { minimum: f64 },
    AboveMaximum { maximum: f64 },
    BadDate { format: String },
}

impl fmt::Display for IssueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequiredMissing => f.write_str("is required"),
            Self::NotAllowed { allowed } => {
                write!(f, "must be one of: {}", allowed.join(", "))
            }
            Self::TooLong { max_length } => {
                write!(f, "must not exceed {max_length} characters")
            }
            Self::NotNumeric => f.write_str("must be a number"),
            Self::NotInteger => f.write_str("must be an integer"),
            Self::TooPrecise { precision } => {
                write!(f, "must have at most {precision} decimal places")
            }
            Self::BelowMinimum { minimum } => write!(f, "must be at least {minimum}"),
            Self::AboveMaximum { maximum } => write!(f, "must be at most {maximum}"),
            Self::BadDate { format } => write!(f, "must be a date in format {format}"),
        }
    }
}

/// One rejected parameter, reported back to the caller
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterIssue {
    pub name: String,
    pub class: ParameterClass,
    pub reason: IssueReason,
}

impl ParameterIssue {
    pub fn new(name: impl Into<String>, class: ParameterClass, reason: IssueReason) -> Self {
        Self {
            name: name.into(),
            class,
            reason,
        }
    }
}

impl fmt::Display for ParameterIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} parameter '{}' {}", self.class, self.name, self.reason)
    }
}

/// dynrest error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("No endpoint matches {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(AuthFailure),

    #[error("Validation failed: {}", join_issues(.0))]
    ValidationFailed(Vec<ParameterIssue>),

    #[error("Malformed SQL text: {0}")]
    Rewrite(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    ExecutionFailed(String),

    #[error("Endpoint misconfigured: {0}")]
    EndpointMisconfigured(String),

    #[error("Endpoint store error: {0}")]
    Store(String),

    #[error("Timed out waiting for a database connection")]
    PoolTimeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

fn join_issues(issues: &[ParameterIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for dynrest operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP status code for each error type
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ValidationFailed(_) | Self::Rewrite(_) | Self::BadRequest(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::RouteNotFound { .. } => 404,
            Self::PoolTimeout => 503,
            Self::ExecutionFailed(_)
            | Self::EndpointMisconfigured(_)
            | Self::Store(_)
            | Self::ConfigError(_)
            | Self::IoError(_)
            | Self::JsonError(_) => 500,
        }
    }

    /// Stable machine-readable code
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RouteNotFound { .. } => "route_not_found",
            Self::Unauthorized(AuthFailure::Expired) => "token_expired",
            Self::Unauthorized(_) => "unauthorized",
            Self::ValidationFailed(_) => "validation_failed",
            Self::Rewrite(_) => "malformed_sql",
            Self::BadRequest(_) => "bad_request",
            Self::ExecutionFailed(_) => "execution_failed",
            Self::EndpointMisconfigured(_) => "endpoint_misconfigured",
            Self::Store(_) => "store_error",
            Self::PoolTimeout => "pool_timeout",
            Self::ConfigError(_) => "config_error",
            Self::IoError(_) => "io_error",
            Self::JsonError(_) => "json_error",
        }
    }
}
