//! Bearer token verification

use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::debug;

use dynrest_common::error::{AuthFailure, Error, Result};

use crate::keys::KeyStore;
use crate::session::SessionStore;

/// Who a verified token speaks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Subject of the session the token belongs to
    pub subject: String,
    pub jti: String,
    pub kid: String,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    jti: Option<String>,
}

fn refuse(failure: AuthFailure) -> Error {
    Error::Unauthorized(failure)
}

/// Verifies bearer tokens against the key and session stores
pub struct AuthGuard {
    keys: Arc<dyn KeyStore>,
    sessions: Arc<dyn SessionStore>,
    leeway_secs: u64,
}

impl AuthGuard {
    pub fn new(keys: Arc<dyn KeyStore>, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            keys,
            sessions,
            leeway_secs: 0,
        }
    }

    /// Accept tokens up to `secs` past their expiry
    #[must_use]
    pub fn with_leeway(mut self, secs: u64) -> Self {
        self.leeway_secs = secs;
        self
    }

    /// Verify the `Authorization` header value and resolve its session.
    ///
    /// Every refusal is an `Error::Unauthorized`; store failures are passed
    /// through unchanged.
    pub async fn authorize(&self, header: Option<&str>) -> Result<Identity> {
        let token = header
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(refuse(AuthFailure::MissingToken))?;

        let token_header = decode_header(token).map_err(|_| refuse(AuthFailure::MalformedToken))?;
        if !matches!(
            token_header.alg,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(refuse(AuthFailure::MalformedToken));
        }
        let kid = token_header
            .kid
            .ok_or(refuse(AuthFailure::MalformedToken))?;

        let secret = self
            .keys
            .signing_key(&kid)
            .await?
            .ok_or(refuse(AuthFailure::UnknownKey))?;
        let key = DecodingKey::from_base64_secret(secret.trim())
            .map_err(|_| refuse(AuthFailure::UnknownKey))?;

        let mut validation = Validation::new(token_header.alg);
        validation.leeway = self.leeway_secs;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        let data = decode::<Claims>(token, &key, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => refuse(AuthFailure::Expired),
            ErrorKind::InvalidSignature => refuse(AuthFailure::InvalidSignature),
            _ => refuse(AuthFailure::MalformedToken),
        })?;

        let jti = data
            .claims
            .jti
            .filter(|j| !j.is_empty())
            .ok_or(refuse(AuthFailure::MalformedToken))?;
        let subject = self
            .sessions
            .subject(&jti)
            .await?
            .ok_or(refuse(AuthFailure::UnknownSession))?;

        debug!(kid = %kid, jti = %jti, "Bearer token accepted");
        Ok(Identity { subject, jti, kid })
    }
}
