//! Identity resolvers.

use auditlog_core::Principal;
use http::header::AUTHORIZATION;
use jsonwebtoken::{DecodingKey, Validation};
use serde_json::{Map, Value as JsonValue};

use super::{CaptureError, RequestHead};
use crate::config::{ConfigError, JwtConfig};

/// Resolves the acting identity of a request.
///
/// Resolvers must not block: they run on the request path before any write.
pub trait IdentityResolver: Send + Sync {
    /// Returns the request's principal, or `None` if it has none.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError`] if the identity cannot be determined.
    fn resolve(&self, request: &dyn RequestHead) -> Result<Option<Principal>, CaptureError>;
}

/// Reads a [`Principal`] that an upstream authentication layer placed in the
/// request extensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionIdentity;

impl IdentityResolver for ExtensionIdentity {
    fn resolve(&self, request: &dyn RequestHead) -> Result<Option<Principal>, CaptureError> {
        Ok(request.extensions().get::<Principal>().cloned())
    }
}

/// Falls back to an `Authorization: Bearer` JWT when the upstream identity
/// is absent or anonymous.
///
/// A token that fails verification leaves the request anonymous.
pub struct JwtIdentity {
    key: DecodingKey,
    validation: Validation,
    identity_claim: String,
}

impl JwtIdentity {
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAlgorithm`] for unknown algorithm names.
    pub fn from_config(config: &JwtConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation: Validation::new(config.algorithm()?),
            identity_claim: config.identity_claim.clone(),
        })
    }

    fn bearer_token(request: &dyn RequestHead) -> Result<Option<&str>, CaptureError> {
        let Some(value) = request.headers().get(AUTHORIZATION) else {
            return Ok(None);
        };
        let value = value.to_str().map_err(|_| CaptureError::MalformedHeader {
            header: "authorization",
        })?;
        Ok(value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty()))
    }

    fn decode(&self, token: &str) -> Result<Principal, CaptureError> {
        let data = jsonwebtoken::decode::<Map<String, JsonValue>>(token, &self.key, &self.validation)?;
        let id = data
            .claims
            .get(&self.identity_claim)
            .and_then(JsonValue::as_str)
            .ok_or_else(|| CaptureError::MissingClaim(self.identity_claim.clone()))?;
        Ok(Principal::new(id))
    }
}

impl IdentityResolver for JwtIdentity {
    fn resolve(&self, request: &dyn RequestHead) -> Result<Option<Principal>, CaptureError> {
        let upstream = ExtensionIdentity.resolve(request)?;
        if upstream.as_ref().is_some_and(Principal::is_authenticated) {
            return Ok(upstream);
        }
        let Some(token) = Self::bearer_token(request)? else {
            return Ok(upstream);
        };
        match self.decode(token) {
            Ok(principal) => Ok(Some(principal)),
            Err(err) => {
                tracing::debug!(error = %err, "bearer token rejected");
                Ok(upstream)
            }
        }
    }
}

impl std::fmt::Debug for JwtIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtIdentity")
            .field("algorithms", &self.validation.algorithms)
            .field("identity_claim", &self.identity_claim)
            .finish_non_exhaustive()
    }
}
