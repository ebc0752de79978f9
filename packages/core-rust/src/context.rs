use std::fmt;

use uuid::Uuid;

use crate::types::{Principal, Value};

/// Opaque token scoping a pair of write handlers to one in-flight request.
///
/// The request part is a fresh v4 UUID per request, so two requests handled
/// by the same interceptor never share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationKey {
    owner: &'static str,
    request: Uuid,
}

impl RegistrationKey {
    /// Creates a key for a new request handled by `owner`.
    #[must_use]
    pub fn new(owner: &'static str) -> Self {
        Self {
            owner,
            request: Uuid::new_v4(),
        }
    }

    #[must_use]
    pub fn owner(&self) -> &'static str {
        self.owner
    }

    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request
    }
}

impl fmt::Display for RegistrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner, self.request)
    }
}

/// Per-request identity captured at request start.
/// Owned by the interceptor handling that request and never shared.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Authenticated identity, `None` for anonymous requests.
    pub identity: Option<Principal>,
    /// Session key, `None` when no session is attached.
    pub session_token: Option<String>,
    pub registration_key: RegistrationKey,
}

impl RequestContext {
    #[must_use]
    pub fn new(
        identity: Option<Principal>,
        session_token: Option<String>,
        registration_key: RegistrationKey,
    ) -> Self {
        Self {
            identity,
            session_token,
            registration_key,
        }
    }

    /// Value stamped into identity marker fields.
    #[must_use]
    pub fn identity_value(&self) -> Value {
        Value::from(self.identity.as_ref().map(|p| p.id.clone()))
    }

    /// Value stamped into session marker fields.
    #[must_use]
    pub fn session_value(&self) -> Value {
        Value::from(self.session_token.clone())
    }
}
