//! Identity and session capture at request start.
//!
//! Decides whether a request is tracked at all and, if so, produces the
//! [`RequestContext`] its write handlers close over. Capture never fails:
//! resolver errors degrade to an absent identity or session.

pub mod identity;
pub mod session;

use std::sync::Arc;

use auditlog_core::{Principal, RegistrationKey, RequestContext};
use http::header::UPGRADE;
use http::{Extensions, HeaderMap, Method, Uri};

use crate::config::AuditSettings;

pub use identity::{ExtensionIdentity, IdentityResolver, JwtIdentity};
pub use session::{CookieSession, SessionKey, SessionResolver};

// ---------------------------------------------------------------------------
// RequestHead
// ---------------------------------------------------------------------------

/// The parts of an inbound request capture needs.
pub trait RequestHead {
    fn method(&self) -> &Method;
    fn uri(&self) -> &Uri;
    fn headers(&self) -> &HeaderMap;
    fn extensions(&self) -> &Extensions;

    fn path(&self) -> &str {
        self.uri().path()
    }
}

impl RequestHead for http::request::Parts {
    fn method(&self) -> &Method {
        &self.method
    }

    fn uri(&self) -> &Uri {
        &self.uri
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn extensions(&self) -> &Extensions {
        &self.extensions
    }
}

impl<B> RequestHead for http::Request<B> {
    fn method(&self) -> &Method {
        http::Request::method(self)
    }

    fn uri(&self) -> &Uri {
        http::Request::uri(self)
    }

    fn headers(&self) -> &HeaderMap {
        http::Request::headers(self)
    }

    fn extensions(&self) -> &Extensions {
        http::Request::extensions(self)
    }
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Failure to resolve an identity or session. Logged and swallowed by
/// [`Capturer::capture`].
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("malformed {header} header")]
    MalformedHeader { header: &'static str },
    #[error("invalid bearer token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token has no string claim {0:?}")]
    MissingClaim(String),
    #[error(transparent)]
    Resolver(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

/// Why a request is not tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Tracking is globally disabled.
    Disabled,
    /// The method is read-only (or configured as untracked).
    UntrackedMethod,
    /// Protocol handshake (a `GET` or `CONNECT` carrying `Upgrade`, e.g.
    /// WebSocket); passed through untouched.
    Upgrade,
}

/// Result of capturing a request.
#[derive(Debug, Clone)]
pub enum Capture {
    Skip(SkipReason),
    Track(RequestContext),
}

impl Capture {
    #[must_use]
    pub fn context(&self) -> Option<&RequestContext> {
        match self {
            Self::Track(ctx) => Some(ctx),
            Self::Skip(_) => None,
        }
    }
}

/// Applies the tracking policy and resolves identity and session.
#[derive(Clone)]
pub struct Capturer {
    settings: Arc<AuditSettings>,
    identity: Arc<dyn IdentityResolver>,
    session: Arc<dyn SessionResolver>,
}

impl Capturer {
    #[must_use]
    pub fn new(
        settings: Arc<AuditSettings>,
        identity: Arc<dyn IdentityResolver>,
        session: Arc<dyn SessionResolver>,
    ) -> Self {
        Self {
            settings,
            identity,
            session,
        }
    }

    /// Builds resolvers from the current configuration: a JWT fallback if
    /// `jwt` is configured, and the configured session cookie.
    ///
    /// Resolvers are fixed at construction; later config swaps only affect
    /// the disable switch and untracked methods.
    #[must_use]
    pub fn from_settings(settings: Arc<AuditSettings>) -> Self {
        let config = settings.load();
        let identity: Arc<dyn IdentityResolver> = match &config.jwt {
            Some(jwt) => match JwtIdentity::from_config(jwt) {
                Ok(resolver) => Arc::new(resolver),
                Err(err) => {
                    tracing::warn!(error = %err, "JWT identity disabled: invalid configuration");
                    Arc::new(ExtensionIdentity)
                }
            },
            None => Arc::new(ExtensionIdentity),
        };
        let session = Arc::new(CookieSession::new(config.session_cookie.clone()));
        Self::new(settings, identity, session)
    }

    #[must_use]
    pub fn settings(&self) -> &Arc<AuditSettings> {
        &self.settings
    }

    /// Captures `request` for a new registration owned by `owner`.
    pub fn capture(&self, request: &dyn RequestHead, owner: &'static str) -> Capture {
        let config = self.settings.load();
        if config.disabled {
            return Capture::Skip(SkipReason::Disabled);
        }
        if is_protocol_handshake(request) {
            return Capture::Skip(SkipReason::Upgrade);
        }
        if config.is_untracked_method(request.method()) {
            return Capture::Skip(SkipReason::UntrackedMethod);
        }

        let identity = match self.identity.resolve(request) {
            Ok(principal) => principal.filter(Principal::is_authenticated),
            Err(err) => {
                tracing::debug!(error = %err, path = request.path(), "identity unresolved");
                None
            }
        };
        let session_token = match self.session.resolve(request) {
            Ok(token) => token,
            Err(err) => {
                tracing::debug!(error = %err, path = request.path(), "session unresolved");
                None
            }
        };

        Capture::Track(RequestContext::new(
            identity,
            session_token,
            RegistrationKey::new(owner),
        ))
    }
}

/// A request asking to switch protocols. Other methods carrying `Upgrade`
/// (e.g. `POST` with `h2c`) are served as ordinary requests and stay tracked.
fn is_protocol_handshake(request: &dyn RequestHead) -> bool {
    let method = request.method();
    (method == Method::GET || method == Method::CONNECT) && request.headers().contains_key(UPGRADE)
}

impl Default for Capturer {
    fn default() -> Self {
        Self::from_settings(AuditSettings::global())
    }
}

impl std::fmt::Debug for Capturer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capturer")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
