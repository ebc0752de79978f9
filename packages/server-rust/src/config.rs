//! Audit configuration and the process-wide settings holder.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use http::Method;
use serde::Deserialize;

/// Methods that never register handlers, whatever the configuration says.
pub const SAFE_METHODS: [Method; 4] = [Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE];

/// Errors raised while loading an [`AuditConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid HTTP method in untracked_methods: {0}")]
    InvalidMethod(String),
    #[error("unsupported JWT algorithm: {0}")]
    InvalidAlgorithm(String),
}

/// Top-level audit configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Globally disables all tracking.
    pub disabled: bool,
    /// Extra methods that are never tracked. The safe methods are always
    /// untracked, even when omitted here.
    pub untracked_methods: Vec<String>,
    /// Name of the cookie carrying the session key.
    pub session_cookie: String,
    /// Bearer-token fallback for identity resolution.
    pub jwt: Option<JwtConfig>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            untracked_methods: SAFE_METHODS.iter().map(ToString::to_string).collect(),
            session_cookie: "sessionid".to_string(),
            jwt: None,
        }
    }
}

impl AuditConfig {
    /// Parses a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the document is malformed or names an
    /// invalid method or JWT algorithm.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`AuditConfig::from_json_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Checks method names and the JWT algorithm.
    ///
    /// # Errors
    ///
    /// Returns the first invalid entry found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for method in &self.untracked_methods {
            Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|_| ConfigError::InvalidMethod(method.clone()))?;
        }
        if let Some(jwt) = &self.jwt {
            jwt.algorithm()?;
        }
        Ok(())
    }

    /// Returns `true` if requests with `method` are never tracked.
    #[must_use]
    pub fn is_untracked_method(&self, method: &Method) -> bool {
        SAFE_METHODS.contains(method)
            || self
                .untracked_methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(method.as_str()))
    }
}

/// Settings for decoding `Authorization: Bearer` tokens.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// HMAC secret used to verify token signatures.
    pub secret: String,
    /// Algorithm name, e.g. `"HS256"`.
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// Claim holding the identity id.
    #[serde(default = "default_identity_claim")]
    pub identity_claim: String,
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

fn default_identity_claim() -> String {
    "sub".to_string()
}

impl JwtConfig {
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            algorithm: default_algorithm(),
            identity_claim: default_identity_claim(),
        }
    }

    /// Parsed signing algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAlgorithm`] for unknown names.
    pub fn algorithm(&self) -> Result<jsonwebtoken::Algorithm, ConfigError> {
        self.algorithm
            .parse()
            .map_err(|_| ConfigError::InvalidAlgorithm(self.algorithm.clone()))
    }
}

/// Hot-swappable holder for the active [`AuditConfig`].
///
/// Readers take a lock-free snapshot per request; writers replace the whole
/// config atomically.
#[derive(Debug)]
pub struct AuditSettings {
    config: ArcSwap<AuditConfig>,
}

static GLOBAL: OnceLock<Arc<AuditSettings>> = OnceLock::new();

impl AuditSettings {
    #[must_use]
    pub fn new(config: AuditConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
        }
    }

    /// Returns the process-wide settings, initialised with defaults.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new(AuditConfig::default()))))
    }

    /// Current configuration snapshot.
    #[must_use]
    pub fn load(&self) -> Arc<AuditConfig> {
        self.config.load_full()
    }

    pub fn store(&self, config: AuditConfig) {
        self.config.store(Arc::new(config));
    }

    /// Returns `true` if tracking is globally disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.config.load().disabled
    }

    /// Flips the global disable switch, keeping the rest of the config.
    pub fn set_disabled(&self, disabled: bool) {
        self.config.rcu(|current| {
            let mut next = AuditConfig::clone(current);
            next.disabled = disabled;
            next
        });
    }
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self::new(AuditConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_config_defaults() {
        let config = AuditConfig::default();
        assert!(!config.disabled);
        assert_eq!(config.untracked_methods, vec!["GET", "HEAD", "OPTIONS", "TRACE"]);
        assert_eq!(config.session_cookie, "sessionid");
        assert!(config.jwt.is_none());
    }

    #[test]
    fn safe_methods_are_untracked_even_when_omitted() {
        let config = AuditConfig {
            untracked_methods: Vec::new(),
            ..AuditConfig::default()
        };
        for method in SAFE_METHODS {
            assert!(config.is_untracked_method(&method));
        }
        assert!(!config.is_untracked_method(&Method::POST));
    }

    #[test]
    fn extra_untracked_method_is_case_insensitive() {
        let config = AuditConfig {
            untracked_methods: vec!["patch".to_string()],
            ..AuditConfig::default()
        };
        assert!(config.is_untracked_method(&Method::PATCH));
        assert!(!config.is_untracked_method(&Method::DELETE));
    }

    #[test]
    fn parses_partial_json() {
        let config = AuditConfig::from_json_str(
            r#"{"disabled": true, "jwt": {"secret": "s3cret"}}"#,
        )
        .unwrap();
        assert!(config.disabled);
        assert_eq!(config.session_cookie, "sessionid");
        let jwt = config.jwt.unwrap();
        assert_eq!(jwt.identity_claim, "sub");
        assert_eq!(jwt.algorithm().unwrap(), jsonwebtoken::Algorithm::HS256);
    }

    #[test]
    fn rejects_invalid_method() {
        let err = AuditConfig::from_json_str(r#"{"untracked_methods": ["NOT A METHOD"]}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMethod(_)));
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let err = AuditConfig::from_json_str(r#"{"jwt": {"secret": "x", "algorithm": "ROT13"}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAlgorithm(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = AuditConfig::from_file("/nonexistent/auditlog.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn settings_toggle_disabled_flag() {
        let settings = AuditSettings::new(AuditConfig {
            session_cookie: "sid".to_string(),
            ..AuditConfig::default()
        });
        assert!(!settings.is_disabled());
        settings.set_disabled(true);
        assert!(settings.is_disabled());
        assert_eq!(settings.load().session_cookie, "sid");
        settings.set_disabled(false);
        assert!(!settings.is_disabled());
    }
}
