use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Runtime value held by a named record attribute.
///
/// Stamped marker fields only ever receive [`Value::Null`] or
/// [`Value::String`]; the other variants exist so records can carry
/// ordinary application data next to their marker fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent value (SQL `NULL`, JSON `null`).
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit IEEE 754 float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Nested object with deterministic key order.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrows the string payload, if this is a [`Value::String`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}

/// The acting identity behind a request.
///
/// An upstream authentication layer may attach an anonymous principal to
/// requests it could not authenticate; only authenticated principals are
/// ever stamped onto records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Unique identifier for the authenticated entity.
    pub id: String,
    /// Roles assigned to this principal.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Whether an authentication backend vouched for this principal.
    #[serde(default = "default_authenticated")]
    pub authenticated: bool,
}

fn default_authenticated() -> bool {
    true
}

impl Principal {
    /// Creates an authenticated principal with no roles.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: Vec::new(),
            authenticated: true,
        }
    }

    /// Creates the anonymous principal attached to unauthenticated requests.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            id: String::new(),
            roles: Vec::new(),
            authenticated: false,
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated && !self.id.is_empty()
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_authenticated() {
            f.write_str(&self.id)
        } else {
            f.write_str("<anonymous>")
        }
    }
}
