use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a marker field: an attribute whose value the interceptor assigns.
///
/// Attached to a field when its record type is declared and never changed
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerFieldKind {
    /// Identity that performed the most recent write. Stamped before every write.
    LastModifyingIdentity,
    /// Session token of the most recent write. Stamped before every write.
    LastSessionToken,
    /// Identity that created the record. Stamped once, after the insert.
    CreatingIdentity,
    /// Session token that created the record. Stamped once, after the insert.
    CreatingSessionToken,
}

impl MarkerFieldKind {
    /// Kinds stamped in memory before the write executes.
    pub const PRE_WRITE: [Self; 2] = [Self::LastModifyingIdentity, Self::LastSessionToken];

    /// Kinds stamped after an insert and persisted by a nested save.
    pub const POST_CREATE: [Self; 2] = [Self::CreatingIdentity, Self::CreatingSessionToken];

    pub const ALL: [Self; 4] = [
        Self::LastModifyingIdentity,
        Self::LastSessionToken,
        Self::CreatingIdentity,
        Self::CreatingSessionToken,
    ];

    /// Returns `true` if this kind carries an identity rather than a session token.
    #[must_use]
    pub fn is_identity(self) -> bool {
        matches!(self, Self::LastModifyingIdentity | Self::CreatingIdentity)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LastModifyingIdentity => "last_modifying_identity",
            Self::LastSessionToken => "last_session_token",
            Self::CreatingIdentity => "creating_identity",
            Self::CreatingSessionToken => "creating_session_token",
        }
    }
}

impl fmt::Display for MarkerFieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
