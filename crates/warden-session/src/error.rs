//! Error types for the session layer.

use std::fmt;

use warden_store::StoreError;
use warden_token::TokenError;

/// Which bound attribute a request failed to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingField {
    Ip,
    DeviceId,
}

impl fmt::Display for BindingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip => f.write_str("ip"),
            Self::DeviceId => f.write_str("device_id"),
        }
    }
}

/// Coarse grouping of [`SessionError`] for the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The caller must authenticate again.
    Authentication,
    /// The login was refused by the session limit.
    Limit,
    /// The shared store could not be used; retry later.
    Infrastructure,
    /// The service itself is misconfigured.
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Limit => write!(f, "limit"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

/// Errors returned by [`SessionManager`](crate::SessionManager).
///
/// Every failure from the codec or the store is mapped into one of these
/// at the manager boundary. The variants stay specific for logging, but
/// [`public_message`](Self::public_message) gives clients the same answer
/// for every authentication failure.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The signing key is missing or unusable. Fatal at startup.
    #[error("token signing failed: {0}")]
    Signing(String),

    /// The presented token failed verification.
    #[error("unauthenticated: {0}")]
    Unauthenticated(TokenError),

    /// No record exists for the token's session (never existed, or its key
    /// expired and was dropped by the store).
    #[error("session not found")]
    SessionNotFound,

    /// The session's lifetime is over.
    #[error("session expired")]
    SessionExpired,

    /// The session was revoked (logout, eviction, or reuse).
    #[error("session revoked")]
    SessionRevoked,

    /// A validly signed access token that was replaced by a later refresh.
    #[error("access token superseded by rotation")]
    StaleToken,

    /// The user is at the session limit and eviction is disabled.
    #[error("too many active sessions ({active}/{limit})")]
    TooManySessions { active: usize, limit: usize },

    /// The request's address or device differs from the one the session is
    /// bound to.
    #[error("session binding mismatch on {field}")]
    BindingMismatch { field: BindingField },

    /// A rotated-away refresh token was presented. Every session of the
    /// user has been revoked.
    #[error("refresh token reuse detected")]
    ReuseDetected,

    /// The store failed or timed out. Never treated as success.
    #[error("session store unavailable: {0}")]
    StoreUnavailable(String),
}

impl SessionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Signing(_) => ErrorCategory::Configuration,
            Self::TooManySessions { .. } => ErrorCategory::Limit,
            Self::StoreUnavailable(_) => ErrorCategory::Infrastructure,
            Self::Unauthenticated(_)
            | Self::SessionNotFound
            | Self::SessionExpired
            | Self::SessionRevoked
            | Self::StaleToken
            | Self::BindingMismatch { .. }
            | Self::ReuseDetected => ErrorCategory::Authentication,
        }
    }

    /// HTTP status the error maps to.
    pub fn status_code(&self) -> u16 {
        match self.category() {
            ErrorCategory::Authentication => 401,
            ErrorCategory::Limit => 429,
            ErrorCategory::Infrastructure => 503,
            ErrorCategory::Configuration => 500,
        }
    }

    /// The message safe to show a client.
    ///
    /// Identical for every authentication failure, so a caller cannot learn
    /// why a token was refused.
    pub fn public_message(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Authentication => "unauthenticated",
            ErrorCategory::Limit => "too many active sessions",
            ErrorCategory::Infrastructure => "service temporarily unavailable",
            ErrorCategory::Configuration => "internal error",
        }
    }
}

impl From<TokenError> for SessionError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(msg) => Self::Signing(msg),
            other => Self::Unauthenticated(other),
        }
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}
