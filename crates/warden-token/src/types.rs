//! Identity and claim types carried inside signed tokens.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// An opaque user identifier handed to us by the login handler.
///
/// The session layer never interprets it; it only keys indexes and claims
/// by it. Serialized as a plain string so it survives any store encoding
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a `UserId` from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// The client surface a session was opened from.
///
/// Single-device-login is scoped per platform: a user may stay signed in on
/// the mobile app and the web at the same time, but only once on each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Native mobile application.
    App,
    /// Browser front end.
    Web,
    /// Back-office administration console.
    #[serde(alias = "oa", alias = "admin-console")]
    Admin,
}

impl Platform {
    /// Every platform, in a stable order.
    pub const ALL: [Platform; 3] = [Platform::App, Platform::Web, Platform::Admin];

    /// The canonical lowercase name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Web => "web",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known platform.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform: {0}")]
pub struct ParsePlatformError(String);

impl FromStr for Platform {
    type Err = ParsePlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "app" => Ok(Self::App),
            "web" => Ok(Self::Web),
            "admin" | "oa" | "admin-console" => Ok(Self::Admin),
            _ => Err(ParsePlatformError(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// TokenKind
// ---------------------------------------------------------------------------

/// Which half of a token pair a token is.
///
/// The kind is part of the signed claims, so an access token can never be
/// replayed against the refresh endpoint (or vice versa) without breaking
/// the signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Short-lived credential presented on every request.
    Access,
    /// Longer-lived, single-use credential exchanged for a new pair.
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access => f.write_str("access"),
            Self::Refresh => f.write_str("refresh"),
        }
    }
}

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// Who a token is being issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSubject {
    pub user_id: UserId,
    pub session_id: String,
    pub platform: Platform,
}

/// The typed claim set inside every Warden token.
///
/// Validated once by [`TokenCodec::verify`](crate::TokenCodec::verify);
/// downstream code works with these fields and never re-parses the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// The user the session belongs to.
    pub sub: UserId,
    /// The session this token is bound to.
    pub sid: String,
    /// Platform the session was opened from.
    pub platform: Platform,
    /// Access or refresh.
    pub kind: TokenKind,
    /// Issued-at, seconds since the Unix epoch.
    pub iat: i64,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
    /// Unique token id; makes two tokens issued in the same second differ.
    pub jti: String,
}

impl Claims {
    /// Rebuilds the subject these claims were issued for.
    pub fn subject(&self) -> TokenSubject {
        TokenSubject {
            user_id: self.sub.clone(),
            session_id: self.sid.clone(),
            platform: self.platform,
        }
    }
}
