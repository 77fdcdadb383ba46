//! Error types for the token layer.

use crate::TokenKind;

/// Errors that can occur while signing or verifying tokens.
///
/// `Signing` is a configuration problem (the service should refuse to
/// start); every other variant is a client error that the session layer
/// surfaces as "unauthenticated".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// The signing key is missing or empty, or encoding failed.
    #[error("token signing failed: {0}")]
    Signing(String),

    /// The token was tampered with, truncated, or signed with another key.
    #[error("invalid token signature")]
    InvalidSignature,

    /// The signature is intact but `exp` is in the past.
    #[error("token expired")]
    Expired,

    /// A refresh token was presented where an access token was expected,
    /// or the other way around.
    #[error("wrong token kind: expected {expected}, found {found}")]
    WrongKind {
        /// The kind the caller asked for.
        expected: TokenKind,
        /// The kind carried in the claims.
        found: TokenKind,
    },
}

impl TokenError {
    /// Returns `true` for the errors a client can cause by presenting a bad
    /// credential (everything except `Signing`).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Signing(_))
    }
}
