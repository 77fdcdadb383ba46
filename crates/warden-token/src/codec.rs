//! HMAC-signed token codec.
//!
//! Tokens are compact JWTs signed with HS256. The codec checks, in order:
//! signature, expiry, then the token kind the caller asked for. Tokens are
//! self-contained, so the session store only ever keeps their SHA-256
//! hash (see [`hash_token`]).

use std::fmt;
use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Claims, TokenError, TokenKind, TokenSubject};

/// A freshly signed token together with the claims inside it.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedToken {
    /// The bearer string handed to the client.
    pub token: String,
    /// The claims that were signed.
    pub claims: Claims,
    /// `claims.exp` as a timestamp.
    pub expires_at: OffsetDateTime,
}

// Token strings are credentials; keep them out of logs.
impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"<redacted>")
            .field("claims", &self.claims)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Signs and verifies Warden tokens with a shared symmetric key.
///
/// Cheap to clone; every replica of the service builds one from the same
/// configured secret.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &Algorithm::HS256)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Creates a codec from the signing secret.
    ///
    /// # Errors
    /// Returns [`TokenError::Signing`] if the secret is empty. Callers should
    /// treat this as fatal at startup.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, TokenError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(TokenError::Signing("signing key is empty".into()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        })
    }

    /// Issues a token that expires `ttl` from now.
    pub fn issue(
        &self,
        subject: &TokenSubject,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(subject, kind, ttl, OffsetDateTime::now_utc())
    }

    /// Issues a token as if signed at `issued_at`.
    pub fn issue_at(
        &self,
        subject: &TokenSubject,
        kind: TokenKind,
        ttl: Duration,
        issued_at: OffsetDateTime,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_until(subject, kind, issued_at, issued_at + ttl)
    }

    /// Issues a token with an explicit expiry instant.
    ///
    /// Used for rotated refresh tokens, which keep the session's original
    /// deadline instead of starting a fresh lifetime.
    pub fn issue_until(
        &self,
        subject: &TokenSubject,
        kind: TokenKind,
        issued_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> Result<IssuedToken, TokenError> {
        let claims = Claims {
            sub: subject.user_id.clone(),
            sid: subject.session_id.clone(),
            platform: subject.platform,
            kind,
            iat: issued_at.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
            jti: Uuid::new_v4().simple().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        // Second resolution: the stored expiry must match what `verify` enforces.
        let expires_at = OffsetDateTime::from_unix_timestamp(claims.exp)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(IssuedToken {
            token,
            claims,
            expires_at,
        })
    }

    /// Verifies a token and returns its claims.
    ///
    /// # Errors
    /// - [`TokenError::InvalidSignature`]: tampered, malformed, or foreign key
    /// - [`TokenError::Expired`]: signature fine, `exp` has passed
    /// - [`TokenError::WrongKind`]: valid token of the other kind
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                other => {
                    tracing::debug!(reason = ?other, "token rejected");
                    TokenError::InvalidSignature
                }
            }
        })?;

        let claims = data.claims;
        if claims.kind != expected {
            return Err(TokenError::WrongKind {
                expected,
                found: claims.kind,
            });
        }
        Ok(claims)
    }
}

/// One-way hash of a token string (SHA-256, lowercase hex).
///
/// This is what the session record stores, so a leaked store dump never
/// contains usable credentials.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

// =========================================================================
// Tests
// =========================================================================
