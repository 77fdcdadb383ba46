//! Token codec for Warden.
//!
//! This crate defines the credentials that travel between clients and the
//! session layer:
//!
//! - **Types** ([`UserId`], [`Platform`], [`TokenKind`], [`Claims`]):
//!   who a token speaks for and what it may be used for.
//! - **Codec** ([`TokenCodec`]): how claims are signed into a bearer
//!   string and verified back, with HMAC-SHA256.
//! - **Errors** ([`TokenError`]): what can go wrong while signing or
//!   verifying.
//!
//! # Architecture
//!
//! The codec is pure and stateless. It never talks to the session store,
//! which is why tampering and expiry can be detected without a round trip:
//!
//! ```text
//! bearer string → TokenCodec::verify → Claims → Session layer (store lookup)
//! ```

mod codec;
mod error;
mod types;

pub use codec::{IssuedToken, TokenCodec, hash_token};
pub use error::TokenError;
pub use types::{Claims, ParsePlatformError, Platform, TokenKind, TokenSubject, UserId};
