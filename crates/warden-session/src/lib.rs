//! Session lifecycle management for Warden.
//!
//! This crate ties the lower layers together into the operations an HTTP
//! layer calls:
//!
//! 1. **Login**: [`SessionManager::create_session`] consults the policy,
//!    evicts if needed, and admits the session atomically
//! 2. **Per-request checks**: [`SessionManager::validate_token`]
//! 3. **Rotation**: [`SessionManager::refresh_session`], with reuse of a
//!    rotated-away refresh token treated as compromise
//! 4. **Sign-out**: revoke one, all others, or all
//!
//! # How it fits in the stack
//!
//! ```text
//! HTTP layer (outside)   ← bearer strings in, SessionInfo / SessionError out
//!     ↕
//! Session Layer (this crate)
//!     ↕                 ↕
//! Policy (pure)    Store adapter (shared, networked)    Token codec (pure)
//! ```
//!
//! The manager holds no mutable session state of its own. Every replica of
//! the service can serve any request; the store is the only coordination
//! point.

mod config;
mod error;
mod manager;
mod types;

pub use config::{BindingConfig, SessionConfig};
pub use error::{BindingField, ErrorCategory, SessionError};
pub use manager::SessionManager;
pub use types::{LoginRequest, RequestContext, TokenPair};
