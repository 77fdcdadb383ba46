//! Unified error type for the Warden facade.

use warden_session::SessionError;
use warden_store::StoreError;
use warden_sweep::SweepError;
use warden_token::TokenError;

use crate::config::ConfigError;

/// Top-level error that wraps every crate-specific error.
///
/// Each variant carries a `#[from]` conversion, so `?` lifts sub-crate
/// errors without mapping at the call site.
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    /// Configuration could not be loaded or failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The signing key was rejected.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// The store could not be reached at startup.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Sweep(#[from] SweepError),
}
