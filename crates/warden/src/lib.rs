//! # Warden
//!
//! Authenticated session and token lifecycle management for stateless API
//! processes that share one key-value store.
//!
//! Warden issues short-lived access tokens and single-use refresh tokens,
//! keeps a server-side record per login session, enforces per-user session
//! limits and device binding, and detects refresh token replay. The layers
//! are separate crates, re-exported here:
//!
//! - [`warden_token`]: signing, verification and hashing of tokens
//! - [`warden_store`]: session records and the store adapter (memory, Redis)
//! - [`warden_policy`]: concurrency and risk decisions at login
//! - [`warden_session`]: the lifecycle manager
//! - [`warden_sweep`]: background cleanup of user indexes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use warden::prelude::*;
//!
//! # async fn run() -> Result<(), WardenError> {
//! let config = WardenConfig::load(Some(std::path::Path::new("warden.toml")))?;
//! let warden = Warden::connect(config).await?;
//! let sweeper = warden.spawn_sweeper();
//!
//! let pair = warden
//!     .manager()
//!     .create_session(UserId::from(42u64), LoginRequest::new(Platform::Web))
//!     .await?;
//! let info = warden
//!     .manager()
//!     .validate_token(&pair.access_token, &RequestContext::new())
//!     .await?;
//! assert_eq!(info.session_id, pair.session_id);
//!
//! sweeper.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod error;
mod service;
pub mod telemetry;

pub use config::{ConfigError, RedisConfig, WardenConfig};
pub use error::WardenError;
pub use service::Warden;

pub use warden_policy;
pub use warden_session;
pub use warden_store;
pub use warden_sweep;
pub use warden_token;

pub mod prelude {
    pub use crate::{Warden, WardenConfig, WardenError};
    pub use warden_policy::PolicyConfig;
    pub use warden_session::{
        BindingConfig, LoginRequest, RequestContext, SessionConfig, SessionError, SessionManager,
        TokenPair,
    };
    pub use warden_store::{
        DeviceInfo, MemoryStore, NetworkInfo, RedisStore, SessionInfo, SessionStore,
    };
    pub use warden_sweep::{SweepConfig, Sweeper};
    pub use warden_token::{Platform, UserId};
}
