//! Session layer configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Lifetimes and limits for sessions.
///
/// Durations are written in humantime form in config files (`"15m"`,
/// `"7d"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long an access token is accepted.
    #[serde(with = "humantime_serde")]
    pub access_token_ttl: Duration,

    /// Absolute session lifetime, counted from login. Refreshing never
    /// extends it.
    #[serde(with = "humantime_serde")]
    pub refresh_token_ttl: Duration,

    /// Budget for every single store round trip. Elapsed calls fail with
    /// `StoreUnavailable`.
    #[serde(with = "humantime_serde")]
    pub store_timeout: Duration,

    /// Device and network binding checks applied on validation.
    pub binding: BindingConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            store_timeout: Duration::from_secs(3),
            binding: BindingConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// BindingConfig
// ---------------------------------------------------------------------------

/// Whether a session stays tied to the address and device it logged in
/// from.
///
/// A check only fails when validation is on, change is not allowed, and
/// the request carries a value that differs from the bound one. A request
/// that carries no value is not compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    pub validate_ip: bool,
    pub allow_ip_change: bool,
    pub validate_device_id: bool,
    pub allow_device_change: bool,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            validate_ip: false,
            allow_ip_change: true,
            validate_device_id: false,
            allow_device_change: true,
        }
    }
}

impl BindingConfig {
    /// IP changes are rejected.
    pub fn enforces_ip(&self) -> bool {
        self.validate_ip && !self.allow_ip_change
    }

    /// Device changes are rejected.
    pub fn enforces_device(&self) -> bool {
        self.validate_device_id && !self.allow_device_change
    }
}
