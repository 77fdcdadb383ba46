//! Request and response types of the session manager.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use warden_store::{DeviceInfo, NetworkInfo};
use warden_token::Platform;

/// Everything the login handler knows about a successful sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub platform: Platform,
    pub device: DeviceInfo,
    pub network: NetworkInfo,
    /// e.g. `"password"`, `"sms"`, `"sso"`. Recorded, not interpreted.
    pub login_method: Option<String>,
}

impl LoginRequest {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            device: DeviceInfo::default(),
            network: NetworkInfo::default(),
            login_method: None,
        }
    }

    pub fn with_device(mut self, device: DeviceInfo) -> Self {
        self.device = device;
        self
    }

    pub fn with_network(mut self, network: NetworkInfo) -> Self {
        self.network = network;
        self
    }

    pub fn with_login_method(mut self, method: impl Into<String>) -> Self {
        self.login_method = Some(method.into());
        self
    }
}

/// What the current request reveals about the caller, for binding checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub ip: Option<IpAddr>,
    pub device_id: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}

/// A freshly issued access/refresh pair, returned on login and refresh.
///
/// This is the only place the plaintext tokens exist on the server side.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub session_id: String,
    pub access_token: String,
    pub refresh_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub access_expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub refresh_expires_at: OffsetDateTime,
    /// Seconds until the access token expires, for clients that prefer a
    /// relative value.
    pub expires_in: u64,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("session_id", &self.session_id)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}
