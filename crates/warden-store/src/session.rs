//! Session records: the data structures persisted in the shared store.
//!
//! A "session" is the service's record of one signed-in device. It tracks:
//! - WHO it belongs to (`UserId`) and WHERE it was opened (`Platform`)
//! - WHAT credentials are currently valid (hashes of the token pair)
//! - WHEN it was issued, last used, and when each credential lapses
//! - WHETHER it is still active, and if not, why
//!
//! Records are stored as JSON. Timestamps are RFC 3339 strings so the
//! store's scripting layer can rewrite a field without understanding dates.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use warden_token::{Platform, UserId};

/// Longest device label we keep, in characters.
pub const MAX_DEVICE_LABEL_CHARS: usize = 500;

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a session record.
///
/// ```text
///   Active ──(refresh deadline passes)──→ Expired
///     │
///     └──(logout / eviction / reuse)────→ Revoked
/// ```
///
/// Transitions only ever move forward. A terminal record is kept until its
/// key expires so validation can say *why* a token stopped working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Expired,
    Revoked,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }

    /// Parses the wire name back into a status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }

    /// Returns `true` once no further transition is possible.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Returns `true` if moving to `target` is a valid forward transition.
    pub fn can_transition_to(self, target: Self) -> bool {
        self == Self::Active && target != Self::Active
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RevokeReason
// ---------------------------------------------------------------------------

/// Why a session was revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevokeReason {
    /// The user signed out of this session.
    Logout,
    /// Displaced by a newer login (capacity or single-device rule).
    Evicted,
    /// A rotated-away refresh token was presented again.
    ReuseDetected,
    /// The user signed this session out from another device.
    RevokedByUser,
}

impl RevokeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logout => "logout",
            Self::Evicted => "evicted",
            Self::ReuseDetected => "reuse_detected",
            Self::RevokedByUser => "revoked_by_user",
        }
    }
}

impl fmt::Display for RevokeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Device / network metadata
// ---------------------------------------------------------------------------

/// What the client told us about the device at login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: Option<String>,
    pub device_type: Option<String>,
    pub device_label: Option<String>,
    pub app_version: Option<String>,
    pub user_agent: Option<String>,
}

impl DeviceInfo {
    /// Creates device info with only the device id set.
    pub fn with_id(device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..Self::default()
        }
    }

    /// Returns a copy with the label cut to [`MAX_DEVICE_LABEL_CHARS`].
    pub fn normalized(mut self) -> Self {
        if let Some(label) = self.device_label.as_mut() {
            if label.chars().count() > MAX_DEVICE_LABEL_CHARS {
                *label = label.chars().take(MAX_DEVICE_LABEL_CHARS).collect();
            }
        }
        self
    }
}

/// Where the login came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub ip_address: Option<IpAddr>,
    pub location: Option<String>,
}

impl NetworkInfo {
    pub fn with_ip(ip: IpAddr) -> Self {
        Self {
            ip_address: Some(ip),
            location: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One session record as stored.
///
/// Only hashes of the current token pair are kept. The plaintext tokens are
/// returned to the client once and never written anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: UserId,
    pub platform: Platform,
    #[serde(default)]
    pub device: DeviceInfo,
    #[serde(default)]
    pub network: NetworkInfo,
    #[serde(default)]
    pub login_method: Option<String>,

    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_active_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub access_expires_at: OffsetDateTime,
    /// Fixed at login; rotation never extends it.
    #[serde(with = "time::serde::rfc3339")]
    pub refresh_expires_at: OffsetDateTime,

    pub access_token_hash: String,
    pub refresh_token_hash: String,

    pub status: SessionStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub revoked_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub revoke_reason: Option<RevokeReason>,
}

impl Session {
    /// Returns `true` if the record is active and its refresh deadline has
    /// not passed at `now`.
    pub fn is_live_at(&self, now: OffsetDateTime) -> bool {
        self.status == SessionStatus::Active && now < self.refresh_expires_at
    }

    /// The status a reader should report at `now`.
    ///
    /// An active record whose deadline has passed reads as expired even if
    /// the store has not dropped the key yet.
    pub fn effective_status(&self, now: OffsetDateTime) -> SessionStatus {
        match self.status {
            SessionStatus::Active if now >= self.refresh_expires_at => SessionStatus::Expired,
            status => status,
        }
    }

    /// Time left until the refresh deadline, zero if already past.
    pub fn remaining(&self, now: OffsetDateTime) -> std::time::Duration {
        let left = self.refresh_expires_at - now;
        left.try_into().unwrap_or_default()
    }

    /// The client-facing view of this session.
    pub fn info(&self, now: OffsetDateTime) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            platform: self.platform,
            device: self.device.clone(),
            network: self.network.clone(),
            login_method: self.login_method.clone(),
            issued_at: self.issued_at,
            last_active_at: self.last_active_at,
            access_expires_at: self.access_expires_at,
            refresh_expires_at: self.refresh_expires_at,
            status: self.effective_status(now),
        }
    }
}

/// A session as shown to its owner (e.g. a "signed-in devices" page).
///
/// Never carries token hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: UserId,
    pub platform: Platform,
    pub device: DeviceInfo,
    pub network: NetworkInfo,
    pub login_method: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_active_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub access_expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub refresh_expires_at: OffsetDateTime,
    pub status: SessionStatus,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// What happened to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionCreated,
    TokenRefreshed,
    SessionRevoked,
    ReuseDetected,
    RiskFlagged,
}

/// A lifecycle notification published on the store's event channel.
///
/// Delivery is fire-and-forget; no operation waits for subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub kind: EventKind,
    pub session_id: String,
    pub user_id: UserId,
    /// Identifier of the service instance that emitted the event.
    pub source: String,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    #[serde(default)]
    pub detail: Option<String>,
}

// =========================================================================
// Tests
// =========================================================================
