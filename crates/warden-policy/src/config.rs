//! Policy configuration.

use serde::{Deserialize, Serialize};

/// Knobs for the concurrency and risk rules applied at login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Most live sessions a user may hold at once. 0 = unlimited.
    pub max_concurrent_sessions: usize,

    /// At most one session per platform; a new login replaces the old one.
    pub single_device_login: bool,

    /// When full, evict the oldest session instead of rejecting the login.
    pub kick_oldest_session: bool,

    /// Score logins against the user's recent sessions.
    pub enable_risk_detection: bool,

    /// Signals needed before a login is flagged.
    pub risk_threshold: u32,

    /// How many of the most recently active sessions form "recent history".
    pub risk_window: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 5,
            single_device_login: false,
            kick_oldest_session: true,
            enable_risk_detection: false,
            risk_threshold: 2,
            risk_window: 5,
        }
    }
}

impl PolicyConfig {
    /// Returns `true` if a session limit is in force.
    pub fn is_bounded(&self) -> bool {
        self.max_concurrent_sessions > 0
    }

    /// Whether a login that hits the limit can still go ahead by evicting.
    pub fn allows_eviction(&self) -> bool {
        self.kick_oldest_session || self.single_device_login
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_documented_values() {
        let config = PolicyConfig::default();
        assert_eq!(config.max_concurrent_sessions, 5);
        assert!(config.kick_oldest_session);
        assert!(!config.single_device_login);
        assert!(!config.enable_risk_detection);
        assert_eq!(config.risk_threshold, 2);
        assert_eq!(config.risk_window, 5);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: PolicyConfig =
            serde_json::from_str(r#"{"max_concurrent_sessions": 0}"#).unwrap();
        assert!(!config.is_bounded());
        assert!(config.kick_oldest_session);
    }
}
