//! Service configuration.
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults (every section is `#[serde(default)]`).
//! 2. An optional TOML file.
//! 3. Environment variables prefixed `WARDEN`, with `__` between path
//!    segments, e.g. `WARDEN__SESSION__ACCESS_TOKEN_TTL=5m` or
//!    `WARDEN__SIGNING_KEY=...`.
//!
//! Durations use humantime notation (`"15m"`, `"7d"`).

use std::fmt;
use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use warden_policy::PolicyConfig;
use warden_session::SessionConfig;
use warden_sweep::SweepConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A source could not be read or did not match the schema.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The values were read but make no sense together.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    /// Prepended to every key, so several deployments can share a server.
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "warden".to_string(),
        }
    }
}

/// Top-level configuration for a Warden deployment.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// HMAC key for token signatures. Required.
    pub signing_key: String,
    pub redis: RedisConfig,
    pub session: SessionConfig,
    pub policy: PolicyConfig,
    pub sweep: SweepConfig,
    /// Default `tracing` filter; `RUST_LOG` wins when set.
    pub log_filter: String,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            signing_key: String::new(),
            redis: RedisConfig::default(),
            session: SessionConfig::default(),
            policy: PolicyConfig::default(),
            sweep: SweepConfig::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl fmt::Debug for WardenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WardenConfig")
            .field("signing_key", &"<redacted>")
            .field("redis", &self.redis)
            .field("session", &self.session)
            .field("policy", &self.policy)
            .field("sweep", &self.sweep)
            .field("log_filter", &self.log_filter)
            .finish()
    }
}

impl WardenConfig {
    /// Loads from an optional file plus `WARDEN__*` environment variables,
    /// then validates.
    ///
    /// A missing file is not an error; the environment alone may carry a
    /// complete configuration.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        builder = builder.add_source(environment());

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document without consulting the environment.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: Self = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects combinations the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.signing_key.trim().is_empty() {
            return invalid("signing_key must be set");
        }
        if self.session.access_token_ttl.is_zero() {
            return invalid("session.access_token_ttl must be greater than zero");
        }
        if self.session.refresh_token_ttl.is_zero() {
            return invalid("session.refresh_token_ttl must be greater than zero");
        }
        if self.session.refresh_token_ttl < self.session.access_token_ttl {
            return invalid("session.refresh_token_ttl must not be shorter than access_token_ttl");
        }
        if self.session.store_timeout.is_zero() {
            return invalid("session.store_timeout must be greater than zero");
        }
        if self.sweep.interval.is_zero() {
            return invalid("sweep.interval must be greater than zero");
        }
        if self.sweep.batch_size == 0 {
            return invalid("sweep.batch_size must be greater than zero");
        }
        if self.sweep.store_timeout.is_zero() {
            return invalid("sweep.store_timeout must be greater than zero");
        }
        if self.redis.key_prefix.is_empty() {
            return invalid("redis.key_prefix must not be empty");
        }
        Ok(())
    }
}

fn environment() -> Environment {
    Environment::with_prefix("WARDEN")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn load_with_env(toml: &str, vars: &[(&str, &str)]) -> Result<WardenConfig, ConfigError> {
        let env: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config: WardenConfig = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .add_source(environment().source(Some(env)))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_from_toml_minimal_uses_defaults() {
        let config = WardenConfig::from_toml(r#"signing_key = "k""#).unwrap();

        assert_eq!(config.session, SessionConfig::default());
        assert_eq!(config.policy, PolicyConfig::default());
        assert_eq!(config.sweep, SweepConfig::default());
        assert_eq!(config.redis.key_prefix, "warden");
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_from_toml_nested_sections() {
        let config = WardenConfig::from_toml(
            r#"
            signing_key = "k"
            log_filter = "warden=debug"

            [redis]
            url = "redis://cache:6379/2"
            key_prefix = "auth"

            [session]
            access_token_ttl = "5m"
            refresh_token_ttl = "1day"

            [session.binding]
            validate_ip = true
            allow_ip_change = false

            [policy]
            max_concurrent_sessions = 2
            single_device_login = true

            [sweep]
            interval = "30s"
            batch_size = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.redis.url, "redis://cache:6379/2");
        assert_eq!(config.session.access_token_ttl, Duration::from_secs(300));
        assert_eq!(config.session.refresh_token_ttl, Duration::from_secs(86_400));
        assert!(config.session.binding.enforces_ip());
        assert_eq!(config.policy.max_concurrent_sessions, 2);
        assert!(config.policy.single_device_login);
        assert_eq!(config.sweep.interval, Duration::from_secs(30));
        assert_eq!(config.sweep.batch_size, 50);
    }

    #[test]
    fn test_environment_overrides_file() {
        let config = load_with_env(
            r#"
            signing_key = "from-file"
            [policy]
            max_concurrent_sessions = 2
            "#,
            &[
                ("WARDEN__SIGNING_KEY", "from-env"),
                ("WARDEN__POLICY__MAX_CONCURRENT_SESSIONS", "9"),
                ("WARDEN__SESSION__ACCESS_TOKEN_TTL", "10m"),
            ],
        )
        .unwrap();

        assert_eq!(config.signing_key, "from-env");
        assert_eq!(config.policy.max_concurrent_sessions, 9);
        assert_eq!(config.session.access_token_ttl, Duration::from_secs(600));
    }

    #[test]
    fn test_validate_rejects_empty_key() {
        let err = WardenConfig::from_toml("").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("signing_key")));
    }

    #[test]
    fn test_validate_rejects_refresh_shorter_than_access() {
        let err = WardenConfig::from_toml(
            r#"
            signing_key = "k"
            [session]
            access_token_ttl = "1h"
            refresh_token_ttl = "30m"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("refresh_token_ttl")));
    }

    #[test]
    fn test_validate_rejects_zero_sweep_settings() {
        let mut config = WardenConfig {
            signing_key: "k".into(),
            ..WardenConfig::default()
        };
        config.sweep.batch_size = 0;
        assert!(config.validate().is_err());

        config.sweep.batch_size = 10;
        config.sweep.interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_sweep_store_timeout_is_invalid() {
        let err = WardenConfig::from_toml(
            r#"
            signing_key = "k"
            [sweep]
            store_timeout = "0s"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("sweep.store_timeout")));
    }

    #[test]
    fn test_malformed_duration_is_load_error() {
        let err = WardenConfig::from_toml(
            r#"
            signing_key = "k"
            [session]
            access_token_ttl = "soon"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn test_debug_redacts_signing_key() {
        let config = WardenConfig {
            signing_key: "super-secret".into(),
            ..WardenConfig::default()
        };
        assert!(!format!("{config:?}").contains("super-secret"));
    }

    #[test]
    fn test_load_missing_file_falls_back_to_defaults() {
        // No key in the file or (presumably) the test environment.
        let result = WardenConfig::load(Some(Path::new("/nonexistent/warden.toml")));
        if std::env::var("WARDEN__SIGNING_KEY").is_err() {
            assert!(matches!(result, Err(ConfigError::Invalid(_))));
        }
    }
}
