//! Wiring of codec, store, manager and sweeper into one service value.

use std::sync::Arc;

use warden_session::SessionManager;
use warden_store::{RedisStore, SessionStore};
use warden_sweep::{Sweeper, SweeperHandle};
use warden_token::TokenCodec;

use crate::{WardenConfig, WardenError};

/// A ready-to-use Warden deployment.
///
/// Holds the [`SessionManager`] that request handlers share and the
/// configuration needed to start the background sweeper.
pub struct Warden<S: SessionStore> {
    manager: Arc<SessionManager<S>>,
    config: WardenConfig,
}

impl Warden<RedisStore> {
    /// Validates `config`, connects to Redis and checks the connection.
    pub async fn connect(config: WardenConfig) -> Result<Self, WardenError> {
        config.validate()?;
        let store = RedisStore::connect(&config.redis.url, config.redis.key_prefix.clone()).await?;
        store.ping().await?;
        tracing::info!(prefix = %config.redis.key_prefix, "connected to session store");
        Self::with_store(Arc::new(store), config)
    }
}

impl<S: SessionStore> Warden<S> {
    /// Wires an already constructed store.
    ///
    /// Fails with a [`WardenError::Token`] if the signing key is unusable,
    /// so a misconfigured process refuses to start instead of failing every
    /// login with [`SessionError::Signing`](warden_session::SessionError::Signing).
    pub fn with_store(store: Arc<S>, config: WardenConfig) -> Result<Self, WardenError> {
        config.validate()?;
        let codec = TokenCodec::new(config.signing_key.as_bytes())?;
        let manager = SessionManager::new(
            store,
            codec,
            config.session.clone(),
            config.policy.clone(),
        );
        tracing::info!(
            instance_id = manager.instance_id(),
            max_sessions = config.policy.max_concurrent_sessions,
            "session manager ready"
        );
        Ok(Self {
            manager: Arc::new(manager),
            config,
        })
    }

    pub fn manager(&self) -> &Arc<SessionManager<S>> {
        &self.manager
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    /// A sweeper over the same store, not yet started.
    pub fn sweeper(&self) -> Sweeper<S> {
        Sweeper::new(self.manager.store().clone(), self.config.sweep.clone())
    }

    pub fn spawn_sweeper(&self) -> SweeperHandle {
        self.sweeper().spawn()
    }
}
