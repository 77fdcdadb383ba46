//! In-process store backend.
//!
//! Keeps everything behind one `tokio::sync::Mutex`, which makes every
//! composite operation trivially atomic. Key expiry follows the tokio clock,
//! so tests can run with `start_paused = true` and `tokio::time::advance`.
//!
//! Suitable for tests and single-replica deployments; records do not
//! survive a restart and are not shared between processes.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{Mutex, broadcast};
use tokio::time::Instant;
use warden_token::{Platform, UserId};

use crate::{
    Admission, ReviewEntry, RevokeOutcome, RevokeReason, RotateOutcome, Rotation, Session,
    SessionEvent, SessionStatus, SessionStore, StoreError,
};

const EVENT_CAPACITY: usize = 256;

struct Entry {
    session: Session,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, Entry>,
    indexes: HashMap<UserId, BTreeSet<String>>,
    /// session id → (owner, review deadline)
    review: HashMap<String, (UserId, Instant)>,
}

impl Inner {
    /// Returns the record if its key has not expired, dropping it otherwise.
    fn live_mut(&mut self, session_id: &str, now: Instant) -> Option<&mut Entry> {
        let expired = self
            .records
            .get(session_id)
            .is_some_and(|entry| entry.expires_at <= now);
        if expired {
            self.records.remove(session_id);
        }
        self.records.get_mut(session_id)
    }

    fn exists(&mut self, session_id: &str, now: Instant) -> bool {
        self.live_mut(session_id, now).is_some()
    }

    fn unindex(&mut self, user_id: &UserId, session_id: &str) -> bool {
        let Some(set) = self.indexes.get_mut(user_id) else {
            return false;
        };
        let removed = set.remove(session_id);
        if set.is_empty() {
            self.indexes.remove(user_id);
        }
        removed
    }
}

/// A [`SessionStore`] held entirely in memory.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    events: broadcast::Sender<SessionEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    /// Subscribes to published lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Number of records currently held, including terminal ones that have
    /// not expired yet.
    pub async fn record_count(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.records.retain(|_, entry| entry.expires_at > now);
        inner.records.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for MemoryStore {
    async fn put(&self, session: &Session, ttl: Duration) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.records.insert(
            session.session_id.clone(),
            Entry {
                session: session.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .live_mut(session_id, Instant::now())
            .map(|entry| entry.session.clone()))
    }

    async fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let existed = inner.exists(session_id, now);
        inner.records.remove(session_id);
        Ok(existed)
    }

    async fn index_add(&self, user_id: &UserId, session_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .indexes
            .entry(user_id.clone())
            .or_default()
            .insert(session_id.to_string());
        Ok(())
    }

    async fn index_remove(&self, user_id: &UserId, session_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.unindex(user_id, session_id))
    }

    async fn index_members(&self, user_id: &UserId) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .indexes
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_bounded(
        &self,
        session: &Session,
        ttl: Duration,
        limit: usize,
        exclusive_platform: Option<Platform>,
    ) -> Result<Admission, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let user_id = &session.user_id;

        if limit > 0 || exclusive_platform.is_some() {
            let members: Vec<String> = inner
                .indexes
                .get(user_id)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default();

            let mut live = 0;
            let mut platform_taken = false;
            for session_id in members {
                let found = inner
                    .live_mut(&session_id, now)
                    .map(|entry| (entry.session.platform, entry.session.status));
                match found {
                    Some((platform, status)) => {
                        live += 1;
                        if exclusive_platform == Some(platform) && status == SessionStatus::Active {
                            platform_taken = true;
                        }
                    }
                    None => {
                        inner.unindex(user_id, &session_id);
                    }
                }
            }
            if platform_taken {
                return Ok(Admission::PlatformTaken);
            }
            if limit > 0 && live >= limit {
                return Ok(Admission::LimitReached { live });
            }
        }

        let deadline = now + ttl;
        inner.records.insert(
            session.session_id.clone(),
            Entry {
                session: session.clone(),
                expires_at: deadline,
            },
        );
        inner
            .indexes
            .entry(user_id.clone())
            .or_default()
            .insert(session.session_id.clone());
        inner
            .review
            .insert(session.session_id.clone(), (user_id.clone(), deadline));
        Ok(Admission::Admitted)
    }

    async fn rotate(
        &self,
        session_id: &str,
        rotation: &Rotation,
    ) -> Result<RotateOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.live_mut(session_id, Instant::now()) else {
            return Ok(RotateOutcome::Missing);
        };
        let session = &mut entry.session;

        if session.status != SessionStatus::Active {
            return Ok(RotateOutcome::NotActive(session.status));
        }
        if session.refresh_token_hash != rotation.expected_refresh_hash {
            return Ok(RotateOutcome::HashMismatch);
        }

        session.access_token_hash = rotation.access_token_hash.clone();
        session.refresh_token_hash = rotation.refresh_token_hash.clone();
        session.access_expires_at = rotation.access_expires_at;
        session.last_active_at = rotation.last_active_at;
        Ok(RotateOutcome::Rotated(session.clone()))
    }

    async fn touch(&self, session_id: &str, at: OffsetDateTime) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.live_mut(session_id, Instant::now()) {
            Some(entry) if entry.session.status == SessionStatus::Active => {
                entry.session.last_active_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke(
        &self,
        session_id: &str,
        reason: RevokeReason,
        at: OffsetDateTime,
    ) -> Result<RevokeOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.live_mut(session_id, Instant::now()) else {
            return Ok(RevokeOutcome::Missing);
        };
        let session = &mut entry.session;

        if !session.status.can_transition_to(SessionStatus::Revoked) {
            return Ok(RevokeOutcome::AlreadyTerminal(session.status));
        }
        session.status = SessionStatus::Revoked;
        session.revoked_at = Some(at);
        session.revoke_reason = Some(reason);
        let revoked = session.clone();

        inner.unindex(&revoked.user_id, session_id);
        inner.review.remove(session_id);
        Ok(RevokeOutcome::Revoked(revoked))
    }

    async fn due_for_review(&self, limit: usize) -> Result<Vec<ReviewEntry>, StoreError> {
        let inner = self.inner.lock().await;
        let now = Instant::now();

        let mut due: Vec<(Instant, &String, &UserId)> = inner
            .review
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(session_id, (user_id, deadline))| (*deadline, session_id, user_id))
            .collect();
        due.sort();

        Ok(due
            .into_iter()
            .take(limit)
            .map(|(_, session_id, user_id)| ReviewEntry {
                user_id: user_id.clone(),
                session_id: session_id.clone(),
            })
            .collect())
    }

    async fn reap(&self, entry: &ReviewEntry) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.exists(&entry.session_id, Instant::now()) {
            return Ok(false);
        }
        inner.unindex(&entry.user_id, &entry.session_id);
        inner.review.remove(&entry.session_id);
        Ok(true)
    }

    async fn publish(&self, event: &SessionEvent) -> Result<(), StoreError> {
        // No subscribers is not an error.
        let _ = self.events.send(event.clone());
        Ok(())
    }
}

// =========================================================================
// Tests
// =========================================================================
