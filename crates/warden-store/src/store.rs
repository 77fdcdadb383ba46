//! The `SessionStore` trait and the result types of its atomic operations.

use std::future::Future;
use std::time::Duration;

use time::OffsetDateTime;
use warden_token::{Platform, UserId};

use crate::{RevokeReason, Session, SessionEvent, SessionStatus, StoreError};

// ---------------------------------------------------------------------------
// Operation outcomes
// ---------------------------------------------------------------------------

/// Result of [`SessionStore::insert_bounded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The record was written and indexed.
    Admitted,
    /// The user already holds `live` sessions, at or over the limit.
    /// Nothing was written.
    LimitReached { live: usize },
    /// An exclusive platform was requested and the user already holds a
    /// live session on it. Nothing was written.
    PlatformTaken,
}

/// The new credential state written by [`SessionStore::rotate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rotation {
    /// The refresh hash the caller presented. The swap only happens if the
    /// record still holds exactly this value.
    pub expected_refresh_hash: String,
    pub access_token_hash: String,
    pub refresh_token_hash: String,
    pub access_expires_at: OffsetDateTime,
    pub last_active_at: OffsetDateTime,
}

/// Result of [`SessionStore::rotate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotateOutcome {
    /// The swap happened; carries the updated record.
    Rotated(Session),
    /// The record holds a different refresh hash: the presented token was
    /// already rotated away (or a concurrent refresh won).
    HashMismatch,
    /// The record is terminal.
    NotActive(SessionStatus),
    /// No record under that id.
    Missing,
}

/// Result of [`SessionStore::revoke`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevokeOutcome {
    /// This call moved the record to revoked; carries the updated record.
    Revoked(Session),
    /// The record was already terminal. Nothing changed.
    AlreadyTerminal(SessionStatus),
    /// No record under that id.
    Missing,
}

/// A session whose refresh deadline has passed, queued for cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReviewEntry {
    pub user_id: UserId,
    pub session_id: String,
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Storage backend for session records, per-user indexes, the cleanup
/// review queue, and lifecycle events.
///
/// Implementations must be safe to share between tasks and replicas: every
/// composite method is atomic with respect to every other method touching
/// the same keys.
///
/// # Example
///
/// ```rust,ignore
/// let store = MemoryStore::new();
/// store.insert_bounded(&session, Duration::from_secs(3600), 5, None).await?;
/// let found = store.get(&session.session_id).await?;
/// ```
///
/// # Why `impl Future` instead of `async fn`?
///
/// The session manager runs inside spawned tasks, so every future it awaits
/// must be `Send`. Spelling out `impl Future<Output = ..> + Send` lets the
/// trait demand that; implementors still write plain `async fn`.
pub trait SessionStore: Send + Sync + 'static {
    // --- primitives -------------------------------------------------------

    /// Writes (or overwrites) a record with the given time to live.
    fn put(
        &self,
        session: &Session,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Reads a record. Expired keys read as `None`.
    fn get(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<Option<Session>, StoreError>> + Send;

    /// Deletes a record. Returns whether a key was removed.
    fn delete(&self, session_id: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Adds a session id to a user's index.
    fn index_add(
        &self,
        user_id: &UserId,
        session_id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removes a session id from a user's index. Returns whether it was there.
    fn index_remove(
        &self,
        user_id: &UserId,
        session_id: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Lists the session ids in a user's index. May include ids whose
    /// records have already expired.
    fn index_members(
        &self,
        user_id: &UserId,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    // --- atomic composites ------------------------------------------------

    /// Counts the user's live sessions (pruning dead index entries) and, if
    /// fewer than `limit`, writes the record, indexes it, and queues it for
    /// review at its refresh deadline. `limit == 0` means unlimited.
    ///
    /// With `exclusive_platform` set, admission is also refused while any
    /// live active session of the user is on that platform, so two racing
    /// single-device logins cannot both get in.
    fn insert_bounded(
        &self,
        session: &Session,
        ttl: Duration,
        limit: usize,
        exclusive_platform: Option<Platform>,
    ) -> impl Future<Output = Result<Admission, StoreError>> + Send;

    /// Compare-and-swap of the credential hashes on an active record.
    ///
    /// The record's remaining time to live is preserved.
    fn rotate(
        &self,
        session_id: &str,
        rotation: &Rotation,
    ) -> impl Future<Output = Result<RotateOutcome, StoreError>> + Send;

    /// Bumps `last_active_at` on an active record. Returns `false` if the
    /// record is missing or terminal.
    fn touch(
        &self,
        session_id: &str,
        at: OffsetDateTime,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Moves an active record to revoked, drops it from the user's index and
    /// the review queue. The record itself stays until its key expires.
    fn revoke(
        &self,
        session_id: &str,
        reason: RevokeReason,
        at: OffsetDateTime,
    ) -> impl Future<Output = Result<RevokeOutcome, StoreError>> + Send;

    /// Up to `limit` queued entries whose deadline has passed, earliest first.
    fn due_for_review(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ReviewEntry>, StoreError>> + Send;

    /// If the entry's record is gone, removes it from the user's index and
    /// the review queue and returns `true`. A still-present record is left
    /// alone.
    fn reap(&self, entry: &ReviewEntry) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Publishes a lifecycle event. Delivery is best-effort.
    fn publish(
        &self,
        event: &SessionEvent,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
