//! Session store adapter for Warden.
//!
//! Provides the [`SessionStore`] trait that abstracts over the shared,
//! network-accessible key-value store every replica of the service talks
//! to, plus the session record types persisted in it.
//!
//! # What lives in the store
//!
//! ```text
//! session record   (one per session id, expires with the refresh deadline)
//! user index       (set of session ids per user, pruned lazily)
//! review queue     (session ids ordered by deadline, drained by the sweeper)
//! event channel    (lifecycle notifications, fire-and-forget)
//! ```
//!
//! Multi-step sequences that must be atomic ("count live sessions, then
//! add one", "compare refresh hash, then replace it") are single trait
//! methods. The backend owns atomicity; callers never read-then-write.
//!
//! # Feature Flags
//!
//! - `redis` (default): [`RedisStore`] backed by the `redis` crate

#![allow(async_fn_in_trait)]

mod error;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;
mod session;
mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use session::{
    DeviceInfo, EventKind, NetworkInfo, RevokeReason, Session, SessionEvent, SessionInfo,
    SessionStatus,
};
pub use store::{
    Admission, ReviewEntry, RevokeOutcome, RotateOutcome, Rotation, SessionStore,
};
