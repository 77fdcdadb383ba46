//! Redis store backend.
//!
//! # Key layout
//!
//! ```text
//! {<prefix>}:session:<session_id>      JSON record, PX = refresh lifetime
//! {<prefix>}:user:<user_id>:sessions   SET of session ids
//! {<prefix>}:review                    ZSET "<session_id>:<user_id>" scored by deadline (unix secs)
//! {<prefix>}:events                    pub/sub channel
//! ```
//!
//! Every composite operation is one Lua script, so Redis runs it without
//! interleaving other commands. Scripts rewrite records with `SET .. KEEPTTL`
//! so a rotation or revocation never extends a session's lifetime.
//!
//! # Cluster
//!
//! The prefix is wrapped in a hash tag, so every key of one deployment maps
//! to the same slot. Scripts declare the keys they are handed in `KEYS`.
//! The one exception is `INSERT_BOUNDED`, which reads the records of the
//! index members it finds; those share the tag, so the script never leaves
//! its slot. Deployments that need keys spread over a cluster should use
//! one prefix per shard of users.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use warden_token::{Platform, UserId};

use crate::{
    Admission, ReviewEntry, RevokeOutcome, RevokeReason, RotateOutcome, Rotation, Session,
    SessionEvent, SessionStatus, SessionStore, StoreError,
};

// ---------------------------------------------------------------------------
// Lua scripts
// ---------------------------------------------------------------------------

// KEYS: session, index, review
// ARGV: record, ttl_ms, limit, session key prefix, session id, review member, review score,
//       exclusive platform ('' for none)
// Returns {1, live} admitted, {0, live} limit reached, {2, live} platform taken.
const INSERT_BOUNDED: &str = r#"
local limit = tonumber(ARGV[3])
local exclusive = ARGV[8]
local live = 0
if limit > 0 or exclusive ~= '' then
  local taken = false
  local members = redis.call('SMEMBERS', KEYS[2])
  for _, sid in ipairs(members) do
    local raw = redis.call('GET', ARGV[4] .. sid)
    if raw then
      live = live + 1
      if exclusive ~= '' and not taken then
        local record = cjson.decode(raw)
        if record['platform'] == exclusive and record['status'] == 'active' then
          taken = true
        end
      end
    else
      redis.call('SREM', KEYS[2], sid)
    end
  end
  if taken then
    return {2, live}
  end
  if limit > 0 and live >= limit then
    return {0, live}
  end
end
redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
redis.call('SADD', KEYS[2], ARGV[5])
redis.call('ZADD', KEYS[3], ARGV[7], ARGV[6])
return {1, live + 1}
"#;

// KEYS: session
// ARGV: expected refresh hash, access hash, refresh hash, access expires at, last active at
const ROTATE: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return {-1, ''}
end
local record = cjson.decode(raw)
if record['status'] ~= 'active' then
  return {2, record['status']}
end
if record['refresh_token_hash'] ~= ARGV[1] then
  return {0, ''}
end
record['access_token_hash'] = ARGV[2]
record['refresh_token_hash'] = ARGV[3]
record['access_expires_at'] = ARGV[4]
record['last_active_at'] = ARGV[5]
local encoded = cjson.encode(record)
redis.call('SET', KEYS[1], encoded, 'KEEPTTL')
return {1, encoded}
"#;

// KEYS: session
// ARGV: last active at
const TOUCH: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return 0
end
local record = cjson.decode(raw)
if record['status'] ~= 'active' then
  return 0
end
record['last_active_at'] = ARGV[1]
redis.call('SET', KEYS[1], cjson.encode(record), 'KEEPTTL')
return 1
"#;

// KEYS: session, index, review
// ARGV: revoked at, reason, session id, review member
const REVOKE: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return {-1, ''}
end
local record = cjson.decode(raw)
if record['status'] ~= 'active' then
  return {0, record['status']}
end
record['status'] = 'revoked'
record['revoked_at'] = ARGV[1]
record['revoke_reason'] = ARGV[2]
local encoded = cjson.encode(record)
redis.call('SET', KEYS[1], encoded, 'KEEPTTL')
redis.call('SREM', KEYS[2], ARGV[3])
redis.call('ZREM', KEYS[3], ARGV[4])
return {1, encoded}
"#;

// KEYS: session, index, review
// ARGV: session id, review member
const REAP: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('SREM', KEYS[2], ARGV[1])
redis.call('ZREM', KEYS[3], ARGV[2])
return 1
"#;

struct Scripts {
    insert_bounded: Script,
    rotate: Script,
    touch: Script,
    revoke: Script,
    reap: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            insert_bounded: Script::new(INSERT_BOUNDED),
            rotate: Script::new(ROTATE),
            touch: Script::new(TOUCH),
            revoke: Script::new(REVOKE),
            reap: Script::new(REAP),
        }
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Keys {
    prefix: String,
}

impl Keys {
    /// `{prefix}`: the hash tag shared by every key.
    fn tag(&self) -> String {
        format!("{{{}}}", self.prefix)
    }

    fn session(&self, session_id: &str) -> String {
        format!("{}:session:{session_id}", self.tag())
    }

    fn session_prefix(&self) -> String {
        format!("{}:session:", self.tag())
    }

    fn index(&self, user_id: &UserId) -> String {
        format!("{}:user:{user_id}:sessions", self.tag())
    }

    fn review(&self) -> String {
        format!("{}:review", self.tag())
    }

    fn events(&self) -> String {
        format!("{}:events", self.tag())
    }
}

/// Review queue member: session ids never contain `:`, user ids may.
fn review_member(session_id: &str, user_id: &UserId) -> String {
    format!("{session_id}:{user_id}")
}

fn parse_review_member(member: &str) -> Option<ReviewEntry> {
    let (session_id, user_id) = member.split_once(':')?;
    Some(ReviewEntry {
        user_id: UserId::new(user_id),
        session_id: session_id.to_string(),
    })
}

fn rfc3339(at: OffsetDateTime) -> Result<String, StoreError> {
    at.format(&Rfc3339)
        .map_err(|e| StoreError::Command(format!("timestamp out of range: {e}")))
}

/// Redis rejects `PX 0`; round up to one millisecond.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

// ---------------------------------------------------------------------------
// RedisStore
// ---------------------------------------------------------------------------

/// A [`SessionStore`] shared through Redis.
///
/// Holds a multiplexed [`ConnectionManager`] that reconnects on its own;
/// cloning the store is cheap and every clone shares that connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    keys: Keys,
    scripts: std::sync::Arc<Scripts>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("prefix", &self.keys.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Opens a managed connection to `url` and namespaces every key under
    /// `prefix`.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        let store = Self::with_connection(conn, prefix);
        tracing::info!(prefix = %store.keys.prefix, "connected to redis session store");
        Ok(store)
    }

    /// Wraps an existing connection manager.
    pub fn with_connection(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            keys: Keys {
                prefix: prefix.into(),
            },
            scripts: std::sync::Arc::new(Scripts::load()),
        }
    }

    /// Round-trips a `PING`.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn decode(&self, key: &str, raw: &str) -> Result<Session, StoreError> {
        serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    fn decode_status(&self, key: &str, raw: &str) -> Result<SessionStatus, StoreError> {
        SessionStatus::parse(raw).ok_or_else(|| StoreError::Corrupt {
            key: key.to_string(),
            message: format!("unknown status {raw:?}"),
        })
    }
}

impl SessionStore for RedisStore {
    async fn put(&self, session: &Session, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(session)?;
        conn.pset_ex::<_, _, ()>(
            self.keys.session(&session.session_id),
            payload,
            ttl_millis(ttl),
        )
        .await?;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let mut conn = self.conn.clone();
        let key = self.keys.session(session_id);
        let raw: Option<String> = conn.get(&key).await?;
        raw.map(|raw| self.decode(&key, &raw)).transpose()
    }

    async fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(self.keys.session(session_id)).await?;
        Ok(removed > 0)
    }

    async fn index_add(&self, user_id: &UserId, session_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(self.keys.index(user_id), session_id)
            .await?;
        Ok(())
    }

    async fn index_remove(&self, user_id: &UserId, session_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.srem(self.keys.index(user_id), session_id).await?;
        Ok(removed > 0)
    }

    async fn index_members(&self, user_id: &UserId) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(self.keys.index(user_id)).await?;
        Ok(members)
    }

    async fn insert_bounded(
        &self,
        session: &Session,
        ttl: Duration,
        limit: usize,
        exclusive_platform: Option<Platform>,
    ) -> Result<Admission, StoreError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(session)?;

        let (admitted, live): (i64, i64) = self
            .scripts
            .insert_bounded
            .key(self.keys.session(&session.session_id))
            .key(self.keys.index(&session.user_id))
            .key(self.keys.review())
            .arg(payload)
            .arg(ttl_millis(ttl))
            .arg(limit)
            .arg(self.keys.session_prefix())
            .arg(&session.session_id)
            .arg(review_member(&session.session_id, &session.user_id))
            .arg(session.refresh_expires_at.unix_timestamp())
            .arg(exclusive_platform.map(|p| p.as_str()).unwrap_or(""))
            .invoke_async(&mut conn)
            .await?;

        match admitted {
            1 => Ok(Admission::Admitted),
            2 => Ok(Admission::PlatformTaken),
            _ => Ok(Admission::LimitReached {
                live: usize::try_from(live).unwrap_or_default(),
            }),
        }
    }

    async fn rotate(
        &self,
        session_id: &str,
        rotation: &Rotation,
    ) -> Result<RotateOutcome, StoreError> {
        let mut conn = self.conn.clone();
        let key = self.keys.session(session_id);

        let (code, payload): (i64, String) = self
            .scripts
            .rotate
            .key(&key)
            .arg(&rotation.expected_refresh_hash)
            .arg(&rotation.access_token_hash)
            .arg(&rotation.refresh_token_hash)
            .arg(rfc3339(rotation.access_expires_at)?)
            .arg(rfc3339(rotation.last_active_at)?)
            .invoke_async(&mut conn)
            .await?;

        match code {
            1 => Ok(RotateOutcome::Rotated(self.decode(&key, &payload)?)),
            0 => Ok(RotateOutcome::HashMismatch),
            2 => Ok(RotateOutcome::NotActive(self.decode_status(&key, &payload)?)),
            _ => Ok(RotateOutcome::Missing),
        }
    }

    async fn touch(&self, session_id: &str, at: OffsetDateTime) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let touched: i64 = self
            .scripts
            .touch
            .key(self.keys.session(session_id))
            .arg(rfc3339(at)?)
            .invoke_async(&mut conn)
            .await?;
        Ok(touched == 1)
    }

    async fn revoke(
        &self,
        session_id: &str,
        reason: RevokeReason,
        at: OffsetDateTime,
    ) -> Result<RevokeOutcome, StoreError> {
        // The owner never changes, so reading it first lets the script
        // declare the index key without racing anything.
        let Some(current) = self.get(session_id).await? else {
            return Ok(RevokeOutcome::Missing);
        };
        let mut conn = self.conn.clone();
        let key = self.keys.session(session_id);

        let (code, payload): (i64, String) = self
            .scripts
            .revoke
            .key(&key)
            .key(self.keys.index(&current.user_id))
            .key(self.keys.review())
            .arg(rfc3339(at)?)
            .arg(reason.as_str())
            .arg(session_id)
            .arg(review_member(session_id, &current.user_id))
            .invoke_async(&mut conn)
            .await?;

        match code {
            1 => Ok(RevokeOutcome::Revoked(self.decode(&key, &payload)?)),
            0 => Ok(RevokeOutcome::AlreadyTerminal(
                self.decode_status(&key, &payload)?,
            )),
            _ => Ok(RevokeOutcome::Missing),
        }
    }

    async fn due_for_review(&self, limit: usize) -> Result<Vec<ReviewEntry>, StoreError> {
        let mut conn = self.conn.clone();
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let count = isize::try_from(limit).unwrap_or(isize::MAX);

        let members: Vec<String> = conn
            .zrangebyscore_limit(self.keys.review(), "-inf", now, 0, count)
            .await?;

        let mut entries = Vec::with_capacity(members.len());
        for member in members {
            match parse_review_member(&member) {
                Some(entry) => entries.push(entry),
                None => {
                    tracing::warn!(member = %member, "dropping malformed review entry");
                    conn.zrem::<_, _, ()>(self.keys.review(), &member).await?;
                }
            }
        }
        Ok(entries)
    }

    async fn reap(&self, entry: &ReviewEntry) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let reaped: i64 = self
            .scripts
            .reap
            .key(self.keys.session(&entry.session_id))
            .key(self.keys.index(&entry.user_id))
            .key(self.keys.review())
            .arg(&entry.session_id)
            .arg(review_member(&entry.session_id, &entry.user_id))
            .invoke_async(&mut conn)
            .await?;
        Ok(reaped == 1)
    }

    async fn publish(&self, event: &SessionEvent) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(event)?;
        conn.publish::<_, _, ()>(self.keys.events(), payload).await?;
        tracing::debug!(kind = ?event.kind, session_id = %event.session_id, "published session event");
        Ok(())
    }
}
