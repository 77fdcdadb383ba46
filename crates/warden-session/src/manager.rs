//! The session manager: every operation the HTTP layer calls.
//!
//! It's responsible for:
//! - Admitting logins under the concurrency policy
//! - Validating access tokens against the stored session state
//! - Rotating refresh tokens, and treating reuse as compromise
//! - Revoking sessions and keeping the per-user index tidy
//!
//! # Concurrency note
//!
//! `SessionManager` keeps no session state in process. It is `Send + Sync`
//! and meant to be shared behind an `Arc` by every request task. All races
//! (two logins, two refreshes of the same token) are settled by the store's
//! atomic operations, so they are handled the same way whether the racers
//! are tasks in one process or replicas on different machines.

use std::future::Future;
use std::sync::Arc;

use rand::Rng;
use time::OffsetDateTime;
use warden_policy::{Decision, LoginContext, PolicyConfig, Verdict, decide};
use warden_store::{
    Admission, EventKind, RevokeOutcome, RevokeReason, RotateOutcome, Rotation, Session,
    SessionEvent, SessionInfo, SessionStatus, SessionStore, StoreError,
};
use warden_token::{TokenCodec, TokenKind, TokenSubject, UserId, hash_token};

use crate::{
    BindingField, LoginRequest, RequestContext, SessionConfig, SessionError, TokenPair,
};

/// How many times a login re-runs the policy after losing an admission race.
const MAX_ADMISSION_ATTEMPTS: usize = 3;

/// Manages session lifecycles on top of a shared [`SessionStore`].
///
/// ## Lifecycle
///
/// ```text
/// create_session() ──→ validate_token() ... refresh_session() ──→ validate_token() ...
///        │                                        │
///        │                                        └─(old refresh token again)──→ revoke all
///        ▼
///    [Active] ──(revoke / evict / reuse)──→ [Revoked]
///        │
///        └──(refresh deadline passes)──→ [Expired] ──→ store drops key ──→ sweeper prunes index
/// ```
pub struct SessionManager<S> {
    store: Arc<S>,
    codec: TokenCodec,
    config: SessionConfig,
    policy: PolicyConfig,
    /// Tags events published by this process.
    instance_id: String,
}

impl<S: SessionStore> SessionManager<S> {
    /// Creates a manager over an injected store handle.
    pub fn new(
        store: Arc<S>,
        codec: TokenCodec,
        config: SessionConfig,
        policy: PolicyConfig,
    ) -> Self {
        let instance_id = generate_instance_id();
        tracing::debug!(%instance_id, "session manager ready");
        Self {
            store,
            codec,
            config,
            policy,
            instance_id,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    // -----------------------------------------------------------------------
    // Login
    // -----------------------------------------------------------------------

    /// Opens a new session for a user who just authenticated.
    ///
    /// Consults the policy with the user's live sessions. A `Reject` fails
    /// with [`SessionError::TooManySessions`]; an eviction revokes the
    /// victims first. The record is then admitted with a single atomic
    /// check-count-then-add, so concurrent logins can never push the user
    /// over the limit. Losing that race re-runs the decision when eviction
    /// is allowed.
    ///
    /// # Errors
    /// - [`SessionError::TooManySessions`]: limit reached, eviction disabled
    /// - [`SessionError::Signing`]: the codec cannot sign
    /// - [`SessionError::StoreUnavailable`]: any store failure or timeout
    pub async fn create_session(
        &self,
        user_id: UserId,
        request: LoginRequest,
    ) -> Result<TokenPair, SessionError> {
        let device = request.device.normalized();
        let login = LoginContext {
            platform: request.platform,
            device_id: device.device_id.clone(),
            ip: request.network.ip_address,
        };

        let now = OffsetDateTime::now_utc();
        let session_id = generate_session_id();
        let subject = TokenSubject {
            user_id: user_id.clone(),
            session_id: session_id.clone(),
            platform: request.platform,
        };

        let refresh = self.codec.issue_at(
            &subject,
            TokenKind::Refresh,
            self.config.refresh_token_ttl,
            now,
        )?;
        let access = self.codec.issue_until(
            &subject,
            TokenKind::Access,
            now,
            (now + self.config.access_token_ttl).min(refresh.expires_at),
        )?;

        let session = Session {
            session_id: session_id.clone(),
            user_id: user_id.clone(),
            platform: request.platform,
            device,
            network: request.network,
            login_method: request.login_method,
            issued_at: now,
            last_active_at: now,
            access_expires_at: access.expires_at,
            refresh_expires_at: refresh.expires_at,
            access_token_hash: hash_token(&access.token),
            refresh_token_hash: hash_token(&refresh.token),
            status: SessionStatus::Active,
            revoked_at: None,
            revoke_reason: None,
        };
        let ttl = session.remaining(now);
        let limit = self.policy.max_concurrent_sessions;

        let exclusive_platform = self.policy.single_device_login.then_some(request.platform);
        let mut first_risk = None;

        for attempt in 1..=MAX_ADMISSION_ATTEMPTS {
            let existing = self.live_sessions(&user_id).await?;
            let Decision { verdict, risk } = decide(&existing, &login, &self.policy);
            if attempt == 1 {
                first_risk = risk;
            }

            match verdict {
                Verdict::Accept => {}
                Verdict::Reject { active, limit } => {
                    tracing::info!(%user_id, active, limit, "login rejected: session limit");
                    return Err(SessionError::TooManySessions { active, limit });
                }
                Verdict::EvictOldest { victims } => {
                    for victim in &victims {
                        self.revoke_indexed(&user_id, victim, RevokeReason::Evicted)
                            .await?;
                    }
                }
            }

            let admission = self
                .call(
                    "insert_bounded",
                    self.store
                        .insert_bounded(&session, ttl, limit, exclusive_platform),
                )
                .await?;
            match admission {
                Admission::Admitted => {
                    if let Some(flag) = &first_risk {
                        tracing::warn!(
                            %user_id,
                            %session_id,
                            platform = %request.platform,
                            score = flag.score,
                            signals = ?flag.signals,
                            "login flagged as risky"
                        );
                        self.emit(
                            EventKind::RiskFlagged,
                            &session,
                            Some(format!("score={} signals={:?}", flag.score, flag.signals)),
                        )
                        .await;
                    }
                    tracing::info!(
                        %user_id,
                        %session_id,
                        platform = %request.platform,
                        "session created"
                    );
                    self.emit(EventKind::SessionCreated, &session, None).await;
                    return Ok(token_pair(&session_id, &access, &refresh, now));
                }
                Admission::LimitReached { live } => {
                    if !self.policy.allows_eviction() {
                        tracing::info!(%user_id, active = live, limit, "login rejected: session limit");
                        return Err(SessionError::TooManySessions {
                            active: live,
                            limit,
                        });
                    }
                    tracing::debug!(%user_id, attempt, live, "lost admission race, deciding again");
                }
                Admission::PlatformTaken => {
                    tracing::debug!(
                        %user_id,
                        attempt,
                        platform = %request.platform,
                        "platform claimed concurrently, deciding again"
                    );
                }
            }
        }

        tracing::warn!(%user_id, attempts = MAX_ADMISSION_ATTEMPTS, "login gave up after repeated admission races");
        Err(SessionError::TooManySessions {
            active: limit,
            limit,
        })
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Checks an access token against the stored session.
    ///
    /// Order: signature/expiry/kind, then the record exists, then it is
    /// still active, then the token is the session's *current* access token,
    /// then binding. On success `last_active_at` is bumped; a failure to do
    /// so is logged and does not fail the request.
    pub async fn validate_token(
        &self,
        access_token: &str,
        context: &RequestContext,
    ) -> Result<SessionInfo, SessionError> {
        let claims = self
            .codec
            .verify(access_token, TokenKind::Access)
            .inspect_err(|e| tracing::debug!(error = %e, "access token rejected"))?;

        let session = self.load(&claims.sid).await?;
        let now = OffsetDateTime::now_utc();
        check_state(&session, now)?;

        if hash_token(access_token) != session.access_token_hash {
            tracing::debug!(session_id = %session.session_id, "superseded access token presented");
            return Err(SessionError::StaleToken);
        }
        if session.access_expires_at <= now {
            return Err(SessionError::SessionExpired);
        }

        self.check_binding(&session, context)?;

        let mut info = session.info(now);
        match self
            .call("touch", self.store.touch(&session.session_id, now))
            .await
        {
            Ok(true) => info.last_active_at = now,
            Ok(false) => {}
            Err(_) => {
                tracing::debug!(session_id = %session.session_id, "last-active update skipped")
            }
        }

        tracing::debug!(
            user_id = %session.user_id,
            session_id = %session.session_id,
            "access token validated"
        );
        Ok(info)
    }

    /// Checks a session by id, without a token.
    pub async fn validate_session(&self, session_id: &str) -> Result<SessionInfo, SessionError> {
        let session = self.load(session_id).await?;
        let now = OffsetDateTime::now_utc();
        check_state(&session, now)?;
        Ok(session.info(now))
    }

    // -----------------------------------------------------------------------
    // Rotation
    // -----------------------------------------------------------------------

    /// Exchanges a refresh token for a new pair.
    ///
    /// The old refresh token is retired by a compare-and-swap on its hash,
    /// so exactly one of several concurrent calls with the same token wins.
    /// Any other presentation of a retired token (a hash mismatch on a
    /// validly signed token) is treated as theft: every session of the user
    /// is revoked and the call fails with [`SessionError::ReuseDetected`].
    ///
    /// The session's deadline does not move. The new refresh token expires
    /// at the same instant as the old one, and the new access token never
    /// outlives it.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<TokenPair, SessionError> {
        let claims = self
            .codec
            .verify(refresh_token, TokenKind::Refresh)
            .inspect_err(|e| tracing::debug!(error = %e, "refresh token rejected"))?;

        let session = self.load(&claims.sid).await?;
        let now = OffsetDateTime::now_utc();
        check_state(&session, now)?;

        let presented = hash_token(refresh_token);
        if presented != session.refresh_token_hash {
            return Err(self.handle_reuse(&session).await);
        }

        let subject = claims.subject();
        let refresh = self.codec.issue_until(
            &subject,
            TokenKind::Refresh,
            now,
            session.refresh_expires_at,
        )?;
        let access = self.codec.issue_until(
            &subject,
            TokenKind::Access,
            now,
            (now + self.config.access_token_ttl).min(session.refresh_expires_at),
        )?;

        let rotation = Rotation {
            expected_refresh_hash: presented,
            access_token_hash: hash_token(&access.token),
            refresh_token_hash: hash_token(&refresh.token),
            access_expires_at: access.expires_at,
            last_active_at: now,
        };

        match self
            .call("rotate", self.store.rotate(&session.session_id, &rotation))
            .await?
        {
            RotateOutcome::Rotated(updated) => {
                tracing::info!(
                    user_id = %updated.user_id,
                    session_id = %updated.session_id,
                    "tokens rotated"
                );
                self.emit(EventKind::TokenRefreshed, &updated, None).await;
                Ok(token_pair(&updated.session_id, &access, &refresh, now))
            }
            RotateOutcome::HashMismatch => Err(self.handle_reuse(&session).await),
            RotateOutcome::NotActive(status) => Err(status_error(status)),
            RotateOutcome::Missing => Err(SessionError::SessionNotFound),
        }
    }

    /// Revokes everything the user holds after a retired refresh token
    /// came back. Always yields `ReuseDetected`; revocation failures are
    /// logged.
    async fn handle_reuse(&self, session: &Session) -> SessionError {
        tracing::warn!(
            user_id = %session.user_id,
            session_id = %session.session_id,
            "refresh token reuse detected, revoking all sessions"
        );
        self.emit(EventKind::ReuseDetected, session, None).await;

        if let Err(e) = self
            .revoke_one(&session.session_id, RevokeReason::ReuseDetected)
            .await
        {
            tracing::warn!(session_id = %session.session_id, error = %e, "revocation after reuse failed");
        }
        if let Err(e) = self
            .revoke_members(&session.user_id, None, RevokeReason::ReuseDetected)
            .await
        {
            tracing::warn!(user_id = %session.user_id, error = %e, "revocation after reuse failed");
        }
        SessionError::ReuseDetected
    }

    // -----------------------------------------------------------------------
    // Revocation
    // -----------------------------------------------------------------------

    /// Signs one session out. Revoking an absent or already terminal
    /// session succeeds and changes nothing.
    pub async fn revoke_session(&self, session_id: &str) -> Result<(), SessionError> {
        self.revoke_one(session_id, RevokeReason::Logout).await?;
        Ok(())
    }

    /// Signs out every session of `user_id` except `keep_session_id`.
    /// Returns how many were revoked.
    pub async fn revoke_other_sessions(
        &self,
        user_id: &UserId,
        keep_session_id: &str,
    ) -> Result<usize, SessionError> {
        let count = self
            .revoke_members(user_id, Some(keep_session_id), RevokeReason::RevokedByUser)
            .await?;
        tracing::info!(%user_id, keep = %keep_session_id, count, "other sessions revoked");
        Ok(count)
    }

    /// Signs out every session of `user_id`. Returns how many were revoked.
    pub async fn revoke_all_sessions(&self, user_id: &UserId) -> Result<usize, SessionError> {
        let count = self
            .revoke_members(user_id, None, RevokeReason::RevokedByUser)
            .await?;
        tracing::info!(%user_id, count, "all sessions revoked");
        Ok(count)
    }

    /// Revokes the oldest sessions until at most `keep` remain.
    pub async fn trim_sessions(&self, user_id: &UserId, keep: usize) -> Result<usize, SessionError> {
        let live = self.live_sessions(user_id).await?;
        let excess = live.len().saturating_sub(keep);

        let mut count = 0;
        for session in live.iter().take(excess) {
            if self
                .revoke_indexed(user_id, &session.session_id, RevokeReason::Evicted)
                .await?
            {
                count += 1;
            }
        }
        if count > 0 {
            tracing::info!(%user_id, keep, count, "sessions trimmed");
        }
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    /// The user's active sessions, oldest first, without token hashes.
    pub async fn list_sessions(&self, user_id: &UserId) -> Result<Vec<SessionInfo>, SessionError> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .live_sessions(user_id)
            .await?
            .iter()
            .map(|s| s.info(now))
            .collect())
    }

    pub async fn active_session_count(&self, user_id: &UserId) -> Result<usize, SessionError> {
        Ok(self.live_sessions(user_id).await?.len())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Runs one store call under the configured timeout.
    async fn call<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, SessionError> {
        match tokio::time::timeout(self.config.store_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(op, error = %e, "session store call failed");
                Err(e.into())
            }
            Err(_) => {
                tracing::warn!(op, timeout = ?self.config.store_timeout, "session store call timed out");
                Err(SessionError::StoreUnavailable(format!("{op} timed out")))
            }
        }
    }

    async fn load(&self, session_id: &str) -> Result<Session, SessionError> {
        self.call("get", self.store.get(session_id))
            .await?
            .ok_or(SessionError::SessionNotFound)
    }

    /// Loads the user's active sessions, oldest first, pruning index
    /// entries whose record is gone or terminal.
    async fn live_sessions(&self, user_id: &UserId) -> Result<Vec<Session>, SessionError> {
        let members = self
            .call("index_members", self.store.index_members(user_id))
            .await?;
        let now = OffsetDateTime::now_utc();

        let mut live = Vec::with_capacity(members.len());
        for session_id in members {
            match self.call("get", self.store.get(&session_id)).await? {
                Some(session) if session.is_live_at(now) => live.push(session),
                _ => {
                    self.call("index_remove", self.store.index_remove(user_id, &session_id))
                        .await?;
                    tracing::debug!(%user_id, %session_id, "pruned dead index entry");
                }
            }
        }

        live.sort_by(|a, b| {
            a.issued_at
                .cmp(&b.issued_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(live)
    }

    /// Revokes one session. Returns `true` if this call did the revoking.
    async fn revoke_one(&self, session_id: &str, reason: RevokeReason) -> Result<bool, SessionError> {
        let now = OffsetDateTime::now_utc();
        match self
            .call("revoke", self.store.revoke(session_id, reason, now))
            .await?
        {
            RevokeOutcome::Revoked(session) => {
                tracing::info!(
                    user_id = %session.user_id,
                    %session_id,
                    platform = %session.platform,
                    %reason,
                    "session revoked"
                );
                self.emit(EventKind::SessionRevoked, &session, Some(reason.to_string()))
                    .await;
                Ok(true)
            }
            RevokeOutcome::AlreadyTerminal(status) => {
                tracing::debug!(%session_id, %status, "revoke: already terminal");
                Ok(false)
            }
            RevokeOutcome::Missing => {
                tracing::debug!(%session_id, "revoke: no such session");
                Ok(false)
            }
        }
    }

    /// Like [`revoke_one`](Self::revoke_one) for an id taken from the
    /// user's index; a missing record's index entry is pruned.
    async fn revoke_indexed(
        &self,
        user_id: &UserId,
        session_id: &str,
        reason: RevokeReason,
    ) -> Result<bool, SessionError> {
        let revoked = self.revoke_one(session_id, reason).await?;
        if !revoked {
            self.call("index_remove", self.store.index_remove(user_id, session_id))
                .await?;
        }
        Ok(revoked)
    }

    async fn revoke_members(
        &self,
        user_id: &UserId,
        keep: Option<&str>,
        reason: RevokeReason,
    ) -> Result<usize, SessionError> {
        let members = self
            .call("index_members", self.store.index_members(user_id))
            .await?;

        let mut count = 0;
        for session_id in members.iter().filter(|id| Some(id.as_str()) != keep) {
            if self.revoke_indexed(user_id, session_id, reason).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    fn check_binding(&self, session: &Session, context: &RequestContext) -> Result<(), SessionError> {
        let binding = &self.config.binding;

        if binding.validate_ip {
            if let (Some(bound), Some(seen)) = (session.network.ip_address, context.ip) {
                if bound != seen {
                    if !binding.allow_ip_change {
                        tracing::warn!(
                            user_id = %session.user_id,
                            session_id = %session.session_id,
                            %bound,
                            %seen,
                            "ip binding mismatch"
                        );
                        return Err(SessionError::BindingMismatch {
                            field: BindingField::Ip,
                        });
                    }
                    tracing::debug!(session_id = %session.session_id, %bound, %seen, "ip changed");
                }
            }
        }

        if binding.validate_device_id {
            let bound = session.device.device_id.as_deref();
            let seen = context.device_id.as_deref();
            if let (Some(bound), Some(seen)) = (bound, seen) {
                if bound != seen {
                    if !binding.allow_device_change {
                        tracing::warn!(
                            user_id = %session.user_id,
                            session_id = %session.session_id,
                            "device binding mismatch"
                        );
                        return Err(SessionError::BindingMismatch {
                            field: BindingField::DeviceId,
                        });
                    }
                    tracing::debug!(session_id = %session.session_id, "device changed");
                }
            }
        }

        Ok(())
    }

    /// Publishes a lifecycle event. Failures are logged by `call` and
    /// otherwise ignored.
    async fn emit(&self, kind: EventKind, session: &Session, detail: Option<String>) {
        let event = SessionEvent {
            kind,
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            source: self.instance_id.clone(),
            at: OffsetDateTime::now_utc(),
            detail,
        };
        let _ = self.call("publish", self.store.publish(&event)).await;
    }
}

/// Maps a terminal (or past-deadline) record to its error.
fn check_state(session: &Session, now: OffsetDateTime) -> Result<(), SessionError> {
    match session.effective_status(now) {
        SessionStatus::Active => Ok(()),
        status => Err(status_error(status)),
    }
}

fn status_error(status: SessionStatus) -> SessionError {
    match status {
        SessionStatus::Revoked => SessionError::SessionRevoked,
        SessionStatus::Expired | SessionStatus::Active => SessionError::SessionExpired,
    }
}

fn token_pair(
    session_id: &str,
    access: &warden_token::IssuedToken,
    refresh: &warden_token::IssuedToken,
    now: OffsetDateTime,
) -> TokenPair {
    let expires_in = (access.expires_at - now).whole_seconds().max(0) as u64;
    TokenPair {
        session_id: session_id.to_string(),
        access_token: access.token.clone(),
        refresh_token: refresh.token.clone(),
        access_expires_at: access.expires_at,
        refresh_expires_at: refresh.expires_at,
        expires_in,
    }
}

/// `sess_` followed by 128 random bits in hex.
fn generate_session_id() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    format!("sess_{}", hex::encode(bytes))
}

/// `inst_` followed by 32 random bits in hex.
fn generate_instance_id() -> String {
    let bytes: [u8; 4] = rand::rng().random();
    format!("inst_{}", hex::encode(bytes))
}
