//! Integration tests for the session manager against the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use time::OffsetDateTime;
use warden_policy::PolicyConfig;
use warden_session::{
    BindingConfig, BindingField, LoginRequest, RequestContext, SessionConfig, SessionError,
    SessionManager, TokenPair,
};
use warden_store::{
    Admission, DeviceInfo, EventKind, MemoryStore, NetworkInfo, ReviewEntry, RevokeOutcome,
    RevokeReason, RotateOutcome, Rotation, Session, SessionEvent, SessionStatus, SessionStore,
    StoreError,
};
use warden_token::{Platform, TokenCodec, TokenError, UserId};

// =========================================================================
// Helpers
// =========================================================================

fn codec() -> TokenCodec {
    TokenCodec::new("integration-test-signing-key").unwrap()
}

fn manager_with(
    config: SessionConfig,
    policy: PolicyConfig,
) -> (SessionManager<MemoryStore>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let manager = SessionManager::new(store.clone(), codec(), config, policy);
    (manager, store)
}

fn manager() -> (SessionManager<MemoryStore>, Arc<MemoryStore>) {
    manager_with(SessionConfig::default(), PolicyConfig::default())
}

fn policy(max: usize, kick: bool) -> PolicyConfig {
    PolicyConfig {
        max_concurrent_sessions: max,
        kick_oldest_session: kick,
        ..PolicyConfig::default()
    }
}

fn alice() -> UserId {
    UserId::from(1001u64)
}

fn app_login() -> LoginRequest {
    LoginRequest::new(Platform::App)
        .with_device(DeviceInfo::with_id("phone-1"))
        .with_network(NetworkInfo::with_ip("203.0.113.10".parse().unwrap()))
        .with_login_method("password")
}

fn ctx() -> RequestContext {
    RequestContext::new()
}

async fn login(manager: &SessionManager<MemoryStore>, request: LoginRequest) -> TokenPair {
    manager.create_session(alice(), request).await.unwrap()
}

/// Logs in, then waits a moment so the next login has a later `issued_at`.
async fn login_in_order(manager: &SessionManager<MemoryStore>, request: LoginRequest) -> TokenPair {
    let pair = login(manager, request).await;
    tokio::time::sleep(Duration::from_millis(2)).await;
    pair
}

// =========================================================================
// create_session() / validate_token()
// =========================================================================

#[tokio::test]
async fn test_create_then_validate_returns_same_session() {
    let (manager, _) = manager();

    let pair = login(&manager, app_login()).await;
    let info = manager
        .validate_token(&pair.access_token, &ctx())
        .await
        .unwrap();

    assert_eq!(info.session_id, pair.session_id);
    assert_eq!(info.user_id, alice());
    assert_eq!(info.platform, Platform::App);
    assert_eq!(info.status, SessionStatus::Active);
    assert!(pair.session_id.starts_with("sess_"));
}

#[tokio::test]
async fn test_create_stores_only_token_hashes() {
    let (manager, store) = manager();

    let pair = login(&manager, app_login()).await;
    let record = store.get(&pair.session_id).await.unwrap().unwrap();

    assert_ne!(record.access_token_hash, pair.access_token);
    assert_ne!(record.refresh_token_hash, pair.refresh_token);
    assert_eq!(record.access_token_hash.len(), 64);
    assert_eq!(record.login_method.as_deref(), Some("password"));
}

#[tokio::test]
async fn test_create_expires_in_matches_access_ttl() {
    let (manager, _) = manager();

    let pair = login(&manager, app_login()).await;

    assert!(pair.expires_in <= 900 && pair.expires_in >= 898);
    assert!(pair.access_expires_at < pair.refresh_expires_at);
}

#[tokio::test]
async fn test_create_truncates_long_device_label() {
    let (manager, store) = manager();
    let request = LoginRequest::new(Platform::Web).with_device(DeviceInfo {
        device_label: Some("x".repeat(2000)),
        ..DeviceInfo::default()
    });

    let pair = login(&manager, request).await;

    let record = store.get(&pair.session_id).await.unwrap().unwrap();
    assert_eq!(record.device.device_label.unwrap().len(), 500);
}

#[tokio::test]
async fn test_validate_refresh_token_as_access_is_unauthenticated() {
    let (manager, _) = manager();
    let pair = login(&manager, app_login()).await;

    let err = manager
        .validate_token(&pair.refresh_token, &ctx())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::Unauthenticated(TokenError::WrongKind { .. })
    ));
    assert_eq!(err.public_message(), "unauthenticated");
}

#[tokio::test]
async fn test_validate_garbage_is_unauthenticated() {
    let (manager, _) = manager();
    let err = manager.validate_token("nonsense", &ctx()).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Unauthenticated(TokenError::InvalidSignature)
    ));
}

#[tokio::test]
async fn test_validate_token_from_other_deployment_is_unauthenticated() {
    let (manager, _) = manager();
    let (foreign, _) = {
        let store = Arc::new(MemoryStore::new());
        let other = SessionManager::new(
            store.clone(),
            TokenCodec::new("some-other-key").unwrap(),
            SessionConfig::default(),
            PolicyConfig::default(),
        );
        (other.create_session(alice(), app_login()).await.unwrap(), store)
    };

    let err = manager
        .validate_token(&foreign.access_token, &ctx())
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Unauthenticated(_)));
}

#[tokio::test]
async fn test_validate_updates_last_active() {
    let (manager, store) = manager();
    let pair = login(&manager, app_login()).await;
    let before = store
        .get(&pair.session_id)
        .await
        .unwrap()
        .unwrap()
        .last_active_at;

    tokio::time::sleep(Duration::from_millis(5)).await;
    let info = manager
        .validate_token(&pair.access_token, &ctx())
        .await
        .unwrap();

    let after = store
        .get(&pair.session_id)
        .await
        .unwrap()
        .unwrap()
        .last_active_at;
    assert!(after > before);
    assert_eq!(info.last_active_at, after);
}

#[tokio::test]
async fn test_validate_session_by_id() {
    let (manager, _) = manager();
    let pair = login(&manager, app_login()).await;

    let info = manager.validate_session(&pair.session_id).await.unwrap();
    assert_eq!(info.session_id, pair.session_id);

    manager.revoke_session(&pair.session_id).await.unwrap();
    assert!(matches!(
        manager.validate_session(&pair.session_id).await,
        Err(SessionError::SessionRevoked)
    ));
    assert!(matches!(
        manager.validate_session("sess_missing").await,
        Err(SessionError::SessionNotFound)
    ));
}

// =========================================================================
// refresh_session()
// =========================================================================

#[tokio::test]
async fn test_refresh_once_succeeds_second_time_is_reuse() {
    let (manager, _) = manager();
    let pair = login(&manager, app_login()).await;
    let other = login(
        &manager,
        LoginRequest::new(Platform::Web).with_device(DeviceInfo::with_id("laptop")),
    )
    .await;

    let rotated = manager.refresh_session(&pair.refresh_token).await.unwrap();
    let reuse = manager.refresh_session(&pair.refresh_token).await;

    assert!(matches!(reuse, Err(SessionError::ReuseDetected)));
    // Every session of the user is gone, including the rotated one.
    for token in [&rotated.access_token, &other.access_token] {
        assert!(matches!(
            manager.validate_token(token, &ctx()).await,
            Err(SessionError::SessionRevoked)
        ));
    }
    assert_eq!(manager.active_session_count(&alice()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_refresh_returns_new_pair_and_retires_old_access() {
    let (manager, _) = manager();
    let pair = login(&manager, app_login()).await;

    let rotated = manager.refresh_session(&pair.refresh_token).await.unwrap();

    assert_eq!(rotated.session_id, pair.session_id);
    assert_ne!(rotated.access_token, pair.access_token);
    assert_ne!(rotated.refresh_token, pair.refresh_token);
    assert!(
        manager
            .validate_token(&rotated.access_token, &ctx())
            .await
            .is_ok()
    );
    assert!(matches!(
        manager.validate_token(&pair.access_token, &ctx()).await,
        Err(SessionError::StaleToken)
    ));
}

#[tokio::test]
async fn test_refresh_keeps_absolute_deadline() {
    let (manager, _) = manager();
    let pair = login(&manager, app_login()).await;

    let first = manager.refresh_session(&pair.refresh_token).await.unwrap();
    let second = manager.refresh_session(&first.refresh_token).await.unwrap();

    assert_eq!(first.refresh_expires_at, pair.refresh_expires_at);
    assert_eq!(second.refresh_expires_at, pair.refresh_expires_at);
}

#[tokio::test]
async fn test_access_expiry_clamped_to_session_deadline() {
    let config = SessionConfig {
        access_token_ttl: Duration::from_secs(3600),
        refresh_token_ttl: Duration::from_secs(60),
        ..SessionConfig::default()
    };
    let (manager, _) = manager_with(config, PolicyConfig::default());

    let pair = login(&manager, app_login()).await;
    let rotated = manager.refresh_session(&pair.refresh_token).await.unwrap();

    assert_eq!(pair.access_expires_at, pair.refresh_expires_at);
    assert_eq!(rotated.access_expires_at, pair.refresh_expires_at);
}

#[tokio::test]
async fn test_refresh_with_access_token_is_unauthenticated() {
    let (manager, _) = manager();
    let pair = login(&manager, app_login()).await;

    let err = manager.refresh_session(&pair.access_token).await.unwrap_err();

    assert!(matches!(
        err,
        SessionError::Unauthenticated(TokenError::WrongKind { .. })
    ));
    // Not treated as reuse: the session survives.
    assert!(
        manager
            .validate_token(&pair.access_token, &ctx())
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_refresh_revoked_session_is_revoked() {
    let (manager, _) = manager();
    let pair = login(&manager, app_login()).await;
    manager.revoke_session(&pair.session_id).await.unwrap();

    let err = manager.refresh_session(&pair.refresh_token).await.unwrap_err();

    assert!(matches!(err, SessionError::SessionRevoked));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_refresh_concurrent_same_token_exactly_one_wins() {
    let (manager, _) = manager();
    let manager = Arc::new(manager);
    let pair = login(&manager, app_login()).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        let token = pair.refresh_token.clone();
        handles.push(tokio::spawn(async move {
            manager.refresh_session(&token).await
        }));
    }

    let mut wins = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => wins += 1,
            Err(SessionError::ReuseDetected | SessionError::SessionRevoked) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(wins, 1);
}

// =========================================================================
// Concurrency policy
// =========================================================================

#[tokio::test]
async fn test_limit_without_kick_rejects_third_login() {
    let (manager, _) = manager_with(SessionConfig::default(), policy(2, false));

    login(&manager, app_login()).await;
    login(&manager, app_login()).await;
    let third = manager.create_session(alice(), app_login()).await;

    assert!(matches!(
        third,
        Err(SessionError::TooManySessions {
            active: 2,
            limit: 2
        })
    ));
    assert_eq!(manager.active_session_count(&alice()).await.unwrap(), 2);
    assert_eq!(third.unwrap_err().status_code(), 429);
}

#[tokio::test]
async fn test_limit_with_kick_evicts_oldest() {
    let (manager, store) = manager_with(SessionConfig::default(), policy(2, true));

    let first = login_in_order(&manager, app_login()).await;
    let second = login_in_order(&manager, app_login()).await;
    let third = login(&manager, app_login()).await;

    assert!(matches!(
        manager.validate_token(&first.access_token, &ctx()).await,
        Err(SessionError::SessionRevoked)
    ));
    let record = store.get(&first.session_id).await.unwrap().unwrap();
    assert_eq!(record.revoke_reason, Some(RevokeReason::Evicted));

    let listed: Vec<_> = manager
        .list_sessions(&alice())
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.session_id)
        .collect();
    assert_eq!(listed, vec![second.session_id, third.session_id]);
}

#[tokio::test]
async fn test_single_device_login_revokes_same_platform_session() {
    let policy = PolicyConfig {
        single_device_login: true,
        ..PolicyConfig::default()
    };
    let (manager, _) = manager_with(SessionConfig::default(), policy);

    let first = login_in_order(&manager, app_login()).await;
    let web = login_in_order(&manager, LoginRequest::new(Platform::Web)).await;
    let second = login(&manager, app_login()).await;

    assert!(matches!(
        manager.validate_token(&first.access_token, &ctx()).await,
        Err(SessionError::SessionRevoked)
    ));
    assert!(manager.validate_token(&web.access_token, &ctx()).await.is_ok());
    assert!(
        manager
            .validate_token(&second.access_token, &ctx())
            .await
            .is_ok()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_logins_never_exceed_limit() {
    let (manager, _) = manager_with(SessionConfig::default(), policy(3, false));
    let manager = Arc::new(manager);

    let mut handles = Vec::new();
    for _ in 0..12 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.create_session(alice(), app_login()).await
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(SessionError::TooManySessions { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(admitted, 3);
    assert_eq!(manager.active_session_count(&alice()).await.unwrap(), 3);
}

#[tokio::test]
async fn test_unlimited_sessions_when_limit_zero() {
    let (manager, _) = manager_with(SessionConfig::default(), policy(0, false));
    for _ in 0..10 {
        login(&manager, app_login()).await;
    }
    assert_eq!(manager.active_session_count(&alice()).await.unwrap(), 10);
}

#[tokio::test]
async fn test_risky_login_publishes_flag_and_still_succeeds() {
    let policy = PolicyConfig {
        enable_risk_detection: true,
        risk_threshold: 2,
        ..PolicyConfig::default()
    };
    let (manager, store) = manager_with(SessionConfig::default(), policy);
    login(&manager, app_login()).await;
    let mut events = store.subscribe();

    let stranger = LoginRequest::new(Platform::Web)
        .with_device(DeviceInfo::with_id("unknown-device"))
        .with_network(NetworkInfo::with_ip("198.51.100.77".parse().unwrap()));
    let pair = manager.create_session(alice(), stranger).await.unwrap();

    let flagged = events.recv().await.unwrap();
    assert_eq!(flagged.kind, EventKind::RiskFlagged);
    assert_eq!(flagged.session_id, pair.session_id);
    let created = events.recv().await.unwrap();
    assert_eq!(created.kind, EventKind::SessionCreated);
}

// =========================================================================
// Binding
// =========================================================================

fn strict_binding() -> SessionConfig {
    SessionConfig {
        binding: BindingConfig {
            validate_ip: true,
            allow_ip_change: false,
            validate_device_id: true,
            allow_device_change: false,
        },
        ..SessionConfig::default()
    }
}

#[tokio::test]
async fn test_binding_ip_change_rejected_when_disallowed() {
    let (manager, _) = manager_with(strict_binding(), PolicyConfig::default());
    let pair = login(&manager, app_login()).await;

    let moved = RequestContext::new().with_ip("198.51.100.1".parse().unwrap());
    let err = manager
        .validate_token(&pair.access_token, &moved)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::BindingMismatch {
            field: BindingField::Ip
        }
    ));
    assert_eq!(err.public_message(), "unauthenticated");
}

#[tokio::test]
async fn test_binding_device_change_rejected_when_disallowed() {
    let (manager, _) = manager_with(strict_binding(), PolicyConfig::default());
    let pair = login(&manager, app_login()).await;

    let other_device = RequestContext::new().with_device_id("phone-2");
    let err = manager
        .validate_token(&pair.access_token, &other_device)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::BindingMismatch {
            field: BindingField::DeviceId
        }
    ));
}

#[tokio::test]
async fn test_binding_matching_or_absent_values_pass() {
    let (manager, _) = manager_with(strict_binding(), PolicyConfig::default());
    let pair = login(&manager, app_login()).await;

    let same = RequestContext::new()
        .with_ip("203.0.113.10".parse().unwrap())
        .with_device_id("phone-1");
    assert!(manager.validate_token(&pair.access_token, &same).await.is_ok());
    assert!(manager.validate_token(&pair.access_token, &ctx()).await.is_ok());
}

#[tokio::test]
async fn test_binding_change_allowed_passes() {
    let config = SessionConfig {
        binding: BindingConfig {
            validate_ip: true,
            allow_ip_change: true,
            ..BindingConfig::default()
        },
        ..SessionConfig::default()
    };
    let (manager, _) = manager_with(config, PolicyConfig::default());
    let pair = login(&manager, app_login()).await;

    let moved = RequestContext::new().with_ip("198.51.100.1".parse().unwrap());
    assert!(manager.validate_token(&pair.access_token, &moved).await.is_ok());
}

// =========================================================================
// Revocation
// =========================================================================

#[tokio::test]
async fn test_revoke_session_twice_is_idempotent() {
    let (manager, store) = manager();
    let pair = login(&manager, app_login()).await;

    manager.revoke_session(&pair.session_id).await.unwrap();
    let after_first = store.get(&pair.session_id).await.unwrap();
    manager.revoke_session(&pair.session_id).await.unwrap();
    let after_second = store.get(&pair.session_id).await.unwrap();

    assert_eq!(after_first, after_second);
    let record = after_second.unwrap();
    assert_eq!(record.status, SessionStatus::Revoked);
    assert_eq!(record.revoke_reason, Some(RevokeReason::Logout));
    assert!(store.index_members(&alice()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_revoke_absent_session_is_ok() {
    let (manager, _) = manager();
    assert!(manager.revoke_session("sess_never_existed").await.is_ok());
}

#[tokio::test]
async fn test_revoke_other_sessions_keeps_exactly_one() {
    let (manager, _) = manager();
    let a = login(&manager, app_login()).await;
    let keep = login(&manager, app_login()).await;
    let c = login(&manager, app_login()).await;

    let count = manager
        .revoke_other_sessions(&alice(), &keep.session_id)
        .await
        .unwrap();

    assert_eq!(count, 2);
    let listed = manager.list_sessions(&alice()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].session_id, keep.session_id);
    for gone in [&a, &c] {
        assert!(matches!(
            manager.validate_token(&gone.access_token, &ctx()).await,
            Err(SessionError::SessionRevoked)
        ));
    }
}

#[tokio::test]
async fn test_revoke_all_sessions_leaves_none() {
    let (manager, _) = manager();
    for _ in 0..3 {
        login(&manager, app_login()).await;
    }

    let count = manager.revoke_all_sessions(&alice()).await.unwrap();

    assert_eq!(count, 3);
    assert!(manager.list_sessions(&alice()).await.unwrap().is_empty());
    assert_eq!(manager.revoke_all_sessions(&alice()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_trim_sessions_revokes_oldest_first() {
    let (manager, _) = manager();
    let _oldest = login_in_order(&manager, app_login()).await;
    let _middle = login_in_order(&manager, app_login()).await;
    let newest = login(&manager, app_login()).await;

    let count = manager.trim_sessions(&alice(), 1).await.unwrap();

    assert_eq!(count, 2);
    let listed = manager.list_sessions(&alice()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].session_id, newest.session_id);
}

// =========================================================================
// Listing
// =========================================================================

#[tokio::test]
async fn test_list_sessions_oldest_first_and_prunes_dead_entries() {
    let (manager, store) = manager();
    let first = login_in_order(&manager, app_login()).await;
    let second = login(&manager, LoginRequest::new(Platform::Web)).await;
    store.index_add(&alice(), "sess_ghost").await.unwrap();

    let listed = manager.list_sessions(&alice()).await.unwrap();

    let ids: Vec<_> = listed.iter().map(|s| s.session_id.clone()).collect();
    assert_eq!(ids, vec![first.session_id, second.session_id]);
    assert!(
        !store
            .index_members(&alice())
            .await
            .unwrap()
            .contains(&"sess_ghost".to_string())
    );
}

#[tokio::test]
async fn test_list_sessions_serializes_without_hashes() {
    let (manager, _) = manager();
    login(&manager, app_login()).await;

    let listed = manager.list_sessions(&alice()).await.unwrap();
    let json = serde_json::to_string(&listed).unwrap();

    assert!(!json.contains("token_hash"));
}

// =========================================================================
// Expiry
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_expired_session_is_absent_and_rejected() {
    let config = SessionConfig {
        access_token_ttl: Duration::from_secs(3600),
        refresh_token_ttl: Duration::from_secs(7200),
        ..SessionConfig::default()
    };
    let (manager, store) = manager_with(config, PolicyConfig::default());
    let pair = login(&manager, app_login()).await;

    tokio::time::advance(Duration::from_secs(7201)).await;

    assert!(store.get(&pair.session_id).await.unwrap().is_none());
    let err = manager
        .validate_token(&pair.access_token, &ctx())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::SessionNotFound | SessionError::SessionExpired
    ));
    assert!(manager.list_sessions(&alice()).await.unwrap().is_empty());
}

// =========================================================================
// Events
// =========================================================================

#[tokio::test]
async fn test_lifecycle_events_are_published() {
    let (manager, store) = manager();
    let mut events = store.subscribe();

    let pair = login(&manager, app_login()).await;
    manager.refresh_session(&pair.refresh_token).await.unwrap();
    manager.revoke_session(&pair.session_id).await.unwrap();

    let kinds: Vec<SessionEvent> = vec![
        events.recv().await.unwrap(),
        events.recv().await.unwrap(),
        events.recv().await.unwrap(),
    ];
    assert_eq!(
        kinds.iter().map(|e| e.kind).collect::<Vec<_>>(),
        vec![
            EventKind::SessionCreated,
            EventKind::TokenRefreshed,
            EventKind::SessionRevoked,
        ]
    );
    assert!(kinds.iter().all(|e| e.source == manager.instance_id()));
    assert!(kinds.iter().all(|e| e.session_id == pair.session_id));
    assert_eq!(kinds[2].detail.as_deref(), Some("logout"));
}

// =========================================================================
// Store failures
// =========================================================================

const HEALTHY: u8 = 0;
const FAILING: u8 = 1;
const HANGING: u8 = 2;
const SLOW: u8 = 3;

/// Wraps a memory store and can be switched into failing, hanging or slow.
struct FaultyStore {
    inner: MemoryStore,
    mode: AtomicU8,
}

impl FaultyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            mode: AtomicU8::new(HEALTHY),
        }
    }

    fn set(&self, mode: u8) {
        self.mode.store(mode, Ordering::SeqCst);
    }

    async fn gate(&self) -> Result<(), StoreError> {
        match self.mode.load(Ordering::SeqCst) {
            FAILING => Err(StoreError::Connection("connection refused".into())),
            HANGING => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            SLOW => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl SessionStore for FaultyStore {
    async fn put(&self, session: &Session, ttl: Duration) -> Result<(), StoreError> {
        self.gate().await?;
        self.inner.put(session, ttl).await
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        self.gate().await?;
        self.inner.get(session_id).await
    }

    async fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        self.gate().await?;
        self.inner.delete(session_id).await
    }

    async fn index_add(&self, user_id: &UserId, session_id: &str) -> Result<(), StoreError> {
        self.gate().await?;
        self.inner.index_add(user_id, session_id).await
    }

    async fn index_remove(&self, user_id: &UserId, session_id: &str) -> Result<bool, StoreError> {
        self.gate().await?;
        self.inner.index_remove(user_id, session_id).await
    }

    async fn index_members(&self, user_id: &UserId) -> Result<Vec<String>, StoreError> {
        self.gate().await?;
        self.inner.index_members(user_id).await
    }

    async fn insert_bounded(
        &self,
        session: &Session,
        ttl: Duration,
        limit: usize,
        exclusive_platform: Option<Platform>,
    ) -> Result<Admission, StoreError> {
        self.gate().await?;
        self.inner
            .insert_bounded(session, ttl, limit, exclusive_platform)
            .await
    }

    async fn rotate(
        &self,
        session_id: &str,
        rotation: &Rotation,
    ) -> Result<RotateOutcome, StoreError> {
        self.gate().await?;
        self.inner.rotate(session_id, rotation).await
    }

    async fn touch(&self, session_id: &str, at: OffsetDateTime) -> Result<bool, StoreError> {
        self.gate().await?;
        self.inner.touch(session_id, at).await
    }

    async fn revoke(
        &self,
        session_id: &str,
        reason: RevokeReason,
        at: OffsetDateTime,
    ) -> Result<RevokeOutcome, StoreError> {
        self.gate().await?;
        self.inner.revoke(session_id, reason, at).await
    }

    async fn due_for_review(&self, limit: usize) -> Result<Vec<ReviewEntry>, StoreError> {
        self.gate().await?;
        self.inner.due_for_review(limit).await
    }

    async fn reap(&self, entry: &ReviewEntry) -> Result<bool, StoreError> {
        self.gate().await?;
        self.inner.reap(entry).await
    }

    async fn publish(&self, event: &SessionEvent) -> Result<(), StoreError> {
        self.gate().await?;
        self.inner.publish(event).await
    }
}

fn faulty_manager_with(policy: PolicyConfig) -> (SessionManager<FaultyStore>, Arc<FaultyStore>) {
    let store = Arc::new(FaultyStore::new());
    let manager = SessionManager::new(store.clone(), codec(), SessionConfig::default(), policy);
    (manager, store)
}

fn faulty_manager() -> (SessionManager<FaultyStore>, Arc<FaultyStore>) {
    faulty_manager_with(PolicyConfig::default())
}

#[tokio::test]
async fn test_store_failure_fails_closed() {
    let (manager, store) = faulty_manager();
    let pair = manager.create_session(alice(), app_login()).await.unwrap();

    store.set(FAILING);
    let err = manager
        .validate_token(&pair.access_token, &ctx())
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::StoreUnavailable(_)));
    assert_eq!(err.status_code(), 503);
}

#[tokio::test(start_paused = true)]
async fn test_store_timeout_is_unavailable() {
    let (manager, store) = faulty_manager();
    let pair = manager.create_session(alice(), app_login()).await.unwrap();

    store.set(HANGING);
    let err = manager
        .refresh_session(&pair.refresh_token)
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::StoreUnavailable(_)));

    // Nothing was rotated.
    store.set(HEALTHY);
    assert!(manager.refresh_session(&pair.refresh_token).await.is_ok());
}

#[tokio::test]
async fn test_create_fails_closed_when_store_down() {
    let (manager, store) = faulty_manager();
    store.set(FAILING);

    let err = manager
        .create_session(alice(), app_login())
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::StoreUnavailable(_)));
}

// =========================================================================
// Admission races
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_create_session_concurrent_single_device_leaves_one_live() {
    let policy = PolicyConfig {
        single_device_login: true,
        ..PolicyConfig::default()
    };
    let (manager, store) = faulty_manager_with(policy);
    let manager = Arc::new(manager);
    store.set(SLOW);

    let mut handles = Vec::new();
    for _ in 0..2 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.create_session(alice(), app_login()).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(SessionError::TooManySessions { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    store.set(HEALTHY);

    assert!(created >= 1);
    let sessions = manager.list_sessions(&alice()).await.unwrap();
    let live_app: Vec<_> = sessions
        .iter()
        .filter(|s| s.platform == Platform::App && s.status == SessionStatus::Active)
        .collect();
    assert_eq!(live_app.len(), 1);
    assert_eq!(manager.active_session_count(&alice()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_create_session_rejected_risky_login_emits_nothing() {
    let policy = PolicyConfig {
        max_concurrent_sessions: 1,
        kick_oldest_session: false,
        enable_risk_detection: true,
        risk_threshold: 1,
        ..PolicyConfig::default()
    };
    let (manager, store) = manager_with(SessionConfig::default(), policy);
    login(&manager, app_login()).await;
    let mut events = store.subscribe();

    let stranger = LoginRequest::new(Platform::Web)
        .with_device(DeviceInfo::with_id("unknown-device"))
        .with_network(NetworkInfo::with_ip("198.51.100.77".parse().unwrap()));
    let err = manager.create_session(alice(), stranger).await.unwrap_err();

    assert!(matches!(err, SessionError::TooManySessions { active: 1, limit: 1 }));
    assert!(events.try_recv().is_err());
}
