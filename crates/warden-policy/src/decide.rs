//! The login decision.

use std::net::IpAddr;

use warden_store::{Session, SessionStatus};
use warden_token::Platform;

use crate::PolicyConfig;

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// What we know about the login being attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginContext {
    pub platform: Platform,
    pub device_id: Option<String>,
    pub ip: Option<IpAddr>,
}

/// Whether the login may proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Room is available; nothing to evict.
    Accept,
    /// Proceed after revoking these sessions, oldest first.
    EvictOldest { victims: Vec<String> },
    /// The user is at the limit and eviction is disabled.
    Reject { active: usize, limit: usize },
}

/// One way a login differs from the user's recent history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RiskSignal {
    /// No recent session used this device id.
    UnknownDevice,
    /// No recent session came from this exact address.
    UnknownIp,
    /// No recent session came from the same /24 (IPv4) or /48 (IPv6).
    UnknownNetwork,
    /// No recent session was opened on this platform.
    UnknownPlatform,
}

/// Attached to a decision when enough signals fire.
///
/// Advisory only: a flag never changes the verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskFlag {
    pub score: u32,
    pub signals: Vec<RiskSignal>,
}

/// The outcome of [`decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    pub risk: Option<RiskFlag>,
}

// ---------------------------------------------------------------------------
// decide()
// ---------------------------------------------------------------------------

/// Decides what happens to a login given the user's existing sessions.
///
/// Rules, in order:
///
/// 1. With `single_device_login`, every session on the login's platform is
///    a victim.
/// 2. The sessions that remain are checked against
///    `max_concurrent_sessions`. At or over the limit, the oldest (by
///    `issued_at`, ties by id) are added as victims until one slot is free,
///    or the login is rejected if `kick_oldest_session` is off.
/// 3. Independently, risk scoring may attach a [`RiskFlag`].
///
/// Non-active entries in `existing` are ignored.
pub fn decide(existing: &[Session], login: &LoginContext, config: &PolicyConfig) -> Decision {
    let mut active: Vec<&Session> = existing
        .iter()
        .filter(|s| s.status == SessionStatus::Active)
        .collect();
    active.sort_by(|a, b| {
        a.issued_at
            .cmp(&b.issued_at)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });

    let verdict = concurrency_verdict(&active, login, config);
    let risk = if config.enable_risk_detection {
        score_risk(&active, login, config)
    } else {
        None
    };

    Decision { verdict, risk }
}

/// `active` must be sorted oldest first.
fn concurrency_verdict(active: &[&Session], login: &LoginContext, config: &PolicyConfig) -> Verdict {
    let (mut victims, remaining): (Vec<&Session>, Vec<&Session>) = if config.single_device_login {
        active.iter().copied().partition(|s| s.platform == login.platform)
    } else {
        (Vec::new(), active.to_vec())
    };

    if config.is_bounded() && remaining.len() >= config.max_concurrent_sessions {
        if !config.kick_oldest_session {
            return Verdict::Reject {
                active: remaining.len(),
                limit: config.max_concurrent_sessions,
            };
        }
        let excess = remaining.len() + 1 - config.max_concurrent_sessions;
        victims.extend(remaining.iter().copied().take(excess));
    }

    if victims.is_empty() {
        Verdict::Accept
    } else {
        Verdict::EvictOldest {
            victims: victims.into_iter().map(|s| s.session_id.clone()).collect(),
        }
    }
}

fn score_risk(active: &[&Session], login: &LoginContext, config: &PolicyConfig) -> Option<RiskFlag> {
    if active.is_empty() {
        return None;
    }

    let mut recent: Vec<&Session> = active.to_vec();
    recent.sort_by(|a, b| {
        b.last_active_at
            .cmp(&a.last_active_at)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
    if config.risk_window > 0 {
        recent.truncate(config.risk_window);
    }

    let mut signals = Vec::new();

    if let Some(device_id) = login.device_id.as_deref() {
        let seen = recent
            .iter()
            .any(|s| s.device.device_id.as_deref() == Some(device_id));
        if !seen {
            signals.push(RiskSignal::UnknownDevice);
        }
    }

    if let Some(ip) = login.ip {
        let known: Vec<IpAddr> = recent.iter().filter_map(|s| s.network.ip_address).collect();
        if !known.contains(&ip) {
            signals.push(RiskSignal::UnknownIp);
        }
        if !known.iter().any(|other| same_network(*other, ip)) {
            signals.push(RiskSignal::UnknownNetwork);
        }
    }

    if !recent.iter().any(|s| s.platform == login.platform) {
        signals.push(RiskSignal::UnknownPlatform);
    }

    let score = signals.len() as u32;
    if score > 0 && score >= config.risk_threshold {
        Some(RiskFlag { score, signals })
    } else {
        None
    }
}

/// Same /24 for IPv4, same /48 for IPv6. IPv4-mapped IPv6 compares as IPv4.
fn same_network(a: IpAddr, b: IpAddr) -> bool {
    match (a.to_canonical(), b.to_canonical()) {
        (IpAddr::V4(a), IpAddr::V4(b)) => a.octets()[..3] == b.octets()[..3],
        (IpAddr::V6(a), IpAddr::V6(b)) => a.segments()[..3] == b.segments()[..3],
        _ => false,
    }
}

// =========================================================================
// Tests
// =========================================================================
