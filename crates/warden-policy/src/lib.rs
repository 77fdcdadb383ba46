//! Login policy for Warden.
//!
//! Answers one question per login: given the sessions a user already holds,
//! may this new one be created, and does anything have to make room for it?
//!
//! ```text
//! existing sessions ─┐
//! login context ─────┼──→ decide() ──→ Decision { verdict, risk }
//! policy config ─────┘
//! ```
//!
//! [`decide`] is a pure function. It never touches the store and has no
//! hidden randomness, so identical inputs always produce the identical
//! decision. Acting on the decision (revoking victims, logging a risk flag)
//! is the session manager's job.

mod config;
mod decide;

pub use config::PolicyConfig;
pub use decide::{Decision, LoginContext, RiskFlag, RiskSignal, Verdict, decide};
