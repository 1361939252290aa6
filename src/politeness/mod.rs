//! Politeness controller: request pacing, adaptive backoff and identity rotation
//!
//! This module handles:
//! - Minimum spacing (plus jitter) between requests of the same host class
//! - Multiplicative backoff on rate-limit, server-error and timeout outcomes
//! - Cooldown pauses after rate-limit responses
//! - Relaxing the delay back toward the baseline on sustained success
//! - Rotating the outbound identity (user agent)

mod controller;
mod host_state;

pub use controller::PolitenessController;
pub use host_state::HostState;

use std::fmt;
use tokio::time::Instant;

/// Independent rate budgets
///
/// Listing pages are rendered against one host budget, detail pages are
/// fetched against another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostClass {
    Listing,
    Detail,
}

impl HostClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listing => "listing",
            Self::Detail => "detail",
        }
    }
}

impl fmt::Display for HostClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to a request issued under a permit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,

    /// HTTP 429 or an equivalent throttling signal
    RateLimited,

    /// HTTP 5xx
    ServerError,

    /// The request did not finish within its timeout
    Timeout,

    /// 4xx other than 429; not a pacing signal
    ClientError,
}

impl Outcome {
    /// Returns true if the outcome should slow the host class down
    pub fn is_backoff_signal(&self) -> bool {
        matches!(self, Self::RateLimited | Self::ServerError | Self::Timeout)
    }
}

/// Proof that the caller waited for its turn
#[derive(Debug, Clone)]
pub struct Permit {
    pub host: HostClass,

    /// When the permit was handed out
    pub granted_at: Instant,

    /// Per-class grant counter, starting at 1
    pub sequence: u64,
}
