use crate::config::{IdentityRotation, PolitenessConfig};
use crate::politeness::{HostClass, HostState, Outcome, Permit};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Shared pacing gate for every outbound request
///
/// The controller is the single point of synchronization for request rate:
/// the listing crawlers and every enrichment worker go through `acquire`
/// before touching the network. All state sits behind one mutex that is
/// never held across an await.
pub struct PolitenessController {
    config: PolitenessConfig,
    hosts: Mutex<HashMap<HostClass, HostState>>,
    identity_cursor: AtomicUsize,
}

impl PolitenessController {
    /// Creates a new controller with both host classes at the baseline delay
    pub fn new(config: PolitenessConfig) -> Self {
        let base = Duration::from_millis(config.base_delay_ms);
        let hosts = [HostClass::Listing, HostClass::Detail]
            .into_iter()
            .map(|host| (host, HostState::new(base)))
            .collect();

        Self {
            config,
            hosts: Mutex::new(hosts),
            identity_cursor: AtomicUsize::new(0),
        }
    }

    fn hosts(&self) -> MutexGuard<'_, HashMap<HostClass, HostState>> {
        self.hosts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn base_delay(&self) -> Duration {
        Duration::from_millis(self.config.base_delay_ms)
    }

    fn sample_jitter(&self) -> Duration {
        if self.config.jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(fastrand::u64(0..=self.config.jitter_ms))
    }

    /// Waits until the next request to `host` is allowed
    ///
    /// Slots are reserved under the lock and slept on outside of it. If a
    /// cooldown pause began while the caller was waiting, a new slot after
    /// the pause is reserved.
    pub async fn acquire(&self, host: HostClass) -> Permit {
        loop {
            let (slot, sequence) = {
                let mut hosts = self.hosts();
                let base = self.base_delay();
                let state = hosts.entry(host).or_insert_with(|| HostState::new(base));
                state.reserve(Instant::now(), self.sample_jitter())
            };

            tokio::time::sleep_until(slot).await;

            let paused = {
                let hosts = self.hosts();
                hosts
                    .get(&host)
                    .is_some_and(|state| state.is_paused(Instant::now()))
            };

            if paused {
                tracing::trace!("{} host class paused while waiting, re-reserving", host);
                continue;
            }

            return Permit {
                host,
                granted_at: Instant::now(),
                sequence,
            };
        }
    }

    /// Adapts the pacing of the permit's host class to a request outcome
    pub fn report_outcome(&self, permit: &Permit, outcome: Outcome) {
        let mut hosts = self.hosts();
        let base = self.base_delay();
        let state = hosts
            .entry(permit.host)
            .or_insert_with(|| HostState::new(base));

        match outcome {
            Outcome::Success => {
                if state.record_success(self.config.backoff_multiplier, base, self.config.relax_after)
                {
                    tracing::debug!(
                        "{} delay relaxed to {:?}",
                        permit.host,
                        state.current_delay
                    );
                }
            }
            outcome if outcome.is_backoff_signal() => {
                state.back_off(
                    self.config.backoff_multiplier,
                    Duration::from_millis(self.config.max_delay_ms),
                );

                if outcome == Outcome::RateLimited {
                    state.pause(Instant::now(), Duration::from_millis(self.config.cooldown_ms));
                }

                tracing::warn!(
                    "{:?} on {} host class, delay now {:?}",
                    outcome,
                    permit.host,
                    state.current_delay
                );
            }
            _ => {}
        }
    }

    /// Returns the next outbound identity from the pool
    pub fn next_identity(&self) -> String {
        let pool = &self.config.identities;
        if pool.is_empty() {
            return String::new();
        }

        let index = match self.config.rotation {
            IdentityRotation::RoundRobin => {
                self.identity_cursor.fetch_add(1, Ordering::Relaxed) % pool.len()
            }
            IdentityRotation::Random => fastrand::usize(..pool.len()),
        };

        pool[index].clone()
    }

    /// Current adaptive delay for a host class
    pub fn current_delay(&self, host: HostClass) -> Duration {
        self.hosts()
            .get(&host)
            .map(|state| state.current_delay)
            .unwrap_or_else(|| self.base_delay())
    }

    /// Returns true if the host class is in a rate-limit cooldown
    pub fn is_paused(&self, host: HostClass) -> bool {
        self.hosts()
            .get(&host)
            .is_some_and(|state| state.is_paused(Instant::now()))
    }
}
