use std::time::Duration;
use tokio::time::Instant;

/// Pacing state of one host class
///
/// Grants are reserved in order: each reservation takes the next free slot
/// and pushes the following slot out by the current delay plus jitter, so
/// concurrent callers never get two grants closer than the delay.
#[derive(Debug, Clone)]
pub struct HostState {
    /// Adaptive delay between grants; never below the configured baseline
    pub current_delay: Duration,

    /// Earliest instant the next grant may be issued
    pub next_slot: Option<Instant>,

    /// Host class is paused until this instant (rate-limit cooldown)
    pub paused_until: Option<Instant>,

    /// Consecutive successful outcomes since the last change of delay
    pub success_streak: u32,

    /// Number of grants issued so far
    pub grants: u64,
}

impl HostState {
    /// Creates a new HostState at the baseline delay
    pub fn new(base_delay: Duration) -> Self {
        Self {
            current_delay: base_delay,
            next_slot: None,
            paused_until: None,
            success_streak: 0,
            grants: 0,
        }
    }

    /// Reserves the next grant slot at or after `now`
    ///
    /// Returns the instant the caller may proceed and the grant sequence number.
    pub fn reserve(&mut self, now: Instant, jitter: Duration) -> (Instant, u64) {
        let mut slot = now;
        if let Some(next) = self.next_slot {
            slot = slot.max(next);
        }
        if let Some(until) = self.paused_until {
            slot = slot.max(until);
        }

        self.next_slot = Some(slot + self.current_delay + jitter);
        self.grants += 1;
        (slot, self.grants)
    }

    /// Returns true if the host class is in a cooldown pause at `now`
    pub fn is_paused(&self, now: Instant) -> bool {
        self.paused_until.is_some_and(|until| until > now)
    }

    /// Multiplies the delay by `multiplier`, capped at `max_delay`
    pub fn back_off(&mut self, multiplier: f64, max_delay: Duration) {
        self.success_streak = 0;
        self.current_delay = self.current_delay.mul_f64(multiplier).min(max_delay);
    }

    /// Pauses the host class for `cooldown` starting at `now`
    pub fn pause(&mut self, now: Instant, cooldown: Duration) {
        let until = now + cooldown;
        self.paused_until = Some(self.paused_until.map_or(until, |current| current.max(until)));
    }

    /// Records a success; every `relax_after` in a row divide the delay by
    /// `multiplier`, never going below `base_delay`
    ///
    /// Returns true if the delay changed.
    pub fn record_success(&mut self, multiplier: f64, base_delay: Duration, relax_after: u32) -> bool {
        self.success_streak += 1;
        if self.success_streak < relax_after || self.current_delay <= base_delay {
            return false;
        }

        self.success_streak = 0;
        self.current_delay = self.current_delay.div_f64(multiplier).max(base_delay);
        true
    }
}
