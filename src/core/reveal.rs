//! Bounded retry state for scroll-into-view requests.
//!
//! A reveal target may not be rendered yet (spans still loading, or the
//! span arrives with the next update). The task keeps the target and a
//! retry budget; the session polls it on a fixed interval until the
//! target shows up or the budget runs out. Clearing the target cancels.

use tokio::time::Instant;

use crate::config::RevealSettings;
use crate::domain::SpanId;

#[derive(Debug, Clone)]
pub struct RevealTask {
    settings: RevealSettings,
    target: Option<SpanId>,
    retries_left: u32,
    next_attempt: Option<Instant>,
}

impl RevealTask {
    pub fn new(settings: RevealSettings) -> Self {
        Self {
            settings,
            target: None,
            retries_left: 0,
            next_attempt: None,
        }
    }

    /// Replace the target and reset the retry budget
    pub fn request(&mut self, target: SpanId) {
        self.target = Some(target);
        self.retries_left = self.settings.max_attempts;
        self.next_attempt = None;
    }

    pub fn cancel(&mut self) {
        self.target = None;
        self.next_attempt = None;
    }

    pub fn target(&self) -> Option<&SpanId> {
        self.target.as_ref()
    }

    pub fn retries_left(&self) -> u32 {
        self.retries_left
    }

    /// When the next scheduled attempt is due
    pub fn deadline(&self) -> Option<Instant> {
        self.target.as_ref().and(self.next_attempt)
    }

    /// Called when the scheduled attempt fires
    pub fn take_due(&mut self) {
        self.next_attempt = None;
    }

    /// Target found: nothing left to do
    pub fn hit(&mut self) -> Option<SpanId> {
        self.next_attempt = None;
        self.target.take()
    }

    /// Target not found; schedules a retry, or abandons when out of budget
    ///
    /// Returns whether a retry was scheduled.
    pub fn miss(&mut self, now: Instant) -> bool {
        if self.target.is_none() {
            return false;
        }
        if self.retries_left == 0 {
            self.cancel();
            return false;
        }
        self.retries_left -= 1;
        self.next_attempt = Some(now + self.settings.retry_interval());
        true
    }
}
