//! Progress event throttling.

use std::time::Duration;
use tokio::time::Instant;

/// Decides when a transfer publishes a progress event
///
/// An event is due when the integer percentage changed or when `interval` has
/// elapsed since the previous event. The first report always emits.
#[derive(Debug)]
pub(crate) struct ProgressThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
    last_percent: Option<u8>,
}

impl ProgressThrottle {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            last_percent: None,
        }
    }

    /// Returns true (and records the emission) if an event should go out now
    pub(crate) fn should_emit(&mut self, percent: u8, now: Instant) -> bool {
        let elapsed = self
            .last_emit
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval);
        let changed = self.last_percent != Some(percent);

        if elapsed || changed {
            self.last_emit = Some(now);
            self.last_percent = Some(percent);
            true
        } else {
            false
        }
    }
}
