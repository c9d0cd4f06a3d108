use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

const HOUR: Duration = Duration::from_secs(3600);

/// Rate limit for early pulls requested by push nudges.
/// A nudge is granted only if the last granted nudge is at least `min_gap`
/// old and fewer than `hourly_cap` nudged pulls happened in the past hour.
/// Scheduled pulls are not tracked here.
pub struct PullThrottle {
    min_gap: Duration,
    hourly_cap: usize,
    granted: VecDeque<Instant>,
}

impl PullThrottle {
    pub fn new(min_gap: Duration, hourly_cap: u32) -> Self {
        Self {
            min_gap,
            hourly_cap: hourly_cap as usize,
            granted: VecDeque::new(),
        }
    }

    /// Try to consume one nudged pull. Returns true if within limits.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if let Some(last) = self.granted.back() {
            if now.saturating_duration_since(*last) < self.min_gap {
                return false;
            }
        }

        while self
            .granted
            .front()
            .is_some_and(|at| now.saturating_duration_since(*at) >= HOUR)
        {
            self.granted.pop_front();
        }
        if self.granted.len() >= self.hourly_cap {
            return false;
        }

        self.granted.push_back(now);
        true
    }

    pub fn used(&self) -> usize {
        self.granted.len()
    }
}
