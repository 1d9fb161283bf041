//! Restart backoff for a replica that closed on a fatal error

use rand::Rng;
use std::time::Duration;

use crate::config::ReplicaConfig;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        Self {
            base,
            max: max.max(base),
            current: base,
            attempt: 0,
        }
    }

    pub fn from_config(config: &ReplicaConfig) -> Self {
        Self::new(
            Duration::from_millis(config.reconnect_base_delay_ms),
            Duration::from_millis(config.reconnect_max_delay_ms),
        )
    }

    /// Delay before the next attempt: the current step plus up to 25% jitter,
    /// never above `max`. Doubles the step for the following call.
    pub fn next_delay(&mut self) -> Duration {
        let step = self.current;
        let jitter_ms = (step.as_millis() as u64 / 4).max(1);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));

        self.current = (self.current * 2).min(self.max);
        self.attempt = self.attempt.saturating_add(1);

        (step + jitter).min(self.max)
    }

    /// Call after a session that reached LIVE.
    pub fn reset(&mut self) {
        self.current = self.base;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
