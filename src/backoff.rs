use std::time::Duration;

/// Longest wait between two reconnect attempts
pub const MAX_DELAY: Duration = Duration::from_secs(30);

/// Attempts before the supervisor rests
pub const MAX_ATTEMPTS: u32 = 20;

/// Rest after `MAX_ATTEMPTS` failures
pub const COOLDOWN: Duration = Duration::from_secs(300);

/// What the reconnect loop should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStep {
    /// Wait `delay`, then make attempt number `attempt`
    Retry { attempt: u32, delay: Duration },
    /// Every attempt failed; wait this long before starting over
    Cooldown(Duration),
}

/// Exponential backoff with a ceiling and a cooldown
///
/// Attempt `n` waits `min(30, 2^n)` seconds. After [`MAX_ATTEMPTS`] failed
/// attempts the next step is a [`BackoffStep::Cooldown`] and the counter
/// starts over.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempt: u32,
    max_attempts: u32,
    ceiling: Duration,
    cooldown: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(MAX_ATTEMPTS, MAX_DELAY, COOLDOWN)
    }
}

impl Backoff {
    pub fn new(max_attempts: u32, ceiling: Duration, cooldown: Duration) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            ceiling,
            cooldown,
        }
    }

    /// Attempts made since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Advance to the next step
    pub fn next_step(&mut self) -> BackoffStep {
        if self.attempt >= self.max_attempts {
            self.attempt = 0;
            return BackoffStep::Cooldown(self.cooldown);
        }
        self.attempt += 1;
        BackoffStep::Retry {
            attempt: self.attempt,
            delay: self.delay_for(self.attempt),
        }
    }

    /// Delay before attempt `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.ceiling)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
