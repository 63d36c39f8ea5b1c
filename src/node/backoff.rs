use std::time::Duration;

/// Base delay (ms) for the exponential backoff on reconnect.
pub const BACKOFF_BASE_MS: u64 = 1_000;

/// Delays stop doubling after this many attempts.
const BACKOFF_MAX_DOUBLINGS: u32 = 3;

pub(crate) struct Backoff {
    attempt: u32,
    max_attempts: u32,
}

impl Backoff {
    /// `max_attempts == 0` retries forever.
    pub(crate) fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
        }
    }

    pub(crate) fn next(&mut self) -> Duration {
        self.attempt += 1;
        let delay = BACKOFF_BASE_MS * 2u64.pow((self.attempt - 1).min(BACKOFF_MAX_DOUBLINGS));
        Duration::from_millis(delay)
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.max_attempts != 0 && self.attempt >= self.max_attempts
    }

    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }
}
