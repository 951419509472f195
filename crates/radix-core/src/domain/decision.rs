use serde::Serialize;

/// Outcome of a single rate limit check. Computed per request, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u64,
    pub retry_after_seconds: u64,
}

impl Decision {
    /// Decision used when the counter store could not answer.
    pub fn fail_open(limit: u64) -> Self {
        Self {
            allowed: true,
            remaining: limit,
            retry_after_seconds: 0,
        }
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_seconds = seconds;
        self
    }
}
