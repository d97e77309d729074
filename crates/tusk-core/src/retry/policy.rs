use std::time::Duration;

/// Delay before each attempt, in milliseconds: the first attempt goes out at
/// once, then the request is retried after 3, 5, 10 and 20 seconds.
pub const DEFAULT_RETRY_DELAYS_MS: [u64; 5] = [0, 3000, 5000, 10000, 20000];

/// High-level classification of an error for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation timed out (connect/read/low-speed).
    Timeout,
    /// Server asked us to slow down (429, 503).
    Throttled,
    /// Network-level failure (connection reset, DNS, short write, etc.).
    Connection,
    /// Any other non-2xx status.
    Http(u16),
    /// Protocol violation, local I/O failure or abort (never retried).
    Other,
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Fixed backoff table (not exponential).
///
/// `delays[n]` is the wait before attempt `n` (0-based), so a request gets at
/// most `delays.len()` attempts in total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_millis(&DEFAULT_RETRY_DELAYS_MS)
    }
}

impl RetryPolicy {
    pub fn from_millis(delays_ms: &[u64]) -> Self {
        Self {
            delays: delays_ms.iter().map(|&ms| Duration::from_millis(ms)).collect(),
        }
    }

    /// Every attempt goes out immediately; `attempts` total.
    pub fn immediate(attempts: usize) -> Self {
        Self {
            delays: vec![Duration::ZERO; attempts.max(1)],
        }
    }

    /// Total attempts including the first. An empty table still allows one.
    pub fn max_attempts(&self) -> u32 {
        self.delays.len().max(1) as u32
    }

    /// Wait before the first attempt.
    pub fn initial_delay(&self) -> Duration {
        self.delays.first().copied().unwrap_or_default()
    }

    /// Decide whether to retry after attempt `attempt` (1-based) failed with `kind`.
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if kind == ErrorKind::Other {
            return RetryDecision::NoRetry;
        }
        match self.delays.get(attempt as usize) {
            Some(&delay) => RetryDecision::RetryAfter(delay),
            None => RetryDecision::NoRetry,
        }
    }
}
