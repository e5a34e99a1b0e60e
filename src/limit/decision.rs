//! Admission decision and limit policy types.

/// A fixed-window rate limit policy.
///
/// Each call site supplies its own policy; distinct endpoints may use
/// independent policies against the same store, or independent stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum requests admitted within one window
    pub max_requests: u32,
    /// Duration of the window in milliseconds
    pub window_ms: u64,
}

impl RateLimitConfig {
    /// Create a new rate limit policy.
    ///
    /// Values are taken as supplied. A `max_requests` of zero denies every
    /// request; a `window_ms` of zero makes every request start a fresh
    /// window. Neither is validated here.
    pub fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }
}

/// The outcome of an admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u32,
    /// Epoch milliseconds at which the current window expires
    pub reset_ms: i64,
    /// Seconds until the window resets, rounded up. Present only on denial.
    pub retry_after_secs: Option<u64>,
}

impl Decision {
    /// The window expiry as whole epoch seconds, as rendered into the
    /// `X-RateLimit-Reset` header.
    pub fn reset_secs(&self) -> i64 {
        self.reset_ms / 1000
    }
}
