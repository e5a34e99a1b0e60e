//! Per-client fixed-window counter store.

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::decision::{Decision, RateLimitConfig};

/// Fraction of decisions that trigger a sweep of expired entries.
const DEFAULT_SWEEP_PROBABILITY: f64 = 0.1;

/// State tracked for one client within its current window.
#[derive(Debug)]
struct ClientWindow {
    /// Requests counted in the current window
    count: u32,
    /// Epoch milliseconds at which the window expires
    window_end_ms: i64,
}

/// The core admission-control store.
///
/// Keeps one fixed-window counter per client identifier and answers
/// "is this client allowed to proceed right now?". The window is fixed,
/// not sliding: a burst straddling a window boundary can admit up to
/// `2 * max_requests` requests across the boundary. That is a deliberate
/// simplicity/accuracy trade-off.
///
/// The store is thread-safe and can be shared across tasks. The
/// read-check-increment in [`decide`](Self::decide) is atomic per client
/// key, so two concurrent requests from the same client cannot both slip
/// under the limit.
///
/// State is in-memory only; a process restart clears all counters.
pub struct LimiterStore {
    /// Client windows indexed by client identifier
    clients: DashMap<String, ClientWindow>,
    /// Chance that a decision also sweeps expired entries
    sweep_probability: f64,
}

impl LimiterStore {
    /// Create a new store with the default sweep probability.
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            sweep_probability: DEFAULT_SWEEP_PROBABILITY,
        }
    }

    /// Create a store with a specific sweep probability.
    ///
    /// Useful for tests (0.0 disables the sweep, 1.0 sweeps on every
    /// decision) or for tuning the amortized cleanup cost.
    pub fn with_sweep_probability(sweep_probability: f64) -> Self {
        Self {
            clients: DashMap::new(),
            sweep_probability,
        }
    }

    /// Decide whether a request from `client_id` is admitted under `config`.
    ///
    /// Creates the client's window on first sight, resets it in place once
    /// it has expired, and otherwise counts against it. Denials never push
    /// the count past `max_requests`.
    pub fn decide(&self, client_id: &str, config: &RateLimitConfig) -> Decision {
        self.decide_at(client_id, config, Utc::now().timestamp_millis())
    }

    /// Clocked decision core, separated so tests can drive time directly.
    fn decide_at(&self, client_id: &str, config: &RateLimitConfig, now_ms: i64) -> Decision {
        let decision = {
            // The entry guard holds the shard lock for the whole
            // read-check-increment sequence.
            let mut entry = self
                .clients
                .entry(client_id.to_string())
                .or_insert_with(|| {
                    debug!(client = %client_id, "Tracking new client");
                    ClientWindow {
                        count: 0,
                        window_end_ms: now_ms + config.window_ms as i64,
                    }
                });

            if entry.window_end_ms <= now_ms {
                entry.count = 0;
                entry.window_end_ms = now_ms + config.window_ms as i64;
            }

            if entry.count < config.max_requests {
                entry.count += 1;
                Decision {
                    allowed: true,
                    remaining: config.max_requests - entry.count,
                    reset_ms: entry.window_end_ms,
                    retry_after_secs: None,
                }
            } else {
                let until_reset_ms = (entry.window_end_ms - now_ms).max(0);
                Decision {
                    allowed: false,
                    remaining: 0,
                    reset_ms: entry.window_end_ms,
                    retry_after_secs: Some((until_reset_ms as u64).div_ceil(1000)),
                }
            }
        };

        trace!(
            client = %client_id,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "Admission decision"
        );

        if rand::random::<f64>() < self.sweep_probability {
            self.sweep(now_ms);
        }

        decision
    }

    /// Drop every entry whose window has expired.
    ///
    /// Best effort: entries that are never swept are still replaced on next
    /// use, so this only bounds memory growth from clients that go quiet.
    fn sweep(&self, now_ms: i64) {
        let before = self.clients.len();
        self.clients.retain(|_, window| window.window_end_ms > now_ms);
        let removed = before.saturating_sub(self.clients.len());
        if removed > 0 {
            debug!(
                removed = removed,
                tracked = self.clients.len(),
                "Swept expired client windows"
            );
        }
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    /// Drop all tracked state.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.clients.clear();
    }
}

impl Default for LimiterStore {
    fn default() -> Self {
        Self::new()
    }
}
