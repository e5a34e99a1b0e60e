//! Rate limiting state and decision logic.

mod decision;
mod store;

pub use decision::{Decision, RateLimitConfig};
pub use store::LimiterStore;
