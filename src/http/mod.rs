//! HTTP middleware adapter for admission control.

mod middleware;

pub use middleware::{guard, AdmissionState, FALLBACK_CLIENT};
