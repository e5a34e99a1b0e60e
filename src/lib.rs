//! Floodgate - Request Admission Control
//!
//! This crate implements fixed-window, per-client rate limiting for HTTP
//! APIs. A [`limit::LimiterStore`] owns the per-client counting state and
//! answers admission decisions; an axum middleware ([`http::guard`]) consults
//! the store before invoking the downstream handler and translates the
//! decision into throttling headers and a 429 rejection.

pub mod config;
pub mod error;
pub mod http;
pub mod limit;
