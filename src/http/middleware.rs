//! Admission-control middleware.
//!
//! Bridges axum request/response objects to the [`LimiterStore`]: derives a
//! client key from proxy headers, asks the store for a decision, and either
//! rejects with a 429 JSON body or runs the inner handler and attaches usage
//! headers to its response.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::debug;

use crate::limit::{Decision, LimiterStore, RateLimitConfig};

/// Client key used when no identifying header is present.
pub const FALLBACK_CLIENT: &str = "unknown";

/// Header set by a trusted edge proxy carrying the real client IP.
const REAL_IP_HEADER: &str = "x-real-ip";
/// Standard comma-separated proxy chain header; the first entry is used.
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Shared state for one guarded call site.
///
/// Each call site pairs a store with its own [`RateLimitConfig`]; several
/// call sites may share one store (shared per-client budgets) or hold
/// independent stores (independent budgets).
#[derive(Clone)]
pub struct AdmissionState {
    store: Arc<LimiterStore>,
    config: RateLimitConfig,
}

impl AdmissionState {
    /// Create middleware state from a store and a limit policy.
    pub fn new(store: Arc<LimiterStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }
}

/// Admission-control middleware function.
///
/// Use with [`axum::middleware::from_fn_with_state`]:
///
/// ```ignore
/// let state = AdmissionState::new(store, RateLimitConfig::new(60, 60_000));
/// let app = Router::new()
///     .route("/api/submit", post(submit))
///     .route_layer(middleware::from_fn_with_state(state, floodgate::http::guard));
/// ```
///
/// Denied requests never reach the inner handler. Allowed requests pass
/// through with the handler's status and body untouched; only the usage
/// headers are added. Handler failures are not intercepted here.
pub async fn guard(
    State(state): State<AdmissionState>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_key(request.headers());
    let decision = state.store.decide(&client, &state.config);

    if !decision.allowed {
        debug!(client = %client, "Rejecting request over rate limit");
        return reject(&state.config, &decision);
    }

    let mut response = next.run(request).await;
    attach_usage_headers(response.headers_mut(), &state.config, &decision);
    response
}

/// Derive the rate-limiting key from request headers.
///
/// Priority: trusted edge `X-Real-IP`, then the first `X-Forwarded-For`
/// entry, then [`FALLBACK_CLIENT`]. Values are trimmed but not validated as
/// IP addresses; spoofing of the forwarded-for chain is a known limitation,
/// not hardened against.
fn client_key(headers: &HeaderMap) -> String {
    if let Some(real_ip) = header_str(headers, REAL_IP_HEADER) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    if let Some(forwarded) = header_str(headers, FORWARDED_FOR_HEADER) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    FALLBACK_CLIENT.to_string()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// JSON body returned with a 429 rejection.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RejectionBody {
    success: bool,
    error: &'static str,
    message: String,
    retry_after: u64,
}

/// Build the 429 rejection response for a denied decision.
fn reject(config: &RateLimitConfig, decision: &Decision) -> Response {
    let retry_after = decision.retry_after_secs.unwrap_or(0);
    let body = RejectionBody {
        success: false,
        error: "Too many requests",
        message: format!(
            "Rate limit exceeded. Please try again in {} seconds.",
            retry_after
        ),
        retry_after,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    attach_usage_headers(response.headers_mut(), config, decision);
    response
}

/// Attach `X-RateLimit-*` headers, plus `Retry-After` on denial.
fn attach_usage_headers(headers: &mut HeaderMap, config: &RateLimitConfig, decision: &Decision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(config.max_requests));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_secs()));
    if let Some(retry_after) = decision.retry_after_secs {
        headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        routing::{get, post},
        Router,
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::try_from(*name).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn real_ip_header_takes_precedence() {
        let map = headers(&[
            ("x-real-ip", "10.0.0.1"),
            ("x-forwarded-for", "203.0.113.9, 10.0.0.2"),
        ]);
        assert_eq!(client_key(&map), "10.0.0.1");
    }

    #[test]
    fn forwarded_for_uses_first_entry_trimmed() {
        let map = headers(&[("x-forwarded-for", " 203.0.113.9 , 10.0.0.2, 10.0.0.3")]);
        assert_eq!(client_key(&map), "203.0.113.9");
    }

    #[test]
    fn empty_headers_fall_back_to_literal_key() {
        assert_eq!(client_key(&HeaderMap::new()), FALLBACK_CLIENT);

        let blank = headers(&[("x-real-ip", "  "), ("x-forwarded-for", " ,10.0.0.2")]);
        assert_eq!(client_key(&blank), FALLBACK_CLIENT);
    }

    fn guarded_app(config: RateLimitConfig) -> Router {
        let state = AdmissionState::new(Arc::new(LimiterStore::with_sweep_probability(0.0)), config);
        Router::new()
            .route("/", get(|| async { "ok" }))
            .route(
                "/teapot",
                post(|| async { (StatusCode::IM_A_TEAPOT, "short and stout") }),
            )
            .route_layer(axum::middleware::from_fn_with_state(state, guard))
    }

    fn request(client: &str) -> Request {
        Request::builder()
            .uri("/")
            .header("x-real-ip", client)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn allowed_response_carries_usage_headers() {
        let app = guarded_app(RateLimitConfig::new(3, 60_000));

        let response = app.oneshot(request("1.2.3.4")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "3");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "2");
        assert!(response.headers().contains_key("x-ratelimit-reset"));
        assert!(!response.headers().contains_key(header::RETRY_AFTER));
    }

    #[tokio::test]
    async fn denial_returns_429_with_retry_after_and_json_body() {
        let app = guarded_app(RateLimitConfig::new(1, 60_000));

        let first = app.clone().oneshot(request("1.2.3.4")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let denied = app.oneshot(request("1.2.3.4")).await.unwrap();
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            denied.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        assert_eq!(denied.headers()["x-ratelimit-remaining"], "0");

        let retry_after: u64 = denied.headers()[header::RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry_after > 0);

        let bytes = denied.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Too many requests");
        assert_eq!(body["retryAfter"], retry_after);
        assert_eq!(
            body["message"],
            format!(
                "Rate limit exceeded. Please try again in {} seconds.",
                retry_after
            )
        );
    }

    #[tokio::test]
    async fn handler_status_and_body_pass_through_unmodified() {
        let app = guarded_app(RateLimitConfig::new(5, 60_000));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/teapot")
                    .header("x-real-ip", "1.2.3.4")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "4");

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"short and stout");
    }

    #[tokio::test]
    async fn distinct_clients_do_not_share_a_budget() {
        let app = guarded_app(RateLimitConfig::new(1, 60_000));

        let first = app.clone().oneshot(request("1.2.3.4")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let other = app.oneshot(request("5.6.7.8")).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
        assert_eq!(other.headers()["x-ratelimit-remaining"], "0");
    }
}
