//! Request interceptor: runs before every route.
//!
//! Normalizes the caller's IP, attaches it to the request, and redirects
//! blocked callers to the notice page. The block-check endpoints and the
//! notice page itself always pass through, so a blocked client can still
//! learn that it is blocked and the redirect cannot loop.
//!
//! Enforcement is availability-first: any failure while checking the block
//! state lets the request through.

use crate::ip::{client_ip_from_headers, is_loopback};
use crate::server::AppState;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use metrics::counter;
use std::sync::Arc;
use tracing::debug;

/// Normalized caller IP, attached to every request as an extension so
/// downstream handlers and the gate's self-check agree on one value.
#[derive(Debug, Clone)]
pub struct ClientIp(pub Option<String>);

/// Gate middleware. Layered in front of all application routes.
pub async fn access_gate(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let ip = client_ip_from_headers(request.headers());

    // Re-inject the normalized IP so handlers reading headers see the same
    // canonical value the gate used.
    if let Some(ip) = &ip {
        if let Ok(value) = HeaderValue::from_str(ip) {
            request.headers_mut().insert("x-real-ip", value);
        }
    }
    request.extensions_mut().insert(ClientIp(ip.clone()));

    // The notice page and the block API are exempt from the block decision.
    let path = request.uri().path();
    if path == "/blocked" || path.starts_with("/block") {
        return next.run(request).await;
    }

    if let Some(ip) = ip {
        if !is_loopback(&ip) && state.blocklist.is_blocked(&ip) {
            debug!("Redirecting blocked {} away from {}", ip, path);
            counter!("notify_gate_redirects_total").increment(1);

            let mut response = Redirect::temporary("/blocked").into_response();
            response.headers_mut().insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-store, no-cache, must-revalidate"),
            );
            return response;
        }
    }

    next.run(request).await
}
