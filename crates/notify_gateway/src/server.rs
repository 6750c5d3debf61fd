//! HTTP surface: application state, router, and handlers.
//!
//! Routes:
//! - GET    /events    - SSE push transport (see `sse`)
//! - POST   /broadcast - Publish an event to connected clients
//! - GET    /block     - List blocked IPs, or check one (?ip=...)
//! - POST   /block     - Block an IP for 10 minutes
//! - DELETE /block     - Unblock (?ip=...)
//! - PATCH  /block     - Extend an existing block
//! - GET    /block/me  - Check the caller's own block status
//! - GET    /blocked   - Notice page shown to blocked clients
//! - GET    /health    - Health check

use crate::blocklist::{BlockStore, DEFAULT_BLOCK_MINUTES};
use crate::dispatch::Dispatcher;
use crate::gate::{access_gate, ClientIp};
use crate::ip::{client_ip_from_headers, normalize_ip};
use crate::protocol::{
    BlockCheckResponse, BlockRequest, BlockedListResponse, BroadcastRequest, BroadcastResponse,
    ExtendRequest, StatusResponse,
};
use crate::registry::ConnectionRegistry;
use crate::sse::events_handler;
use axum::extract::{Query, State};
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state. One registry per running server; everything is
/// constructor-injected, nothing global.
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub blocklist: Arc<BlockStore>,
}

impl AppState {
    pub fn new(blocklist: Arc<BlockStore>) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone()));
        Arc::new(Self {
            registry,
            dispatcher,
            blocklist,
        })
    }
}

/// Create the HTTP router with the access gate in front of every route.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/events", get(events_handler))
        .route("/broadcast", post(broadcast_handler))
        .route(
            "/block",
            get(block_query_handler)
                .post(block_handler)
                .delete(unblock_handler)
                .patch(extend_handler),
        )
        .route("/block/me", get(block_me_handler))
        .route("/blocked", get(blocked_page_handler))
        .route("/health", get(health_handler))
        .layer(middleware::from_fn_with_state(state.clone(), access_gate))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn no_store() -> [(HeaderName, &'static str); 1] {
    [(header::CACHE_CONTROL, "no-store, no-cache, must-revalidate")]
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        connections: state.registry.connection_count(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    connections: usize,
}

/// POST /broadcast - publish an event to all (or role-filtered) connections.
async fn broadcast_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BroadcastRequest>,
) -> Result<Json<BroadcastResponse>, ApiError> {
    if request.event_type.is_empty() {
        return Err(ApiError::BadRequest("Missing event type".to_string()));
    }

    let sent = state.dispatcher.publish(
        &request.event_type,
        request.data,
        request.target_roles.as_deref(),
    );

    Ok(Json(BroadcastResponse {
        success: true,
        sent,
        message: format!("Broadcasted to {} connections", sent),
    }))
}

#[derive(Debug, Deserialize)]
struct IpQuery {
    ip: Option<String>,
}

/// GET /block - list all blocked IPs (no query) or check a single IP.
async fn block_query_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IpQuery>,
) -> Response {
    match query.ip {
        None => Json(BlockedListResponse {
            success: true,
            blocked: state.blocklist.list(),
        })
        .into_response(),
        Some(ip) => {
            let normalized = normalize_ip(&ip).to_string();
            let blocked = state.blocklist.is_blocked(&normalized);
            (
                no_store(),
                Json(BlockCheckResponse {
                    blocked,
                    ip: Some(normalized),
                }),
            )
                .into_response()
        }
    }
}

/// POST /block - block an IP for 10 minutes. Triggers the block observers
/// (order cancellation cascade) on success.
async fn block_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BlockRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let ip = request
        .ip
        .ok_or_else(|| ApiError::BadRequest("Missing ip".to_string()))?;

    if !state.blocklist.block(&ip, DEFAULT_BLOCK_MINUTES) {
        return Err(ApiError::BadRequest("Cannot block this IP".to_string()));
    }

    Ok(Json(StatusResponse {
        success: true,
        message: "IP blocked for 10 minutes".to_string(),
    }))
}

/// DELETE /block?ip=... - unblock an IP.
async fn unblock_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IpQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let ip = query
        .ip
        .ok_or_else(|| ApiError::BadRequest("Missing ip".to_string()))?;

    let removed = state.blocklist.unblock(&ip);
    Ok(Json(StatusResponse {
        success: removed,
        message: if removed {
            "IP unblocked".to_string()
        } else {
            "IP not in block list".to_string()
        },
    }))
}

/// PATCH /block - extend an existing block.
async fn extend_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExtendRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let ip = request
        .ip
        .ok_or_else(|| ApiError::BadRequest("Missing ip".to_string()))?;
    let minutes = request.minutes.unwrap_or(DEFAULT_BLOCK_MINUTES);

    if !state.blocklist.extend(&ip, minutes) {
        return Err(ApiError::BadRequest("IP not in block list".to_string()));
    }

    Ok(Json(StatusResponse {
        success: true,
        message: format!("Block extended by {} minutes", minutes),
    }))
}

/// GET /block/me - report the caller's own block status, resolved from the
/// gate's normalized IP (headers as fallback when the gate is not layered).
/// Polled by the notice page, so never cached.
async fn block_me_handler(
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let ip = client_ip
        .and_then(|Extension(ClientIp(ip))| ip)
        .or_else(|| client_ip_from_headers(&headers));

    let response = match ip {
        None => BlockCheckResponse {
            blocked: false,
            ip: None,
        },
        Some(ip) => BlockCheckResponse {
            blocked: state.blocklist.is_blocked(&ip),
            ip: Some(ip),
        },
    };
    (no_store(), Json(response))
}

/// GET /blocked - notice page. Polls the self-check endpoint and sends the
/// client back once the block has expired or been lifted.
async fn blocked_page_handler() -> impl IntoResponse {
    (no_store(), Html(BLOCKED_PAGE))
}

const BLOCKED_PAGE: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Access temporarily blocked</title>
</head>
<body>
  <h1>Access temporarily blocked</h1>
  <p>Your address has been blocked by staff. Please wait; this page will
  refresh automatically once the block is lifted.</p>
  <script>
    setInterval(async () => {
      try {
        const res = await fetch('/block/me', { cache: 'no-store' });
        const data = await res.json();
        if (!data.blocked) window.location.replace('/');
      } catch (e) {}
    }, 5000);
  </script>
</body>
</html>
"#;

// ============================================================================
// Error Handling
// ============================================================================

/// HTTP-facing errors.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        (status, Json(ErrorResponse {
            success: false,
            error: message,
        }))
            .into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}
