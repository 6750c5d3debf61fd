//! Client IP helpers: normalization and header extraction.
//!
//! Pure functions, no I/O. IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`)
//! collapse to their IPv4 form so the blocklist and the middleware always
//! agree on the canonical key.

use axum::http::HeaderMap;

/// Strip an IPv4-in-IPv6 prefix wrapper; anything else passes through.
pub fn normalize_ip(ip: &str) -> &str {
    ip.strip_prefix("::ffff:").unwrap_or(ip)
}

/// Loopback addresses can never be blocked.
pub fn is_loopback(ip: &str) -> bool {
    ip == "127.0.0.1" || ip == "::1"
}

/// Resolve the caller's IP from proxy headers: first element of
/// `x-forwarded-for` if present, otherwise `x-real-ip`. Returns the
/// normalized address, or `None` when neither header yields one.
pub fn client_ip_from_headers(headers: &HeaderMap) -> Option<String> {
    let raw = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.trim().to_string())
        })?;

    if raw.is_empty() {
        return None;
    }
    Some(normalize_ip(&raw).to_string())
}
