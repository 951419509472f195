//! Client identity helpers shared by the guards.

use actix_web::{HttpMessage, HttpRequest};

use radix_core::network::{ClientIp, ClientIpResolver};

pub const FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";

/// Identity an upstream middleware (e.g. session auth) may attach to the request.
///
/// When present, throttles count hits against it instead of the client IP,
/// so one user behind a shared address gets their own quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSubject(pub String);

/// Resolve the caller's IP once per request and cache it in request extensions.
pub fn client_ip(req: &HttpRequest, resolver: &ClientIpResolver) -> ClientIp {
    if let Some(ip) = req.extensions().get::<ClientIp>() {
        return *ip;
    }

    let peer = req.peer_addr().map(|addr| addr.ip().to_string());
    let forwarded_for = req
        .headers()
        .get(FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok());

    let ip = resolver.resolve(peer.as_deref(), forwarded_for);
    req.extensions_mut().insert(ip);
    ip
}

/// Identifier used in rate limit keys: the attached subject, else the client IP.
pub fn rate_limit_subject(req: &HttpRequest, resolver: &ClientIpResolver) -> String {
    if let Some(subject) = req.extensions().get::<RateLimitSubject>() {
        return subject.0.clone();
    }
    client_ip(req, resolver).to_string()
}
