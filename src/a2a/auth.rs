//! Bearer credentials.
//!
//! Inbound: the middleware parses `Authorization: Bearer <token>` once at
//! request entry and stores the token in that request's extensions. Handlers
//! take it from there and hand it explicitly to the delegation they start,
//! so a token never outlives or crosses into another request.
//!
//! - missing or malformed header → 401
//! - well-formed but wrong token → 403

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Paths served without credentials.
const PUBLIC_PATHS: &[&str] = &["/ping", "/.well-known/agent-card.json"];

/// An opaque bearer token. Wiped on drop, redacted in `Debug`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Parse an `Authorization` header value. The scheme is case-insensitive.
    pub fn from_header(value: &str) -> Option<Self> {
        let (scheme, token) = value.trim().split_once(' ')?;
        let token = token.trim();
        if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() || token.contains(' ') {
            return None;
        }
        Some(Self(token.to_string()))
    }

    pub fn secret(&self) -> &str {
        &self.0
    }

    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.0)
    }

    /// Constant-time comparison.
    pub fn matches(&self, other: &BearerToken) -> bool {
        constant_time_eq(self.0.as_bytes(), other.0.as_bytes())
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

/// Server-side auth settings shared by both roles.
#[derive(Debug, Clone, Default)]
pub struct AuthState {
    /// When set, inbound tokens must equal this one. When unset, any
    /// well-formed bearer token is accepted and passed along.
    expected: Option<Arc<BearerToken>>,
}

impl AuthState {
    pub fn new(expected: Option<BearerToken>) -> Self {
        if expected.is_none() {
            tracing::warn!("No auth token configured — accepting any well-formed bearer token");
        }
        Self {
            expected: expected.map(Arc::new),
        }
    }

    pub fn check(&self, header_value: Option<&str>) -> Result<BearerToken, StatusCode> {
        let token = header_value
            .and_then(BearerToken::from_header)
            .ok_or(StatusCode::UNAUTHORIZED)?;

        match &self.expected {
            Some(expected) if !expected.matches(&token) => Err(StatusCode::FORBIDDEN),
            _ => Ok(token),
        }
    }
}

/// axum middleware enforcing bearer auth on every non-public path.
pub async fn require_bearer(
    State(auth): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = request.uri().path();
    if PUBLIC_PATHS.iter().any(|p| path == *p) {
        return Ok(next.run(request).await);
    }

    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth.check(header_value) {
        Ok(token) => {
            request.extensions_mut().insert(token);
            Ok(next.run(request).await)
        }
        Err(status) => {
            tracing::warn!(%path, status = status.as_u16(), "A2A: rejected request credentials");
            Err(status)
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
