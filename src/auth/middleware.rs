//! Authentication Middleware
//! Mission: Run the gates in front of protected routes

use crate::auth::gate::{authorize, AuthGate, Authenticated, Decision};
use crate::auth::models::{Identity, UserRole};
use crate::error::AuthError;
use crate::middleware::client_ip;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Reject the request unless it carries a valid, unrevoked token for an
/// existing user. A session established earlier in the pipeline is reused.
pub async fn require_auth(
    State(gate): State<Arc<AuthGate>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    if req.extensions().get::<Authenticated>().is_some() {
        return Ok(next.run(req).await);
    }
    if let Some(GateRejection(err)) = req.extensions_mut().remove::<GateRejection>() {
        return Err(err);
    }

    let source = client_ip(req.extensions());
    let header = authorization_header(&req);
    let session = gate.authenticate(header.as_deref(), source).await?;

    attach(&mut req, session);
    Ok(next.run(req).await)
}

/// Identify the caller if a token is present, but never reject. Used ahead
/// of identity-keyed quotas. A failed check is remembered so a later
/// `require_auth` reports it without running the gate again.
pub async fn optional_auth(
    State(gate): State<Arc<AuthGate>>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Some(header) = authorization_header(&req) {
        let source = client_ip(req.extensions());
        match gate.authenticate(Some(&header), source).await {
            Ok(session) => attach(&mut req, session),
            Err(err) => {
                req.extensions_mut().insert(GateRejection(err));
            }
        }
    }

    next.run(req).await
}

/// Admin-only routes. Must be layered inside `require_auth`.
pub async fn require_admin(req: Request, next: Next) -> Result<Response, AuthError> {
    match authorize(req.extensions().get::<Identity>(), UserRole::Admin) {
        Decision::Allow => Ok(next.run(req).await),
        Decision::Deny => Err(AuthError::Forbidden),
    }
}

/// A presented token that `optional_auth` already rejected.
#[derive(Clone)]
struct GateRejection(AuthError);

fn attach(req: &mut Request, session: Authenticated) {
    req.extensions_mut().insert(session.identity);
    req.extensions_mut().insert(session);
}

fn authorization_header(req: &Request) -> Option<String> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(str::to_owned)
}

/// Handlers take `Identity` as an argument; without a gate in front of them
/// the extraction fails closed.
#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .copied()
            .ok_or(AuthError::MissingToken)
    }
}
