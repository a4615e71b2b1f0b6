//! Bearer-token auth middleware (C6), grounded on the teacher's
//! `auth_middleware`'s dual token-source extraction (query param for `/ws`,
//! `Authorization` header for REST), adapted to verify an opaque signed
//! token plus a revocation-table lookup instead of decoding a JWT.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::auth::models::Identity;
use crate::auth::token::TokenError;
use crate::error::GatewayError;
use crate::state::AppState;

fn token_from_request(req: &Request) -> Option<String> {
    let from_query = req.uri().query().and_then(|query| {
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("token=").map(|t| t.to_string()))
    });

    let from_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t.to_string());

    from_query.or(from_header)
}

/// Verifies the bearer token, checks the revocation table, and inserts the
/// resolved [`Identity`] into the request's extensions for handlers to read.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let token = token_from_request(&req).ok_or(GatewayError::MissingToken)?;
    let identity = verify_and_authorize(&state, &token).await?;
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// Shared by the HTTP middleware and the `/ws` handshake handler, which
/// authenticates the token query parameter itself rather than through
/// `axum::middleware::from_fn_with_state`.
pub async fn verify_and_authorize(
    state: &AppState,
    token: &str,
) -> Result<Identity, GatewayError> {
    let verified = state.token_issuer.verify(token).map_err(|e| match e {
        TokenError::Expired => GatewayError::InvalidToken,
        TokenError::BadSignature | TokenError::Malformed => GatewayError::InvalidToken,
    })?;

    let revoked = state
        .user_store
        .is_token_revoked(&verified.token_id)
        .map_err(|e| GatewayError::internal(e.to_string()))?;
    if revoked {
        return Err(GatewayError::RevokedToken);
    }

    Ok(verified.identity)
}

pub fn extract_identity(req: &Request) -> Option<&Identity> {
    req.extensions().get::<Identity>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest};

    #[test]
    fn token_from_request_prefers_query_over_header() {
        let req = HttpRequest::builder()
            .uri("/ws?token=abc")
            .header("Authorization", "Bearer xyz")
            .body(Body::empty())
            .unwrap();
        assert_eq!(token_from_request(&req), Some("abc".to_string()));
    }

    #[test]
    fn token_from_request_falls_back_to_header() {
        let req = HttpRequest::builder()
            .uri("/orders")
            .header("Authorization", "Bearer xyz")
            .body(Body::empty())
            .unwrap();
        assert_eq!(token_from_request(&req), Some("xyz".to_string()));
    }

    #[test]
    fn token_from_request_none_when_absent() {
        let req = HttpRequest::builder().uri("/exchanges").body(Body::empty()).unwrap();
        assert_eq!(token_from_request(&req), None);
    }

    #[test]
    fn extract_identity_reads_inserted_extension() {
        let mut req = HttpRequest::new(Body::empty());
        assert!(extract_identity(&req).is_none());

        req.extensions_mut().insert(Identity {
            username: "alice".to_string(),
            role: crate::auth::models::UserRole::User,
        });
        assert_eq!(extract_identity(&req).unwrap().username, "alice");
    }
}
