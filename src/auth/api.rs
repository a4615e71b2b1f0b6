//! Auth HTTP handlers (C6): register/login/logoff/users, grounded on the
//! teacher's `login`/`list_users` handler shapes, with all Privy/token-gate
//! code dropped (teacher-specific, out of scope here) and JWT issuance
//! replaced by the opaque `TokenIssuer`.

use axum::{extract::State, Extension, Json};
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::middleware::verify_and_authorize;
use crate::auth::models::{
    Identity, LoginRequest, LoginResponse, MessageResponse, RegisterRequest, UserResponse, UserRole,
};
use crate::error::{GatewayError, GatewayResult};
use crate::state::AppState;

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> GatewayResult<(axum::http::StatusCode, Json<MessageResponse>)> {
    if state
        .user_store
        .get_user_by_username(&payload.username)
        .map_err(|e| GatewayError::internal(e.to_string()))?
        .is_some()
    {
        return Err(GatewayError::UsernameTaken);
    }

    state
        .user_store
        .create_user(&payload.username, &payload.password, UserRole::User)
        .map_err(|e| GatewayError::internal(e.to_string()))?;

    info!(username = %payload.username, "registered new user");

    Ok((
        axum::http::StatusCode::CREATED,
        Json(MessageResponse {
            message: "registered".to_string(),
        }),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> GatewayResult<Json<LoginResponse>> {
    let valid = state
        .user_store
        .verify_password(&payload.username, &payload.password)
        .map_err(|e| GatewayError::internal(e.to_string()))?;

    if !valid {
        warn!(username = %payload.username, "failed login attempt");
        return Err(GatewayError::InvalidCredentials);
    }

    let user = state
        .user_store
        .get_user_by_username(&payload.username)
        .map_err(|e| GatewayError::internal(e.to_string()))?
        .ok_or(GatewayError::InvalidCredentials)?;

    let (access_token, _token_id, _expires_at) = state.token_issuer.issue(&user.username, user.role);

    info!(username = %user.username, role = user.role.as_str(), "login succeeded");

    Ok(Json(LoginResponse {
        access_token,
        token_type: "bearer".to_string(),
    }))
}

pub async fn logoff(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    headers: axum::http::HeaderMap,
) -> GatewayResult<Json<MessageResponse>> {
    let token = headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or(GatewayError::MissingToken)?;

    let verified = state
        .token_issuer
        .verify(token)
        .map_err(|_| GatewayError::InvalidToken)?;

    state
        .user_store
        .revoke_token(&verified.token_id, verified.expires_at)
        .map_err(|e| GatewayError::internal(e.to_string()))?;

    info!(username = %identity.username, "token revoked via logoff");

    Ok(Json(MessageResponse {
        message: "logged off".to_string(),
    }))
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> GatewayResult<Json<Vec<UserResponse>>> {
    if identity.role != UserRole::Admin {
        return Err(GatewayError::Forbidden);
    }

    let users = state
        .user_store
        .list_users()
        .map_err(|e| GatewayError::internal(e.to_string()))?;

    Ok(Json(users.into_iter().map(UserResponse::from_user).collect()))
}

/// Used directly by the `/ws` upgrade handler, which authenticates its own
/// `?token=` query parameter rather than going through
/// `axum::middleware::from_fn_with_state`.
pub async fn authorize_ws_token(state: &AppState, token: &str) -> GatewayResult<Identity> {
    verify_and_authorize(state, token).await
}
