use std::sync::Arc;

use axum::{
    extract::{Extension, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tracing::debug;

use shared_config::AppConfig;
use shared_models::auth::{TokenResponse, User};
use shared_models::error::AppError;
use shared_utils::jwt::validate_token as decode_token;

use crate::models::{AuthError, LoginRequest, RegisterRequest};
use crate::services::AuthService;

fn map_auth_error(e: AuthError) -> AppError {
    match e {
        AuthError::ValidationError(msg) => AppError::ValidationError(msg),
        AuthError::UsernameTaken | AuthError::EmailTaken | AuthError::PhoneTaken => {
            AppError::Conflict(e.to_string())
        }
        AuthError::InvalidCredentials | AuthError::TokenError(_) => AppError::Auth(e.to_string()),
        AuthError::AccountDisabled => AppError::Forbidden(e.to_string()),
        AuthError::UserNotFound => AppError::NotFound(e.to_string()),
        AuthError::Internal(msg) => AppError::Internal(msg),
        AuthError::DatabaseError(msg) => AppError::Database(msg),
    }
}

#[axum::debug_handler]
pub async fn register(
    State(state): State<Arc<AppConfig>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<Value>, AppError> {
    let service = AuthService::new(&state);
    let user = service.register(request).await.map_err(map_auth_error)?;

    Ok(Json(json!({
        "success": true,
        "user": user,
        "message": "Registration successful"
    })))
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<Arc<AppConfig>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<Value>, AppError> {
    let service = AuthService::new(&state);
    let session = service.login(request).await.map_err(map_auth_error)?;

    Ok(Json(json!({
        "success": true,
        "access_token": session.access_token,
        "token_type": session.token_type,
        "expires_in": session.expires_in,
        "user": session.user,
        "message": "Login successful"
    })))
}

#[axum::debug_handler]
pub async fn validate_token(
    State(state): State<Arc<AppConfig>>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<Json<TokenResponse>, AppError> {
    debug!("Validating token");

    let TypedHeader(auth) = auth
        .ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))?;
    let user = decode_token(auth.token(), &state.jwt_secret).map_err(AppError::Auth)?;

    Ok(Json(TokenResponse {
        valid: true,
        user_id: user.id,
        email: user.email,
        role: user.role,
    }))
}

/// Like `validate_token` but never fails; the answer is in `valid`.
#[axum::debug_handler]
pub async fn verify_token(
    State(state): State<Arc<AppConfig>>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
) -> Json<Value> {
    debug!("Verifying token");

    let valid = auth
        .map(|TypedHeader(auth)| decode_token(auth.token(), &state.jwt_secret).is_ok())
        .unwrap_or(false);

    Json(json!({ "valid": valid }))
}

#[axum::debug_handler]
pub async fn get_profile(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let user_id = user.user_id()?;
    debug!("Getting profile for user: {}", user_id);

    let service = AuthService::new(&state);
    let profile = service.get_profile(user_id).await.map_err(map_auth_error)?;

    if !profile.is_active {
        return Err(map_auth_error(AuthError::AccountDisabled));
    }

    Ok(Json(json!({
        "success": true,
        "user": profile
    })))
}
