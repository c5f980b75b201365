use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::ConnectInfo;
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppError;
use crate::helpers::auth::bearer_token;
use crate::helpers::rate_limit::client_ip;
use crate::models::user::{Role, User};
use crate::services::auth_service::{AuthService, LoginContext, TokenPair};

pub fn router(auth_service: Arc<AuthService>) -> Router {
    Router::new()
        .route("/api/v1/auth/register", post(register))
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/auth/refresh", post(refresh))
        .route("/api/v1/auth/validate", get(validate))
        .route("/api/v1/auth/logout", post(logout))
        .route_layer(Extension(auth_service))
}

/// Public view of a user. The password hash never leaves the service.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub role: Role,
    pub is_active: bool,
    pub email_verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            role: user.role,
            is_active: user.is_active,
            email_verified: user.email_verified,
            created_at: user.created_at,
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub username: String,
}

#[derive(Clone, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
}

impl From<TokenPair> for TokenResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "Bearer".to_string(),
        }
    }
}

fn record(metric: &'static str, succeeded: bool) {
    let result = if succeeded { "success" } else { "failure" };
    metrics::counter!(metric, "result" => result).increment(1);
}

pub async fn register(
    Extension(auth_service): Extension<Arc<AuthService>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = payload?;
    let result = auth_service
        .register(&body.email, &body.password, &body.username)
        .await;
    record("auth_register_total", result.is_ok());

    let user = result?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "user": UserResponse::from(&user) })),
    )
        .into_response())
}

pub async fn login(
    Extension(auth_service): Extension<Arc<AuthService>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = payload?;
    let context = LoginContext {
        device_info: headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        ip_address: client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr)),
        remember_me: body.remember_me,
    };

    let result = auth_service
        .login(&body.email, &body.password, context)
        .await;
    record("auth_login_total", result.is_ok());

    let (pair, user) = result?;
    let tokens = TokenResponse::from(pair);
    Ok(Json(json!({
        "access_token": tokens.access_token,
        "refresh_token": tokens.refresh_token,
        "token_type": tokens.token_type,
        "user": UserResponse::from(&user),
    }))
    .into_response())
}

pub async fn refresh(
    Extension(auth_service): Extension<Arc<AuthService>>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, AppError> {
    let Json(body) = payload?;
    let result = auth_service.refresh(&body.refresh_token).await;
    record("auth_token_refresh_total", result.is_ok());
    Ok(Json(TokenResponse::from(result?)))
}

pub async fn validate(
    Extension(auth_service): Extension<Arc<AuthService>>,
    headers: HeaderMap,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        record("auth_token_validation_total", false);
        return invalid_token(AppError::unauthorized("missing or malformed authorization header"));
    };

    match auth_service.validate_token(token).await {
        Ok(user) => {
            record("auth_token_validation_total", true);
            Json(json!({ "valid": true, "user": UserResponse::from(&user) })).into_response()
        }
        Err(e) => {
            record("auth_token_validation_total", false);
            invalid_token(AppError::from(e))
        }
    }
}

fn invalid_token(error: AppError) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "valid": false,
            "error": error.code.as_str(),
            "message": error.message,
        })),
    )
        .into_response()
}

pub async fn logout(
    Extension(auth_service): Extension<Arc<AuthService>>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let token = bearer_token(&headers)
        .ok_or_else(|| AppError::unauthorized("missing or malformed authorization header"))?;
    auth_service.logout(token).await?;
    Ok(StatusCode::NO_CONTENT)
}
