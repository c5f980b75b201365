use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::user::{AuthError, Role};
use crate::services::jwt::{JwtManager, TokenKind};

/// Caller identity taken from a `Bearer` access token.
///
/// Needs an `Extension<Arc<JwtManager>>` on the route.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
    pub session_id: Uuid,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins act on anyone's data, everyone else only on their own.
    pub fn can_access(&self, owner: Uuid) -> bool {
        self.is_admin() || self.user_id == owner
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

pub fn authenticate(jwt: &JwtManager, headers: &HeaderMap) -> Result<AuthUser, AppError> {
    let token = bearer_token(headers)
        .ok_or_else(|| AppError::unauthorized("missing or malformed authorization header"))?;
    let claims = jwt
        .verify(token, TokenKind::Access)
        .map_err(AuthError::from)?;
    Ok(AuthUser {
        user_id: claims.user_id().map_err(AuthError::from)?,
        role: claims.role,
        session_id: claims.session_id().map_err(AuthError::from)?,
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let jwt = parts
            .extensions
            .get::<Arc<JwtManager>>()
            .cloned()
            .ok_or_else(|| AppError::internal("authentication is not configured for this route"))?;
        authenticate(&jwt, &parts.headers)
    }
}

/// An [`AuthUser`] holding the admin role. Anyone else gets 403.
#[derive(Clone, Debug)]
pub struct RequireAdmin(pub AuthUser);

#[async_trait]
impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(AppError::forbidden("admin access required"));
        }
        Ok(RequireAdmin(user))
    }
}
