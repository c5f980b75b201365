use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::models::restaurant::RestaurantError;
use crate::models::scraping_job::SpiderError;
use crate::models::user::AuthError;
use crate::services::places_client::MapError;

/// Stable error codes shared by every service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InternalError,
    InvalidRequest,
    NotFound,
    Unauthorized,
    Forbidden,
    Conflict,
    InvalidCredentials,
    TokenExpired,
    TokenInvalid,
    RateLimitExceeded,
    ServiceUnavailable,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Unauthorized
            | ErrorCode::InvalidCredentials
            | ErrorCode::TokenExpired
            | ErrorCode::TokenInvalid => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InternalError => "internal_error",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::Conflict => "conflict",
            ErrorCode::InvalidCredentials => "invalid_credentials",
            ErrorCode::TokenExpired => "token_expired",
            ErrorCode::TokenInvalid => "token_invalid",
            ErrorCode::RateLimitExceeded => "rate_limit_exceeded",
            ErrorCode::ServiceUnavailable => "service_unavailable",
        }
    }
}

/// The error every HTTP handler returns.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn status(&self) -> StatusCode {
        self.code.status()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::internal(e.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        AppError::invalid_request(e.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(e: QueryRejection) -> Self {
        AppError::invalid_request(e.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(e: PathRejection) -> Self {
        AppError::invalid_request(e.body_text())
    }
}

impl From<RestaurantError> for AppError {
    fn from(e: RestaurantError) -> Self {
        let code = match &e {
            RestaurantError::RestaurantNotFound | RestaurantError::FavoriteNotFound => {
                ErrorCode::NotFound
            }
            RestaurantError::RestaurantAlreadyExists | RestaurantError::FavoriteAlreadyExists => {
                ErrorCode::Conflict
            }
            RestaurantError::InvalidLocation(_)
            | RestaurantError::InvalidInput(_)
            | RestaurantError::InvalidRating
            | RestaurantError::InvalidSource(_)
            | RestaurantError::InvalidUserId
            | RestaurantError::InvalidRestaurantId => ErrorCode::InvalidRequest,
            RestaurantError::MapService(_) | RestaurantError::Repository(_) => {
                ErrorCode::InternalError
            }
        };
        AppError::new(code, e.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        let code = match &e {
            AuthError::UserNotFound => ErrorCode::NotFound,
            AuthError::EmailAlreadyExists => ErrorCode::Conflict,
            AuthError::InvalidCredentials => ErrorCode::InvalidCredentials,
            AuthError::UserInactive => ErrorCode::Forbidden,
            AuthError::InvalidInput(_) => ErrorCode::InvalidRequest,
            AuthError::TokenExpired | AuthError::SessionExpired => ErrorCode::TokenExpired,
            AuthError::TokenInvalid
            | AuthError::TokenNotFound
            | AuthError::TokenRevoked
            | AuthError::SessionNotFound
            | AuthError::SessionRevoked => ErrorCode::TokenInvalid,
            AuthError::Hashing(_) | AuthError::Repository(_) => ErrorCode::InternalError,
        };
        AppError::new(code, e.to_string())
    }
}

impl From<MapError> for AppError {
    fn from(e: MapError) -> Self {
        let code = match &e {
            MapError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            MapError::PlaceNotFound(_) => ErrorCode::NotFound,
            MapError::Upstream { .. } | MapError::Transport(_) => ErrorCode::InternalError,
        };
        AppError::new(code, e.to_string())
    }
}

impl From<SpiderError> for AppError {
    fn from(e: SpiderError) -> Self {
        let code = match &e {
            SpiderError::JobNotFound => ErrorCode::NotFound,
            SpiderError::InvalidJobId | SpiderError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            SpiderError::QueueFull | SpiderError::ProcessorStopped => ErrorCode::ServiceUnavailable,
            SpiderError::ShutdownTimeout | SpiderError::Repository(_) => ErrorCode::InternalError,
        };
        AppError::new(code, e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code.as_str(), "{}", self.message);
        }
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();

        (
            status,
            Json(json!({
                "error": self.code.as_str(),
                "message": self.message,
                "code": status.as_u16(),
                "timestamp": timestamp,
            })),
        )
            .into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_statuses() {
        assert_eq!(ErrorCode::InvalidCredentials.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::TokenExpired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::RateLimitExceeded.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorCode::Forbidden.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn renders_json_body() {
        let response = AppError::not_found("Restaurant not found").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "not_found");
        assert_eq!(value["message"], "Restaurant not found");
        assert_eq!(value["code"], 404);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn domain_errors_pick_their_codes() {
        assert_eq!(AppError::from(RestaurantError::FavoriteAlreadyExists).code, ErrorCode::Conflict);
        assert_eq!(AppError::from(AuthError::InvalidCredentials).code, ErrorCode::InvalidCredentials);
        assert_eq!(AppError::from(AuthError::TokenExpired).code, ErrorCode::TokenExpired);
        assert_eq!(AppError::from(MapError::PlaceNotFound("x".into())).code, ErrorCode::NotFound);
        assert_eq!(
            AppError::from(SpiderError::QueueFull).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
