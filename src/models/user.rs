use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    #[error("user not found")]
    UserNotFound,
    #[error("email already exists")]
    EmailAlreadyExists,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("user account is inactive")]
    UserInactive,
    #[error("{0}")]
    InvalidInput(String),
    #[error("session not found")]
    SessionNotFound,
    #[error("session expired")]
    SessionExpired,
    #[error("session revoked")]
    SessionRevoked,
    #[error("refresh token not found")]
    TokenNotFound,
    #[error("refresh token revoked")]
    TokenRevoked,
    #[error("token expired")]
    TokenExpired,
    #[error("token invalid")]
    TokenInvalid,
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error("repository error: {0}")]
    Repository(String),
}

impl From<bcrypt::BcryptError> for AuthError {
    fn from(e: bcrypt::BcryptError) -> Self {
        AuthError::Hashing(e.to_string())
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
    Guest,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::Guest => "guest",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            "guest" => Ok(Role::Guest),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub username: String,
    pub role: Role,
    pub is_active: bool,
    pub email_verified: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn new(
        email: impl Into<String>,
        password: &str,
        username: impl Into<String>,
        cost: u32,
    ) -> Result<Self, bcrypt::BcryptError> {
        let now = OffsetDateTime::now_utc();
        Ok(Self {
            id: Uuid::new_v4(),
            email: email.into(),
            password_hash: bcrypt::hash(password, cost)?,
            username: username.into(),
            role: Role::User,
            is_active: true,
            email_verified: false,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn check_password(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.password_hash).unwrap_or(false)
    }

    pub fn update_password(&mut self, password: &str, cost: u32) -> Result<(), bcrypt::BcryptError> {
        self.password_hash = bcrypt::hash(password, cost)?;
        self.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    pub fn verify_email(&mut self) {
        self.email_verified = true;
        self.updated_at = OffsetDateTime::now_utc();
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.updated_at = OffsetDateTime::now_utc();
    }
}

/// What the API exposes about a user.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub username: String,
    pub role: Role,
    pub email_verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            email: user.email.clone(),
            username: user.username.clone(),
            role: user.role,
            email_verified: user.email_verified,
            created_at: user.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwords_are_hashed_and_checked() {
        let mut user = User::new("a@b.c", "password123", "alice", 4).unwrap();
        assert_ne!(user.password_hash, "password123");
        assert!(user.check_password("password123"));
        assert!(!user.check_password("wrong"));

        user.update_password("another-pass", 4).unwrap();
        assert!(user.check_password("another-pass"));
        assert_eq!(user.role, Role::User);
    }

    #[test]
    fn response_hides_the_hash() {
        let user = User::new("a@b.c", "password123", "alice", 4).unwrap();
        let value = serde_json::to_value(UserResponse::from(&user)).unwrap();
        assert!(value.get("password_hash").is_none());
        assert_eq!(value["role"], "user");
    }
}
