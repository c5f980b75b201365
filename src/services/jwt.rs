use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::config::MIN_JWT_SECRET_LEN;
use crate::models::user::{AuthError, Role};

pub const ISSUER: &str = "tabelogo-v2";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum JwtError {
    #[error("jwt secret is too short")]
    WeakSecret,
    #[error("token expired")]
    TokenExpired,
    #[error("token invalid")]
    TokenInvalid,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<JwtError> for AuthError {
    fn from(e: JwtError) -> Self {
        match e {
            JwtError::TokenExpired => AuthError::TokenExpired,
            JwtError::TokenInvalid | JwtError::WeakSecret => AuthError::TokenInvalid,
            JwtError::Signing(msg) => AuthError::Repository(msg),
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Claims {
    pub jti: String,
    pub sub: String,
    pub sid: String,
    pub role: Role,
    pub typ: TokenKind,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid, JwtError> {
        Uuid::parse_str(&self.sub).map_err(|_| JwtError::TokenInvalid)
    }

    pub fn session_id(&self) -> Result<Uuid, JwtError> {
        Uuid::parse_str(&self.sid).map_err(|_| JwtError::TokenInvalid)
    }
}

pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtManager {
    pub fn new(secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Result<Self, JwtError> {
        if secret.len() < MIN_JWT_SECRET_LEN {
            return Err(JwtError::WeakSecret);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[ISSUER]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            access_ttl,
            refresh_ttl,
        })
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn generate(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        role: Role,
        kind: TokenKind,
    ) -> Result<String, JwtError> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            jti: Uuid::new_v4().to_string(),
            sub: user_id.to_string(),
            sid: session_id.to_string(),
            role,
            typ: kind,
            iss: ISSUER.to_string(),
            iat: now.unix_timestamp(),
            exp: (now + ttl).unix_timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Signing(e.to_string()))
    }

    /// Verifies signature, issuer and expiry, then checks the token is of the expected kind.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, JwtError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::TokenExpired,
                _ => JwtError::TokenInvalid,
            }
        })?;

        if data.claims.typ != kind {
            return Err(JwtError::TokenInvalid);
        }
        Ok(data.claims)
    }
}
