use std::sync::Arc;

use tracing::{info, warn};

use crate::models::session::Session;
use crate::models::token::{hash_token, RefreshToken};
use crate::models::user::{AuthError, User};
use crate::repositories::{SessionRepository, TokenRepository, UserRepository};
use crate::services::jwt::{JwtManager, TokenKind};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MIN_USERNAME_LEN: usize = 3;

#[derive(Clone, Debug, Default)]
pub struct LoginContext {
    pub device_info: String,
    pub ip_address: String,
    pub remember_me: bool,
}

#[derive(Clone, Debug)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct AuthService {
    users: Arc<dyn UserRepository>,
    sessions: Arc<dyn SessionRepository>,
    tokens: Arc<dyn TokenRepository>,
    jwt: Arc<JwtManager>,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        sessions: Arc<dyn SessionRepository>,
        tokens: Arc<dyn TokenRepository>,
        jwt: Arc<JwtManager>,
    ) -> Self {
        Self {
            users,
            sessions,
            tokens,
            jwt,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }

    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    pub fn jwt(&self) -> Arc<JwtManager> {
        self.jwt.clone()
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<User, AuthError> {
        let email = email.trim();
        let username = username.trim();
        validate_registration(email, password, username)?;

        match self.users.find_by_email(email).await {
            Ok(_) => return Err(AuthError::EmailAlreadyExists),
            Err(AuthError::UserNotFound) => {}
            Err(e) => return Err(e),
        }

        let user = User::new(email, password, username, self.bcrypt_cost)?;
        self.users.create(&user).await?;
        info!(user_id = %user.id, "Registered new user");
        Ok(user)
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        context: LoginContext,
    ) -> Result<(TokenPair, User), AuthError> {
        let user = match self.users.find_by_email(email.trim()).await {
            Ok(user) => user,
            Err(AuthError::UserNotFound) => return Err(AuthError::InvalidCredentials),
            Err(e) => return Err(e),
        };
        if !user.check_password(password) {
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_active {
            return Err(AuthError::UserInactive);
        }

        let session = Session::new(
            user.id,
            context.device_info,
            context.ip_address,
            context.remember_me,
        );
        self.sessions.create(&session).await?;

        let pair = self.issue_pair(&user, &session).await?;
        info!(user_id = %user.id, session_id = %session.id, "User logged in");
        Ok((pair, user))
    }

    /// Rotates a refresh token. Presenting an already revoked token revokes every
    /// token the user holds.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.jwt.verify(refresh_token, TokenKind::Refresh)?;
        let user_id = claims.user_id()?;
        let session_id = claims.session_id()?;

        let stored = self.tokens.find_by_hash(&hash_token(refresh_token)).await?;
        if stored.user_id != user_id {
            return Err(AuthError::TokenInvalid);
        }
        if stored.is_revoked() {
            warn!(user_id = %user_id, "Revoked refresh token presented, revoking all tokens");
            self.tokens.revoke_all_for_user(user_id).await?;
            return Err(AuthError::TokenRevoked);
        }
        if stored.is_expired() {
            return Err(AuthError::TokenExpired);
        }

        let session = self.valid_session(session_id).await?;
        let user = self.active_user(user_id).await?;

        self.tokens.revoke(stored.id).await?;
        self.sessions.update_activity(session.id).await?;
        self.issue_pair(&user, &session).await
    }

    pub async fn validate_token(&self, access_token: &str) -> Result<User, AuthError> {
        let claims = self.jwt.verify(access_token, TokenKind::Access)?;
        self.valid_session(claims.session_id()?).await?;
        self.active_user(claims.user_id()?).await
    }

    /// Ends the session behind an access token. Refresh tokens bound to it stop working.
    pub async fn logout(&self, access_token: &str) -> Result<(), AuthError> {
        let claims = self.jwt.verify(access_token, TokenKind::Access)?;
        self.sessions.revoke(claims.session_id()?).await?;
        info!(user_id = %claims.sub, session_id = %claims.sid, "User logged out");
        Ok(())
    }

    async fn issue_pair(&self, user: &User, session: &Session) -> Result<TokenPair, AuthError> {
        let access_token = self
            .jwt
            .generate(user.id, session.id, user.role, TokenKind::Access)?;
        let refresh_token = self
            .jwt
            .generate(user.id, session.id, user.role, TokenKind::Refresh)?;

        let stored = RefreshToken::new(user.id, &refresh_token, self.jwt.refresh_ttl());
        self.tokens.create(&stored).await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    async fn valid_session(&self, session_id: uuid::Uuid) -> Result<Session, AuthError> {
        let session = self.sessions.find_by_id(session_id).await?;
        if !session.is_active {
            return Err(AuthError::SessionRevoked);
        }
        if session.is_expired() {
            return Err(AuthError::SessionExpired);
        }
        Ok(session)
    }

    async fn active_user(&self, user_id: uuid::Uuid) -> Result<User, AuthError> {
        let user = self.users.find_by_id(user_id).await?;
        if !user.is_active {
            return Err(AuthError::UserInactive);
        }
        Ok(user)
    }
}

fn validate_registration(email: &str, password: &str, username: &str) -> Result<(), AuthError> {
    let well_formed = email
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
        .unwrap_or(false);
    if !well_formed {
        return Err(AuthError::InvalidInput("invalid email address".into()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::InvalidInput(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if username.chars().count() < MIN_USERNAME_LEN {
        return Err(AuthError::InvalidInput(format!(
            "username must be at least {} characters",
            MIN_USERNAME_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory_repo::{InMemorySessionRepo, InMemoryTokenRepo, InMemoryUserRepo};
    use time::Duration;

    fn service() -> AuthService {
        let jwt = JwtManager::new(
            "0123456789abcdef0123456789abcdef",
            Duration::minutes(15),
            Duration::hours(24),
        )
        .unwrap();
        AuthService::new(
            Arc::new(InMemoryUserRepo::new()),
            Arc::new(InMemorySessionRepo::new()),
            Arc::new(InMemoryTokenRepo::new()),
            Arc::new(jwt),
        )
        .with_bcrypt_cost(4)
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_bad_input() {
        let auth = service();
        auth.register("alice@example.com", "password123", "alice").await.unwrap();

        assert_eq!(
            auth.register("ALICE@example.com", "password123", "alice2").await.unwrap_err(),
            AuthError::EmailAlreadyExists
        );
        assert!(matches!(
            auth.register("bob", "password123", "bob").await,
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            auth.register("bob@example.com", "short", "bob").await,
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            auth.register("bob@example.com", "password123", "bo").await,
            Err(AuthError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn login_and_validate() {
        let auth = service();
        auth.register("alice@example.com", "password123", "alice").await.unwrap();

        assert_eq!(
            auth.login("alice@example.com", "nope-nope", LoginContext::default())
                .await
                .unwrap_err(),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            auth.login("ghost@example.com", "password123", LoginContext::default())
                .await
                .unwrap_err(),
            AuthError::InvalidCredentials
        );

        let (pair, user) = auth
            .login("alice@example.com", "password123", LoginContext::default())
            .await
            .unwrap();
        let validated = auth.validate_token(&pair.access_token).await.unwrap();
        assert_eq!(validated.id, user.id);
        assert_eq!(
            auth.validate_token(&pair.refresh_token).await.unwrap_err(),
            AuthError::TokenInvalid
        );
    }

    #[tokio::test]
    async fn refresh_rotates_and_detects_reuse() {
        let auth = service();
        auth.register("alice@example.com", "password123", "alice").await.unwrap();
        let (first, _) = auth
            .login("alice@example.com", "password123", LoginContext::default())
            .await
            .unwrap();

        let second = auth.refresh(&first.refresh_token).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);

        assert_eq!(
            auth.refresh(&first.refresh_token).await.unwrap_err(),
            AuthError::TokenRevoked
        );
        assert_eq!(
            auth.refresh(&second.refresh_token).await.unwrap_err(),
            AuthError::TokenRevoked
        );
    }

    #[tokio::test]
    async fn logout_kills_the_session() {
        let auth = service();
        auth.register("alice@example.com", "password123", "alice").await.unwrap();
        let (pair, _) = auth
            .login("alice@example.com", "password123", LoginContext::default())
            .await
            .unwrap();

        auth.logout(&pair.access_token).await.unwrap();
        assert_eq!(
            auth.validate_token(&pair.access_token).await.unwrap_err(),
            AuthError::SessionRevoked
        );
        assert_eq!(
            auth.refresh(&pair.refresh_token).await.unwrap_err(),
            AuthError::SessionRevoked
        );
    }
}
