use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub revoked_at: Option<OffsetDateTime>,
}

impl RefreshToken {
    pub fn new(user_id: Uuid, raw_token: &str, ttl: Duration) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            user_id,
            token_hash: hash_token(raw_token),
            expires_at: now + ttl,
            created_at: now,
            revoked_at: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() > self.expires_at
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn revoke(&mut self) {
        if self.revoked_at.is_none() {
            self.revoked_at = Some(OffsetDateTime::now_utc());
        }
    }
}

/// Refresh tokens are only ever persisted as their SHA-256 hex digest.
pub fn hash_token(raw_token: &str) -> String {
    hex::encode(Sha256::digest(raw_token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_only_the_digest() {
        let token = RefreshToken::new(Uuid::new_v4(), "raw.jwt.value", Duration::hours(1));
        assert_ne!(token.token_hash, "raw.jwt.value");
        assert_eq!(token.token_hash, hash_token("raw.jwt.value"));
        assert_eq!(token.token_hash.len(), 64);
    }

    #[test]
    fn revoke_is_sticky() {
        let mut token = RefreshToken::new(Uuid::new_v4(), "t", Duration::hours(1));
        assert!(!token.is_revoked());
        token.revoke();
        let first = token.revoked_at;
        token.revoke();
        assert_eq!(token.revoked_at, first);
        assert!(!token.is_expired());
    }
}
