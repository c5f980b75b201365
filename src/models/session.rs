use time::{Duration, OffsetDateTime};
use uuid::Uuid;

pub const SESSION_TTL: Duration = Duration::hours(24);
pub const REMEMBER_ME_TTL: Duration = Duration::days(30);

#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_info: String,
    pub ip_address: String,
    pub created_at: OffsetDateTime,
    pub last_active: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub is_active: bool,
}

impl Session {
    pub fn new(
        user_id: Uuid,
        device_info: impl Into<String>,
        ip_address: impl Into<String>,
        remember_me: bool,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        let ttl = if remember_me { REMEMBER_ME_TTL } else { SESSION_TTL };
        Self {
            id: Uuid::new_v4(),
            user_id,
            device_info: device_info.into(),
            ip_address: ip_address.into(),
            created_at: now,
            last_active: now,
            expires_at: now + ttl,
            is_active: true,
        }
    }

    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() > self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        self.is_active && !self.is_expired()
    }

    pub fn revoke(&mut self) {
        self.is_active = false;
    }

    pub fn update_activity(&mut self) {
        self.last_active = OffsetDateTime::now_utc();
    }
}
