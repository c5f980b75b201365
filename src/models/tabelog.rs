use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct TabelogRestaurant {
    pub link: String,
    pub name: String,
    pub rating: f64,
    pub rating_count: i64,
    pub bookmarks: i64,
    pub phone: String,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub photos: Vec<String>,
}

/// Scrape results cached per Google place id.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct CachedResult {
    pub place_id: String,
    pub results: Vec<TabelogRestaurant>,
    #[serde(with = "time::serde::rfc3339")]
    pub cached_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl CachedResult {
    pub fn new(place_id: impl Into<String>, results: Vec<TabelogRestaurant>, ttl: Duration) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            place_id: place_id.into(),
            results,
            cached_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() > self.expires_at
    }
}
