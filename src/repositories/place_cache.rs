use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use time::OffsetDateTime;

use crate::models::place::Place;

#[derive(Clone, Debug)]
pub struct CachedPlace {
    pub place: Place,
    pub cached_at: OffsetDateTime,
}

#[derive(Clone, Debug)]
struct Entry {
    cached: CachedPlace,
    expires_at: Instant,
}

/// Per-language TTL cache in front of the Places API.
#[derive(Clone)]
pub struct PlaceCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    ttl: Duration,
}

impl PlaceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn key(place_id: &str, language_code: &str) -> String {
        format!("map:place:{}:{}", place_id, language_code)
    }

    pub fn get(&self, place_id: &str, language_code: &str) -> Option<CachedPlace> {
        let key = Self::key(place_id, language_code);
        let entry = self.entries.read().get(&key).cloned()?;
        if Instant::now() >= entry.expires_at {
            self.entries.write().remove(&key);
            return None;
        }
        Some(entry.cached)
    }

    pub fn set(&self, place_id: &str, language_code: &str, place: Place) {
        let entry = Entry {
            cached: CachedPlace {
                place,
                cached_at: OffsetDateTime::now_utc(),
            },
            expires_at: Instant::now() + self.ttl,
        };
        self.entries
            .write()
            .insert(Self::key(place_id, language_code), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place(id: &str) -> Place {
        Place {
            id: id.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn entries_are_keyed_by_language() {
        let cache = PlaceCache::new(Duration::from_secs(60));
        cache.set("p1", "en", place("p1"));
        assert!(cache.get("p1", "en").is_some());
        assert!(cache.get("p1", "ja").is_none());
        assert_eq!(PlaceCache::key("p1", "ja"), "map:place:p1:ja");
    }

    #[test]
    fn expired_entries_are_evicted() {
        let cache = PlaceCache::new(Duration::ZERO);
        cache.set("p1", "en", place("p1"));
        assert!(cache.get("p1", "en").is_none());
        assert!(cache.is_empty());
    }
}
