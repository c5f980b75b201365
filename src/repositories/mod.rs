use async_trait::async_trait;
use time::Duration;
use uuid::Uuid;

use crate::models::favorite::Favorite;
use crate::models::restaurant::{Restaurant, RestaurantError, RestaurantSource};
use crate::models::scraping_job::{ScrapingJob, SpiderError};
use crate::models::session::Session;
use crate::models::tabelog::{CachedResult, TabelogRestaurant};
use crate::models::token::RefreshToken;
use crate::models::user::{AuthError, User};

pub mod job_store;
pub mod memory_repo;
pub mod place_cache;
pub mod postgres_repo;

/// Soft-deleted restaurants are invisible to every read.
#[async_trait]
pub trait RestaurantRepository: Send + Sync {
    async fn create(&self, restaurant: &Restaurant) -> Result<(), RestaurantError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Restaurant, RestaurantError>;
    async fn find_by_external_id(
        &self,
        source: RestaurantSource,
        external_id: &str,
    ) -> Result<Restaurant, RestaurantError>;
    async fn update(&self, restaurant: &Restaurant) -> Result<(), RestaurantError>;
    async fn delete(&self, id: Uuid) -> Result<(), RestaurantError>;
    async fn search(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Restaurant>, RestaurantError>;
    async fn find_by_location(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<Restaurant>, RestaurantError>;
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Restaurant>, RestaurantError>;
    async fn count(&self) -> Result<i64, RestaurantError>;
    async fn find_by_cuisine_type(
        &self,
        cuisine_type: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Restaurant>, RestaurantError>;
    async fn find_by_source(
        &self,
        source: RestaurantSource,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Restaurant>, RestaurantError>;
}

#[async_trait]
pub trait FavoriteRepository: Send + Sync {
    async fn create(&self, favorite: &Favorite) -> Result<(), RestaurantError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Favorite, RestaurantError>;
    async fn find_by_user_and_restaurant(
        &self,
        user_id: Uuid,
        restaurant_id: Uuid,
    ) -> Result<Favorite, RestaurantError>;
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Vec<Favorite>, RestaurantError>;
    async fn find_by_restaurant_id(
        &self,
        restaurant_id: Uuid,
    ) -> Result<Vec<Favorite>, RestaurantError>;
    async fn update(&self, favorite: &Favorite) -> Result<(), RestaurantError>;
    async fn delete(&self, id: Uuid) -> Result<(), RestaurantError>;
    async fn exists(&self, user_id: Uuid, restaurant_id: Uuid) -> Result<bool, RestaurantError>;
    async fn count_by_user_id(&self, user_id: Uuid) -> Result<i64, RestaurantError>;
    async fn find_by_tag(&self, user_id: Uuid, tag: &str) -> Result<Vec<Favorite>, RestaurantError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &User) -> Result<(), AuthError>;
    async fn find_by_id(&self, id: Uuid) -> Result<User, AuthError>;
    async fn find_by_email(&self, email: &str) -> Result<User, AuthError>;
    async fn update(&self, user: &User) -> Result<(), AuthError>;
    async fn delete(&self, id: Uuid) -> Result<(), AuthError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &Session) -> Result<(), AuthError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Session, AuthError>;
    async fn find_active_by_user(&self, user_id: Uuid) -> Result<Vec<Session>, AuthError>;
    async fn update_activity(&self, id: Uuid) -> Result<(), AuthError>;
    async fn revoke(&self, id: Uuid) -> Result<(), AuthError>;
    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<(), AuthError>;
    async fn delete_expired(&self) -> Result<usize, AuthError>;
}

#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn create(&self, token: &RefreshToken) -> Result<(), AuthError>;
    async fn find_by_hash(&self, token_hash: &str) -> Result<RefreshToken, AuthError>;
    async fn revoke(&self, id: Uuid) -> Result<(), AuthError>;
    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<(), AuthError>;
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn save(&self, job: &ScrapingJob) -> Result<(), SpiderError>;
    async fn find_by_id(&self, id: Uuid) -> Result<ScrapingJob, SpiderError>;
    async fn find_by_google_id(&self, google_id: &str) -> Result<Vec<ScrapingJob>, SpiderError>;
    async fn update(&self, job: &ScrapingJob) -> Result<(), SpiderError>;
    async fn delete(&self, id: Uuid) -> Result<(), SpiderError>;
    /// Oldest pending jobs first.
    async fn find_pending(&self, limit: usize) -> Result<Vec<ScrapingJob>, SpiderError>;
}

#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, place_id: &str) -> Result<Option<CachedResult>, SpiderError>;
    async fn set(
        &self,
        place_id: &str,
        results: Vec<TabelogRestaurant>,
        ttl: Duration,
    ) -> Result<(), SpiderError>;
    async fn delete(&self, place_id: &str) -> Result<(), SpiderError>;
}

pub(crate) fn paginate<T>(items: Vec<T>, limit: usize, offset: usize) -> Vec<T> {
    items.into_iter().skip(offset).take(limit).collect()
}

/// Bounding box around a point, in degrees: (lat delta, lng delta).
pub(crate) fn bounding_box(radius_km: f64) -> (f64, f64) {
    let lat_delta = radius_km / 111.0;
    let lng_delta = radius_km / (111.0 * 0.9);
    (lat_delta, lng_delta)
}
