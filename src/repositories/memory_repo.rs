use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::favorite::Favorite;
use crate::models::restaurant::{Restaurant, RestaurantError, RestaurantSource};
use crate::models::session::Session;
use crate::models::token::RefreshToken;
use crate::models::user::{AuthError, User};
use crate::repositories::{
    bounding_box, paginate, FavoriteRepository, RestaurantRepository, SessionRepository,
    TokenRepository, UserRepository,
};

#[derive(Clone, Default)]
pub struct InMemoryRestaurantRepo {
    restaurants: Arc<RwLock<HashMap<Uuid, Restaurant>>>,
}

impl InMemoryRestaurantRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_sorted<F>(&self, filter: F) -> Vec<Restaurant>
    where
        F: Fn(&Restaurant) -> bool,
    {
        let mut rows: Vec<Restaurant> = self
            .restaurants
            .read()
            .values()
            .filter(|r| !r.is_deleted() && filter(r))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }
}

#[async_trait]
impl RestaurantRepository for InMemoryRestaurantRepo {
    async fn create(&self, restaurant: &Restaurant) -> Result<(), RestaurantError> {
        let mut restaurants = self.restaurants.write();
        let duplicate = restaurants.values().any(|r| {
            !r.is_deleted()
                && r.source == restaurant.source
                && r.external_id == restaurant.external_id
        });
        if duplicate || restaurants.contains_key(&restaurant.id) {
            return Err(RestaurantError::RestaurantAlreadyExists);
        }
        restaurants.insert(restaurant.id, restaurant.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Restaurant, RestaurantError> {
        self.restaurants
            .read()
            .get(&id)
            .filter(|r| !r.is_deleted())
            .cloned()
            .ok_or(RestaurantError::RestaurantNotFound)
    }

    async fn find_by_external_id(
        &self,
        source: RestaurantSource,
        external_id: &str,
    ) -> Result<Restaurant, RestaurantError> {
        self.restaurants
            .read()
            .values()
            .find(|r| !r.is_deleted() && r.source == source && r.external_id == external_id)
            .cloned()
            .ok_or(RestaurantError::RestaurantNotFound)
    }

    async fn update(&self, restaurant: &Restaurant) -> Result<(), RestaurantError> {
        let mut restaurants = self.restaurants.write();
        match restaurants.get_mut(&restaurant.id) {
            Some(existing) if !existing.is_deleted() => {
                *existing = restaurant.clone();
                Ok(())
            }
            _ => Err(RestaurantError::RestaurantNotFound),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<(), RestaurantError> {
        let mut restaurants = self.restaurants.write();
        match restaurants.get_mut(&id) {
            Some(existing) if !existing.is_deleted() => {
                existing.soft_delete();
                Ok(())
            }
            _ => Err(RestaurantError::RestaurantNotFound),
        }
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Restaurant>, RestaurantError> {
        let needle = query.to_lowercase();
        let rows = self.live_sorted(|r| {
            r.name.to_lowercase().contains(&needle)
                || r.name_ja.to_lowercase().contains(&needle)
                || r.address.to_lowercase().contains(&needle)
                || r.cuisine_type.to_lowercase().contains(&needle)
        });
        Ok(paginate(rows, limit, offset))
    }

    async fn find_by_location(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<Restaurant>, RestaurantError> {
        let (lat_delta, lng_delta) = bounding_box(radius_km);
        let rows = self.live_sorted(|r| match r.location {
            Some(location) => {
                (location.lat - lat).abs() <= lat_delta && (location.lng - lng).abs() <= lng_delta
            }
            None => false,
        });
        Ok(paginate(rows, limit, 0))
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Restaurant>, RestaurantError> {
        Ok(paginate(self.live_sorted(|_| true), limit, offset))
    }

    async fn count(&self) -> Result<i64, RestaurantError> {
        Ok(self
            .restaurants
            .read()
            .values()
            .filter(|r| !r.is_deleted())
            .count() as i64)
    }

    async fn find_by_cuisine_type(
        &self,
        cuisine_type: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Restaurant>, RestaurantError> {
        let rows = self.live_sorted(|r| r.cuisine_type.eq_ignore_ascii_case(cuisine_type));
        Ok(paginate(rows, limit, offset))
    }

    async fn find_by_source(
        &self,
        source: RestaurantSource,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Restaurant>, RestaurantError> {
        let rows = self.live_sorted(|r| r.source == source);
        Ok(paginate(rows, limit, offset))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryFavoriteRepo {
    favorites: Arc<RwLock<HashMap<Uuid, Favorite>>>,
}

impl InMemoryFavoriteRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn live<F>(&self, filter: F) -> Vec<Favorite>
    where
        F: Fn(&Favorite) -> bool,
    {
        let mut rows: Vec<Favorite> = self
            .favorites
            .read()
            .values()
            .filter(|f| !f.is_deleted() && filter(f))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }
}

#[async_trait]
impl FavoriteRepository for InMemoryFavoriteRepo {
    async fn create(&self, favorite: &Favorite) -> Result<(), RestaurantError> {
        let mut favorites = self.favorites.write();
        let duplicate = favorites.values().any(|f| {
            !f.is_deleted()
                && f.user_id == favorite.user_id
                && f.restaurant_id == favorite.restaurant_id
        });
        if duplicate {
            return Err(RestaurantError::FavoriteAlreadyExists);
        }
        favorites.insert(favorite.id, favorite.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Favorite, RestaurantError> {
        self.favorites
            .read()
            .get(&id)
            .filter(|f| !f.is_deleted())
            .cloned()
            .ok_or(RestaurantError::FavoriteNotFound)
    }

    async fn find_by_user_and_restaurant(
        &self,
        user_id: Uuid,
        restaurant_id: Uuid,
    ) -> Result<Favorite, RestaurantError> {
        self.live(|f| f.user_id == user_id && f.restaurant_id == restaurant_id)
            .into_iter()
            .next()
            .ok_or(RestaurantError::FavoriteNotFound)
    }

    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Vec<Favorite>, RestaurantError> {
        Ok(self.live(|f| f.user_id == user_id))
    }

    async fn find_by_restaurant_id(
        &self,
        restaurant_id: Uuid,
    ) -> Result<Vec<Favorite>, RestaurantError> {
        Ok(self.live(|f| f.restaurant_id == restaurant_id))
    }

    async fn update(&self, favorite: &Favorite) -> Result<(), RestaurantError> {
        let mut favorites = self.favorites.write();
        match favorites.get_mut(&favorite.id) {
            Some(existing) if !existing.is_deleted() => {
                *existing = favorite.clone();
                Ok(())
            }
            _ => Err(RestaurantError::FavoriteNotFound),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<(), RestaurantError> {
        let mut favorites = self.favorites.write();
        match favorites.get_mut(&id) {
            Some(existing) if !existing.is_deleted() => {
                existing.soft_delete();
                Ok(())
            }
            _ => Err(RestaurantError::FavoriteNotFound),
        }
    }

    async fn exists(&self, user_id: Uuid, restaurant_id: Uuid) -> Result<bool, RestaurantError> {
        Ok(!self
            .live(|f| f.user_id == user_id && f.restaurant_id == restaurant_id)
            .is_empty())
    }

    async fn count_by_user_id(&self, user_id: Uuid) -> Result<i64, RestaurantError> {
        Ok(self.live(|f| f.user_id == user_id).len() as i64)
    }

    async fn find_by_tag(&self, user_id: Uuid, tag: &str) -> Result<Vec<Favorite>, RestaurantError> {
        Ok(self.live(|f| f.user_id == user_id && f.has_tag(tag)))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryUserRepo {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
}

impl InMemoryUserRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepo {
    async fn create(&self, user: &User) -> Result<(), AuthError> {
        let mut users = self.users.write();
        if users.values().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(AuthError::EmailAlreadyExists);
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<User, AuthError> {
        self.users
            .read()
            .get(&id)
            .cloned()
            .ok_or(AuthError::UserNotFound)
    }

    async fn find_by_email(&self, email: &str) -> Result<User, AuthError> {
        self.users
            .read()
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or(AuthError::UserNotFound)
    }

    async fn update(&self, user: &User) -> Result<(), AuthError> {
        let mut users = self.users.write();
        match users.get_mut(&user.id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(())
            }
            None => Err(AuthError::UserNotFound),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<(), AuthError> {
        self.users
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(AuthError::UserNotFound)
    }
}

#[derive(Clone, Default)]
pub struct InMemorySessionRepo {
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
}

impl InMemorySessionRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepo {
    async fn create(&self, session: &Session) -> Result<(), AuthError> {
        self.sessions.write().insert(session.id, session.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Session, AuthError> {
        self.sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or(AuthError::SessionNotFound)
    }

    async fn find_active_by_user(&self, user_id: Uuid) -> Result<Vec<Session>, AuthError> {
        Ok(self
            .sessions
            .read()
            .values()
            .filter(|s| s.user_id == user_id && s.is_valid())
            .cloned()
            .collect())
    }

    async fn update_activity(&self, id: Uuid) -> Result<(), AuthError> {
        match self.sessions.write().get_mut(&id) {
            Some(session) => {
                session.update_activity();
                Ok(())
            }
            None => Err(AuthError::SessionNotFound),
        }
    }

    async fn revoke(&self, id: Uuid) -> Result<(), AuthError> {
        match self.sessions.write().get_mut(&id) {
            Some(session) => {
                session.revoke();
                Ok(())
            }
            None => Err(AuthError::SessionNotFound),
        }
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.sessions
            .write()
            .values_mut()
            .filter(|s| s.user_id == user_id)
            .for_each(Session::revoke);
        Ok(())
    }

    async fn delete_expired(&self) -> Result<usize, AuthError> {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired());
        Ok(before - sessions.len())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTokenRepo {
    tokens: Arc<RwLock<HashMap<Uuid, RefreshToken>>>,
}

impl InMemoryTokenRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenRepository for InMemoryTokenRepo {
    async fn create(&self, token: &RefreshToken) -> Result<(), AuthError> {
        self.tokens.write().insert(token.id, token.clone());
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<RefreshToken, AuthError> {
        self.tokens
            .read()
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned()
            .ok_or(AuthError::TokenNotFound)
    }

    async fn revoke(&self, id: Uuid) -> Result<(), AuthError> {
        match self.tokens.write().get_mut(&id) {
            Some(token) => {
                token.revoke();
                Ok(())
            }
            None => Err(AuthError::TokenNotFound),
        }
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<(), AuthError> {
        let now = OffsetDateTime::now_utc();
        for token in self.tokens.write().values_mut() {
            if token.user_id == user_id && token.revoked_at.is_none() {
                token.revoked_at = Some(now);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::restaurant::Location;

    fn restaurant(name: &str, external_id: &str, lat: f64, lng: f64) -> Restaurant {
        let mut r = Restaurant::new(
            name,
            RestaurantSource::Google,
            external_id,
            Some(Location::new(lat, lng).unwrap()),
        );
        r.cuisine_type = "ramen".into();
        r
    }

    #[tokio::test]
    async fn duplicate_external_ids_conflict() {
        let repo = InMemoryRestaurantRepo::new();
        repo.create(&restaurant("A", "ext-1", 35.0, 139.0)).await.unwrap();
        let err = repo
            .create(&restaurant("B", "ext-1", 35.0, 139.0))
            .await
            .unwrap_err();
        assert_eq!(err, RestaurantError::RestaurantAlreadyExists);
    }

    #[tokio::test]
    async fn soft_deleted_rows_disappear() {
        let repo = InMemoryRestaurantRepo::new();
        let r = restaurant("Ichiran", "ext-1", 35.0, 139.0);
        repo.create(&r).await.unwrap();
        repo.delete(r.id).await.unwrap();

        assert_eq!(repo.find_by_id(r.id).await.unwrap_err(), RestaurantError::RestaurantNotFound);
        assert_eq!(repo.count().await.unwrap(), 0);
        assert!(repo.search("ichiran", 10, 0).await.unwrap().is_empty());
        assert_eq!(repo.delete(r.id).await.unwrap_err(), RestaurantError::RestaurantNotFound);
    }

    #[tokio::test]
    async fn search_and_location_filters() {
        let repo = InMemoryRestaurantRepo::new();
        repo.create(&restaurant("Ichiran Shinjuku", "a", 35.6938, 139.7034)).await.unwrap();
        repo.create(&restaurant("Sushizanmai", "b", 34.6686, 135.5004)).await.unwrap();

        let hits = repo.search("ICHIRAN", 10, 0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(repo.search("ramen", 10, 0).await.unwrap().len(), 2);
        assert_eq!(repo.search("ramen", 1, 1).await.unwrap().len(), 1);

        let near = repo.find_by_location(35.69, 139.70, 2.0, 10).await.unwrap();
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].external_id, "a");

        assert_eq!(repo.find_by_cuisine_type("Ramen", 10, 0).await.unwrap().len(), 2);
        assert_eq!(
            repo.find_by_source(RestaurantSource::Tabelog, 10, 0).await.unwrap().len(),
            0
        );
    }

    #[tokio::test]
    async fn favorites_are_unique_per_user_and_restaurant() {
        let repo = InMemoryFavoriteRepo::new();
        let user_id = Uuid::new_v4();
        let restaurant_id = Uuid::new_v4();
        let mut favorite = Favorite::new(user_id, restaurant_id);
        favorite.add_tag("ramen");
        repo.create(&favorite).await.unwrap();

        assert_eq!(
            repo.create(&Favorite::new(user_id, restaurant_id)).await.unwrap_err(),
            RestaurantError::FavoriteAlreadyExists
        );
        assert!(repo.exists(user_id, restaurant_id).await.unwrap());
        assert_eq!(repo.find_by_tag(user_id, "ramen").await.unwrap().len(), 1);

        repo.delete(favorite.id).await.unwrap();
        assert!(!repo.exists(user_id, restaurant_id).await.unwrap());
        assert_eq!(repo.count_by_user_id(user_id).await.unwrap(), 0);
        repo.create(&Favorite::new(user_id, restaurant_id)).await.unwrap();
    }

    #[tokio::test]
    async fn tokens_are_revoked_per_user() {
        let repo = InMemoryTokenRepo::new();
        let user_id = Uuid::new_v4();
        let a = RefreshToken::new(user_id, "a", time::Duration::hours(1));
        let b = RefreshToken::new(user_id, "b", time::Duration::hours(1));
        repo.create(&a).await.unwrap();
        repo.create(&b).await.unwrap();

        repo.revoke_all_for_user(user_id).await.unwrap();
        assert!(repo.find_by_hash(&a.token_hash).await.unwrap().is_revoked());
        assert!(repo.find_by_hash(&b.token_hash).await.unwrap().is_revoked());
    }
}
