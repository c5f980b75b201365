use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::favorite::Favorite;
use crate::models::restaurant::{
    Location, Restaurant, RestaurantDetails, RestaurantError, RestaurantSource,
};
use crate::repositories::{FavoriteRepository, RestaurantRepository};
use crate::services::converters;
use crate::services::map_client::MapServiceClient;

#[derive(Clone, Debug, Deserialize)]
pub struct CreateRestaurantRequest {
    pub name: String,
    pub source: RestaurantSource,
    pub external_id: String,
    #[serde(default)]
    pub name_ja: String,
    #[serde(default)]
    pub area: String,
    #[serde(default)]
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub price_range: String,
    #[serde(default)]
    pub cuisine_type: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub opening_hours: HashMap<String, String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UpdateRestaurantRequest {
    #[serde(flatten)]
    pub details: RestaurantDetails,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    pub rating: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuickSearchOutcome {
    /// Stored row younger than the freshness TTL.
    Hit,
    /// Fetched from the map service.
    Refreshed,
    /// Map service failed, the stored row is served as is.
    Stale,
}

impl QuickSearchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuickSearchOutcome::Hit => "hit",
            QuickSearchOutcome::Refreshed => "miss",
            QuickSearchOutcome::Stale => "stale",
        }
    }
}

pub struct RestaurantService {
    restaurants: Arc<dyn RestaurantRepository>,
    favorites: Arc<dyn FavoriteRepository>,
    map_client: Arc<dyn MapServiceClient>,
    data_freshness_ttl: Duration,
}

impl RestaurantService {
    pub fn new(
        restaurants: Arc<dyn RestaurantRepository>,
        favorites: Arc<dyn FavoriteRepository>,
        map_client: Arc<dyn MapServiceClient>,
        data_freshness_ttl: Duration,
    ) -> Self {
        Self {
            restaurants,
            favorites,
            map_client,
            data_freshness_ttl,
        }
    }

    pub async fn create_restaurant(
        &self,
        request: CreateRestaurantRequest,
    ) -> Result<Restaurant, RestaurantError> {
        if request.name.trim().is_empty() {
            return Err(RestaurantError::InvalidInput("name is required".into()));
        }
        if request.external_id.trim().is_empty() {
            return Err(RestaurantError::InvalidInput("external_id is required".into()));
        }
        if !(0.0..=5.0).contains(&request.rating) {
            return Err(RestaurantError::InvalidRating);
        }
        let location = match (request.latitude, request.longitude) {
            (Some(lat), Some(lng)) => Some(Location::new(lat, lng)?),
            _ => None,
        };

        match self
            .restaurants
            .find_by_external_id(request.source, &request.external_id)
            .await
        {
            Ok(_) => return Err(RestaurantError::RestaurantAlreadyExists),
            Err(RestaurantError::RestaurantNotFound) => {}
            Err(e) => return Err(e),
        }

        let mut restaurant = Restaurant::new(
            request.name.trim(),
            request.source,
            request.external_id.trim(),
            location,
        );
        restaurant.area = request.area;
        restaurant.update_details(RestaurantDetails {
            name_ja: request.name_ja,
            address: request.address,
            price_range: request.price_range,
            cuisine_type: request.cuisine_type,
            phone: request.phone,
            website: request.website,
            ..Default::default()
        });
        restaurant.update_rating(request.rating);
        restaurant.set_opening_hours(request.opening_hours);
        restaurant.set_metadata(request.metadata);

        self.restaurants.create(&restaurant).await?;
        info!(restaurant_id = %restaurant.id, source = %restaurant.source, "Created restaurant");
        Ok(restaurant)
    }

    pub async fn get_restaurant(&self, id: Uuid) -> Result<Restaurant, RestaurantError> {
        self.restaurants.find_by_id(id).await
    }

    pub async fn get_by_external_id(
        &self,
        source: RestaurantSource,
        external_id: &str,
    ) -> Result<Restaurant, RestaurantError> {
        self.restaurants.find_by_external_id(source, external_id).await
    }

    pub async fn increment_view_count(&self, id: Uuid) -> Result<Restaurant, RestaurantError> {
        let mut restaurant = self.restaurants.find_by_id(id).await?;
        restaurant.increment_view_count();
        self.restaurants.update(&restaurant).await?;
        Ok(restaurant)
    }

    pub async fn update_restaurant(
        &self,
        id: Uuid,
        request: UpdateRestaurantRequest,
    ) -> Result<Restaurant, RestaurantError> {
        let mut restaurant = self.restaurants.find_by_id(id).await?;
        restaurant.update_details(request.details);
        if request.latitude != 0.0 && request.longitude != 0.0 {
            restaurant.update_location(Location::new(request.latitude, request.longitude)?);
        }
        if let Some(rating) = request.rating {
            if !(0.0..=5.0).contains(&rating) {
                return Err(RestaurantError::InvalidRating);
            }
            restaurant.update_rating(rating);
        }
        self.restaurants.update(&restaurant).await?;
        Ok(restaurant)
    }

    pub async fn delete_restaurant(&self, id: Uuid) -> Result<(), RestaurantError> {
        self.restaurants.delete(id).await?;
        info!(restaurant_id = %id, "Deleted restaurant");
        Ok(())
    }

    pub async fn search_restaurants(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Restaurant>, RestaurantError> {
        self.restaurants.search(query.trim(), limit, offset).await
    }

    /// A page of restaurants plus the total number of live rows.
    pub async fn list_restaurants(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Restaurant>, i64), RestaurantError> {
        let restaurants = self.restaurants.list(limit, offset).await?;
        let total = self.restaurants.count().await?;
        Ok((restaurants, total))
    }

    pub async fn find_by_location(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<Restaurant>, RestaurantError> {
        Location::new(lat, lng)?;
        if radius_km <= 0.0 {
            return Err(RestaurantError::InvalidLocation(
                "radius must be positive".into(),
            ));
        }
        self.restaurants
            .find_by_location(lat, lng, radius_km, limit)
            .await
    }

    pub async fn find_by_cuisine_type(
        &self,
        cuisine_type: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Restaurant>, RestaurantError> {
        self.restaurants
            .find_by_cuisine_type(cuisine_type, limit, offset)
            .await
    }

    /// Serves the stored Google restaurant while it is fresh, otherwise refreshes it
    /// through the map service. A failing map service degrades to the stale row.
    pub async fn quick_search_by_place_id(
        &self,
        place_id: &str,
    ) -> Result<(Restaurant, QuickSearchOutcome), RestaurantError> {
        let stored = match self
            .restaurants
            .find_by_external_id(RestaurantSource::Google, place_id)
            .await
        {
            Ok(restaurant) => Some(restaurant),
            Err(RestaurantError::RestaurantNotFound) => None,
            Err(e) => return Err(e),
        };

        if let Some(restaurant) = &stored {
            if data_age(restaurant) < self.data_freshness_ttl {
                record_quick_search(QuickSearchOutcome::Hit);
                return Ok((restaurant.clone(), QuickSearchOutcome::Hit));
            }
            info!(place_id, "Stored restaurant is stale, refreshing from map service");
        }

        let place = match self.map_client.quick_search(place_id).await {
            Ok(place) => place,
            Err(e) => {
                return match stored {
                    Some(restaurant) => {
                        warn!(place_id, "Map service failed, serving stale data due to: {}", e);
                        record_quick_search(QuickSearchOutcome::Stale);
                        Ok((restaurant, QuickSearchOutcome::Stale))
                    }
                    None => {
                        error!(place_id, "Map service failed with nothing stored due to: {}", e);
                        Err(RestaurantError::MapService(e.to_string()))
                    }
                };
            }
        };

        let fresh = converters::place_to_restaurant(&place);
        record_quick_search(QuickSearchOutcome::Refreshed);
        let restaurant = match stored {
            None => {
                if let Err(e) = self.restaurants.create(&fresh).await {
                    warn!(place_id, "Something went wrong saving restaurant due to: {}", e);
                }
                fresh
            }
            Some(mut existing) => {
                converters::apply_refresh(&mut existing, &fresh);
                if let Err(e) = self.restaurants.update(&existing).await {
                    warn!(place_id, "Something went wrong updating restaurant due to: {}", e);
                }
                existing
            }
        };
        Ok((restaurant, QuickSearchOutcome::Refreshed))
    }

    pub async fn add_to_favorites(
        &self,
        user_id: Uuid,
        restaurant_id: Uuid,
    ) -> Result<Favorite, RestaurantError> {
        self.restaurants.find_by_id(restaurant_id).await?;
        if self.favorites.exists(user_id, restaurant_id).await? {
            return Err(RestaurantError::FavoriteAlreadyExists);
        }
        let favorite = Favorite::new(user_id, restaurant_id);
        self.favorites.create(&favorite).await?;
        info!(favorite_id = %favorite.id, user_id = %user_id, "Added to favorites");
        Ok(favorite)
    }

    pub async fn remove_from_favorites(&self, favorite_id: Uuid) -> Result<(), RestaurantError> {
        self.favorites.delete(favorite_id).await
    }

    pub async fn get_user_favorites(&self, user_id: Uuid) -> Result<Vec<Favorite>, RestaurantError> {
        self.favorites.find_by_user_id(user_id).await
    }

    pub async fn get_favorite(&self, favorite_id: Uuid) -> Result<Favorite, RestaurantError> {
        self.favorites.find_by_id(favorite_id).await
    }

    pub async fn is_favorite(
        &self,
        user_id: Uuid,
        restaurant_id: Uuid,
    ) -> Result<bool, RestaurantError> {
        self.favorites.exists(user_id, restaurant_id).await
    }

    pub async fn update_favorite_notes(
        &self,
        favorite_id: Uuid,
        notes: &str,
    ) -> Result<Favorite, RestaurantError> {
        self.modify_favorite(favorite_id, |f| f.update_notes(notes)).await
    }

    pub async fn add_favorite_tag(
        &self,
        favorite_id: Uuid,
        tag: &str,
    ) -> Result<Favorite, RestaurantError> {
        self.modify_favorite(favorite_id, |f| f.add_tag(tag)).await
    }

    pub async fn remove_favorite_tag(
        &self,
        favorite_id: Uuid,
        tag: &str,
    ) -> Result<Favorite, RestaurantError> {
        self.modify_favorite(favorite_id, |f| f.remove_tag(tag)).await
    }

    pub async fn add_visit(&self, favorite_id: Uuid) -> Result<Favorite, RestaurantError> {
        self.modify_favorite(favorite_id, Favorite::add_visit).await
    }

    /// Loads a favorite, applies `change` and persists it in one write.
    pub async fn modify_favorite<F>(
        &self,
        favorite_id: Uuid,
        change: F,
    ) -> Result<Favorite, RestaurantError>
    where
        F: FnOnce(&mut Favorite) + Send,
    {
        let mut favorite = self.favorites.find_by_id(favorite_id).await?;
        change(&mut favorite);
        self.favorites.update(&favorite).await?;
        Ok(favorite)
    }
}

pub fn data_age(restaurant: &Restaurant) -> Duration {
    let age = OffsetDateTime::now_utc() - restaurant.updated_at;
    age.try_into().unwrap_or(Duration::ZERO)
}

fn record_quick_search(outcome: QuickSearchOutcome) {
    metrics::counter!("restaurant_quick_search_total", "cache" => outcome.as_str()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::place::{LocalizedText, Place};
    use crate::repositories::memory_repo::{InMemoryFavoriteRepo, InMemoryRestaurantRepo};
    use crate::services::places_client::MapError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubMap {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl MapServiceClient for StubMap {
        async fn quick_search(&self, place_id: &str) -> Result<Place, MapError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(MapError::Transport("connection refused".into()));
            }
            Ok(Place {
                id: place_id.to_string(),
                display_name: Some(LocalizedText {
                    text: "Fresh Ramen".into(),
                    language_code: "en".into(),
                }),
                rating: Some(4.2),
                ..Default::default()
            })
        }
    }

    fn service(fail: bool) -> (RestaurantService, Arc<InMemoryRestaurantRepo>, Arc<StubMap>) {
        let repo = Arc::new(InMemoryRestaurantRepo::new());
        let map = Arc::new(StubMap {
            calls: AtomicUsize::new(0),
            fail,
        });
        let service = RestaurantService::new(
            repo.clone(),
            Arc::new(InMemoryFavoriteRepo::new()),
            map.clone(),
            Duration::from_secs(3600),
        );
        (service, repo, map)
    }

    fn stale_restaurant(place_id: &str) -> Restaurant {
        let mut restaurant = Restaurant::new("Old Ramen", RestaurantSource::Google, place_id, None);
        restaurant.updated_at = OffsetDateTime::now_utc() - time::Duration::days(10);
        restaurant
    }

    fn create_request(external_id: &str) -> CreateRestaurantRequest {
        CreateRestaurantRequest {
            name: "Sushi Dai".into(),
            source: RestaurantSource::Tabelog,
            external_id: external_id.into(),
            name_ja: "寿司大".into(),
            area: "tokyo".into(),
            address: "Toyosu".into(),
            latitude: Some(35.64),
            longitude: Some(139.78),
            rating: 4.5,
            price_range: "$$$".into(),
            cuisine_type: "sushi".into(),
            phone: String::new(),
            website: String::new(),
            opening_hours: HashMap::new(),
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn quick_search_miss_then_hit() {
        let (service, _, map) = service(false);

        let (first, outcome) = service.quick_search_by_place_id("ChIJ1").await.unwrap();
        assert_eq!(outcome, QuickSearchOutcome::Refreshed);
        assert_eq!(first.name, "Fresh Ramen");

        let (second, outcome) = service.quick_search_by_place_id("ChIJ1").await.unwrap();
        assert_eq!(outcome, QuickSearchOutcome::Hit);
        assert_eq!(second.id, first.id);
        assert_eq!(map.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_rows_are_refreshed_in_place() {
        let (service, repo, _) = service(false);
        let stale = stale_restaurant("ChIJ2");
        repo.create(&stale).await.unwrap();

        let (refreshed, outcome) = service.quick_search_by_place_id("ChIJ2").await.unwrap();
        assert_eq!(outcome, QuickSearchOutcome::Refreshed);
        assert_eq!(refreshed.id, stale.id);
        assert_eq!(refreshed.name, "Fresh Ramen");
        assert_eq!(repo.find_by_id(stale.id).await.unwrap().rating, 4.2);
    }

    #[tokio::test]
    async fn map_failure_degrades_to_stale_data() {
        let (service, repo, _) = service(true);
        let stale = stale_restaurant("ChIJ3");
        repo.create(&stale).await.unwrap();

        let (restaurant, outcome) = service.quick_search_by_place_id("ChIJ3").await.unwrap();
        assert_eq!(outcome, QuickSearchOutcome::Stale);
        assert_eq!(restaurant.name, "Old Ramen");

        assert!(matches!(
            service.quick_search_by_place_id("ChIJ-unknown").await,
            Err(RestaurantError::MapService(_))
        ));
    }

    #[tokio::test]
    async fn create_and_update_restaurant() {
        let (service, _, _) = service(false);
        let created = service.create_restaurant(create_request("t-1")).await.unwrap();
        assert_eq!(created.name_ja, "寿司大");
        assert_eq!(
            service.create_restaurant(create_request("t-1")).await.unwrap_err(),
            RestaurantError::RestaurantAlreadyExists
        );

        let updated = service
            .update_restaurant(
                created.id,
                UpdateRestaurantRequest {
                    details: RestaurantDetails {
                        phone: "03-1234-5678".into(),
                        ..Default::default()
                    },
                    latitude: 0.0,
                    longitude: 139.0,
                    rating: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.phone, "03-1234-5678");
        assert_eq!(updated.name, "Sushi Dai");
        assert_eq!(updated.location, created.location);

        let viewed = service.increment_view_count(created.id).await.unwrap();
        assert_eq!(viewed.view_count, 1);

        service.delete_restaurant(created.id).await.unwrap();
        assert_eq!(
            service.get_restaurant(created.id).await.unwrap_err(),
            RestaurantError::RestaurantNotFound
        );
    }

    #[tokio::test]
    async fn favorites_lifecycle() {
        let (service, _, _) = service(false);
        let restaurant = service.create_restaurant(create_request("t-2")).await.unwrap();
        let user_id = Uuid::new_v4();

        let favorite = service.add_to_favorites(user_id, restaurant.id).await.unwrap();
        assert_eq!(
            service.add_to_favorites(user_id, restaurant.id).await.unwrap_err(),
            RestaurantError::FavoriteAlreadyExists
        );
        assert_eq!(
            service.add_to_favorites(user_id, Uuid::new_v4()).await.unwrap_err(),
            RestaurantError::RestaurantNotFound
        );

        service.update_favorite_notes(favorite.id, "order the otoro").await.unwrap();
        service.add_favorite_tag(favorite.id, "date-night").await.unwrap();
        let visited = service.add_visit(favorite.id).await.unwrap();
        assert_eq!(visited.visit_count, 1);
        assert_eq!(visited.notes, "order the otoro");
        assert!(visited.has_tag("date-night"));

        assert!(service.is_favorite(user_id, restaurant.id).await.unwrap());
        service.remove_from_favorites(favorite.id).await.unwrap();
        assert!(!service.is_favorite(user_id, restaurant.id).await.unwrap());
        assert!(service.get_user_favorites(user_id).await.unwrap().is_empty());
    }
}
