use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::helpers::auth::{AuthUser, RequireAdmin};
use crate::services::jwt::JwtManager;
use crate::services::restaurant_service::{
    data_age, CreateRestaurantRequest, QuickSearchOutcome, RestaurantService,
    UpdateRestaurantRequest,
};

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;
pub const DEFAULT_RADIUS_KM: f64 = 1.0;

pub fn router(restaurant_service: Arc<RestaurantService>, jwt: Arc<JwtManager>) -> Router {
    Router::new()
        .route(
            "/api/v1/restaurants",
            get(list_restaurants).post(create_restaurant),
        )
        .route("/api/v1/restaurants/search", get(search_restaurants))
        .route("/api/v1/restaurants/nearby", get(nearby_restaurants))
        .route(
            "/api/v1/restaurants/quick-search/:place_id",
            get(quick_search_by_place_id),
        )
        .route(
            "/api/v1/restaurants/:id",
            get(get_restaurant)
                .patch(update_restaurant)
                .delete(delete_restaurant),
        )
        .route_layer(Extension(restaurant_service))
        .route_layer(Extension(jwt))
}

pub(crate) fn parse_uuid(raw: &str, what: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::invalid_request(format!("invalid {}", what)))
}

fn page_size(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

#[derive(Clone, Deserialize, Debug, Default)]
pub struct ListParams {
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
    pub cuisine_type: Option<String>,
}

pub async fn list_restaurants(
    Extension(restaurant_service): Extension<Arc<RestaurantService>>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(params) = params?;
    let limit = page_size(params.limit);

    let body = match params.cuisine_type.as_deref().map(str::trim) {
        Some(cuisine) if !cuisine.is_empty() => {
            let restaurants = restaurant_service
                .find_by_cuisine_type(cuisine, limit, params.offset)
                .await?;
            json!({ "total": restaurants.len(), "restaurants": restaurants })
        }
        _ => {
            let (restaurants, total) = restaurant_service
                .list_restaurants(limit, params.offset)
                .await?;
            json!({ "restaurants": restaurants, "total": total })
        }
    };
    Ok(Json(body).into_response())
}

pub async fn create_restaurant(
    Extension(restaurant_service): Extension<Arc<RestaurantService>>,
    RequireAdmin(admin): RequireAdmin,
    payload: Result<Json<CreateRestaurantRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = payload?;
    let restaurant = restaurant_service.create_restaurant(body).await?;
    info!(restaurant_id = %restaurant.id, admin_id = %admin.user_id, "Restaurant created");
    Ok((StatusCode::CREATED, Json(json!({ "restaurant": restaurant }))).into_response())
}

pub async fn get_restaurant(
    Extension(restaurant_service): Extension<Arc<RestaurantService>>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Response, AppError> {
    let Path(id) = id?;
    let restaurant = restaurant_service
        .increment_view_count(parse_uuid(&id, "restaurant ID")?)
        .await?;
    Ok(Json(json!({ "restaurant": restaurant })).into_response())
}

pub async fn update_restaurant(
    Extension(restaurant_service): Extension<Arc<RestaurantService>>,
    _user: AuthUser,
    id: Result<Path<String>, PathRejection>,
    payload: Result<Json<UpdateRestaurantRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Path(id) = id?;
    let id = parse_uuid(&id, "restaurant ID")?;
    let Json(body) = payload?;
    let restaurant = restaurant_service.update_restaurant(id, body).await?;
    Ok(Json(json!({ "restaurant": restaurant })).into_response())
}

pub async fn delete_restaurant(
    Extension(restaurant_service): Extension<Arc<RestaurantService>>,
    RequireAdmin(_admin): RequireAdmin,
    id: Result<Path<String>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let Path(id) = id?;
    restaurant_service
        .delete_restaurant(parse_uuid(&id, "restaurant ID")?)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Clone, Deserialize, Debug, Default)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

pub async fn search_restaurants(
    Extension(restaurant_service): Extension<Arc<RestaurantService>>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(params) = params?;
    if params.q.trim().is_empty() {
        return Err(AppError::invalid_request("query parameter q is required"));
    }
    let restaurants = restaurant_service
        .search_restaurants(&params.q, page_size(params.limit), params.offset)
        .await?;
    Ok(Json(json!({ "total": restaurants.len(), "restaurants": restaurants })).into_response())
}

#[derive(Clone, Deserialize, Debug)]
pub struct NearbyParams {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: Option<f64>,
    pub limit: Option<usize>,
}

pub async fn nearby_restaurants(
    Extension(restaurant_service): Extension<Arc<RestaurantService>>,
    params: Result<Query<NearbyParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(params) = params?;
    let restaurants = restaurant_service
        .find_by_location(
            params.lat,
            params.lng,
            params.radius_km.unwrap_or(DEFAULT_RADIUS_KM),
            page_size(params.limit),
        )
        .await?;
    Ok(Json(json!({ "total": restaurants.len(), "restaurants": restaurants })).into_response())
}

/// Header values describing where a quick search answer came from.
pub fn cache_headers(outcome: QuickSearchOutcome) -> (&'static str, &'static str) {
    match outcome {
        QuickSearchOutcome::Hit => ("HIT", "CACHE"),
        QuickSearchOutcome::Refreshed => ("MISS", "MAP_SERVICE"),
        QuickSearchOutcome::Stale => ("STALE", "CACHE"),
    }
}

pub async fn quick_search_by_place_id(
    Extension(restaurant_service): Extension<Arc<RestaurantService>>,
    place_id: Result<Path<String>, PathRejection>,
) -> Result<Response, AppError> {
    let Path(place_id) = place_id?;
    let place_id = place_id.trim();
    if place_id.is_empty() {
        return Err(AppError::invalid_request("place ID is required"));
    }

    let (restaurant, outcome) = restaurant_service
        .quick_search_by_place_id(place_id)
        .await?;
    let age = data_age(&restaurant);
    let (cache_status, data_source) = cache_headers(outcome);
    info!(
        place_id,
        restaurant_id = %restaurant.id,
        cache_status,
        data_age_seconds = age.as_secs(),
        "Quick search by place id served"
    );

    let mut response = Json(json!({ "restaurant": restaurant })).into_response();
    let headers = response.headers_mut();
    headers.insert("x-cache-status", HeaderValue::from_static(cache_status));
    headers.insert("x-data-source", HeaderValue::from_static(data_source));
    if let Ok(value) = HeaderValue::from_str(&format!("{}s", age.as_secs())) {
        headers.insert("x-data-age", value);
    }
    Ok(response)
}
