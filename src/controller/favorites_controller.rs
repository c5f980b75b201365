use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::controller::restaurant_controller::parse_uuid;
use crate::error::AppError;
use crate::helpers::auth::AuthUser;
use crate::models::favorite::Favorite;
use crate::services::jwt::JwtManager;
use crate::services::restaurant_service::RestaurantService;

pub fn router(restaurant_service: Arc<RestaurantService>, jwt: Arc<JwtManager>) -> Router {
    Router::new()
        .route("/api/v1/favorites", post(add_favorite))
        .route(
            "/api/v1/favorites/:id",
            get(get_favorite)
                .patch(update_favorite)
                .delete(remove_favorite),
        )
        .route("/api/v1/users/:user_id/favorites", get(user_favorites))
        .route_layer(Extension(restaurant_service))
        .route_layer(Extension(jwt))
}

#[derive(Clone, Deserialize, Debug)]
pub struct AddFavoriteRequest {
    pub restaurant_id: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Clone, Deserialize, Debug, Default)]
pub struct UpdateFavoriteRequest {
    pub notes: Option<String>,
    #[serde(default)]
    pub add_tags: Vec<String>,
    #[serde(default)]
    pub remove_tags: Vec<String>,
    /// Records a visit when true.
    #[serde(default)]
    pub visit: bool,
}

impl UpdateFavoriteRequest {
    fn apply(self, favorite: &mut Favorite) {
        if let Some(notes) = self.notes {
            favorite.update_notes(notes);
        }
        for tag in &self.add_tags {
            favorite.add_tag(tag.trim());
        }
        for tag in &self.remove_tags {
            favorite.remove_tag(tag.trim());
        }
        if self.visit {
            favorite.add_visit();
        }
    }
}

/// Loads a favorite the caller is allowed to touch.
async fn owned_favorite(
    restaurant_service: &RestaurantService,
    user: &AuthUser,
    favorite_id: Uuid,
) -> Result<Favorite, AppError> {
    let favorite = restaurant_service.get_favorite(favorite_id).await?;
    if !user.can_access(favorite.user_id) {
        return Err(AppError::forbidden("favorite belongs to another user"));
    }
    Ok(favorite)
}

pub async fn add_favorite(
    Extension(restaurant_service): Extension<Arc<RestaurantService>>,
    user: AuthUser,
    payload: Result<Json<AddFavoriteRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = payload?;
    let restaurant_id = parse_uuid(&body.restaurant_id, "restaurant ID")?;

    let mut favorite = restaurant_service
        .add_to_favorites(user.user_id, restaurant_id)
        .await?;
    if body.notes.is_some() || !body.tags.is_empty() {
        let update = UpdateFavoriteRequest {
            notes: body.notes,
            add_tags: body.tags,
            ..Default::default()
        };
        favorite = restaurant_service
            .modify_favorite(favorite.id, |f| update.apply(f))
            .await?;
    }
    Ok((StatusCode::CREATED, Json(json!({ "favorite": favorite }))).into_response())
}

pub async fn get_favorite(
    Extension(restaurant_service): Extension<Arc<RestaurantService>>,
    user: AuthUser,
    id: Result<Path<String>, PathRejection>,
) -> Result<Response, AppError> {
    let Path(id) = id?;
    let favorite = owned_favorite(&restaurant_service, &user, parse_uuid(&id, "favorite ID")?).await?;
    Ok(Json(json!({ "favorite": favorite })).into_response())
}

pub async fn update_favorite(
    Extension(restaurant_service): Extension<Arc<RestaurantService>>,
    user: AuthUser,
    id: Result<Path<String>, PathRejection>,
    payload: Result<Json<UpdateFavoriteRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Path(id) = id?;
    let favorite_id = parse_uuid(&id, "favorite ID")?;
    let Json(body) = payload?;

    owned_favorite(&restaurant_service, &user, favorite_id).await?;
    let favorite = restaurant_service
        .modify_favorite(favorite_id, |f| body.apply(f))
        .await?;
    Ok(Json(json!({ "favorite": favorite })).into_response())
}

pub async fn remove_favorite(
    Extension(restaurant_service): Extension<Arc<RestaurantService>>,
    user: AuthUser,
    id: Result<Path<String>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let Path(id) = id?;
    let favorite_id = parse_uuid(&id, "favorite ID")?;
    owned_favorite(&restaurant_service, &user, favorite_id).await?;
    restaurant_service.remove_from_favorites(favorite_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Clone, Deserialize, Debug, Default)]
pub struct FavoritesParams {
    pub tag: Option<String>,
}

pub async fn user_favorites(
    Extension(restaurant_service): Extension<Arc<RestaurantService>>,
    user: AuthUser,
    user_id: Result<Path<String>, PathRejection>,
    params: Result<Query<FavoritesParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let Path(user_id) = user_id?;
    let Query(params) = params?;
    let owner = parse_uuid(&user_id, "user ID")?;
    if !user.can_access(owner) {
        return Err(AppError::forbidden("cannot list another user's favorites"));
    }

    let mut favorites = restaurant_service.get_user_favorites(owner).await?;
    if let Some(tag) = params.tag.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        favorites.retain(|favorite| favorite.has_tag(tag));
    }
    Ok(Json(json!({ "total": favorites.len(), "favorites": favorites })).into_response())
}
