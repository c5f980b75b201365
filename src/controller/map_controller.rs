use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::routing::post;
use axum::{Extension, Json, Router};

use crate::error::AppError;
use crate::services::map_service::{
    AdvanceSearchRequest, AdvanceSearchResponse, MapService, QuickSearchRequest,
    QuickSearchResponse,
};

pub fn router(map_service: Arc<MapService>) -> Router {
    Router::new()
        .route("/api/v1/map/quick_search", post(quick_search))
        .route("/api/v1/map/advance_search", post(advance_search))
        .route_layer(Extension(map_service))
}

pub async fn quick_search(
    Extension(map_service): Extension<Arc<MapService>>,
    payload: Result<Json<QuickSearchRequest>, JsonRejection>,
) -> Result<Json<QuickSearchResponse>, AppError> {
    let Json(body) = payload?;
    let response = map_service.quick_search(body).await?;
    Ok(Json(response))
}

pub async fn advance_search(
    Extension(map_service): Extension<Arc<MapService>>,
    payload: Result<Json<AdvanceSearchRequest>, JsonRejection>,
) -> Result<Json<AdvanceSearchResponse>, AppError> {
    let Json(body) = payload?;
    let response = map_service.advance_search(body).await?;
    Ok(Json(response))
}
