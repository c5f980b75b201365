mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::Router;
use serde_json::json;

use common::{request, send, settings, spawn};
use tabelogo::controller::mock_places_controller::{self, default_places, LatencyConfig, MockPlaces};
use tabelogo::controller::{application, map_controller};
use tabelogo::repositories::place_cache::PlaceCache;
use tabelogo::services::map_service::MapService;
use tabelogo::services::places_client::HttpPlacesClient;

fn app() -> Router {
    let mock = MockPlaces::new(default_places(), LatencyConfig::default());
    let mock_url = spawn("mock-map-service", mock_places_controller::router(Arc::new(mock)));
    let map_service = MapService::new(
        Arc::new(HttpPlacesClient::mock(&mock_url).unwrap()),
        PlaceCache::new(Duration::from_secs(60)),
    );
    application(
        map_controller::router(Arc::new(map_service)),
        &settings("map-service", None),
    )
}

#[tokio::test]
async fn quick_search_is_cache_first() {
    let app = app();
    let body = json!({"place_id": "mock_osaka_sushi_1", "language_code": "ja"});

    let (status, first) = send(&app, request("POST", "/api/v1/map/quick_search", Some(body.clone()), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["source"], "google");
    assert_eq!(first["result"]["displayName"]["text"], "すしざんまい (Mock)");

    let (_, second) = send(&app, request("POST", "/api/v1/map/quick_search", Some(body), None)).await;
    assert_eq!(second["source"], "cache");
    assert!(second["cached_at"].is_string());
}

#[tokio::test]
async fn quick_search_errors() {
    let app = app();

    let (status, _) = send(
        &app,
        request("POST", "/api/v1/map/quick_search", Some(json!({"place_id": " "})), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        request("POST", "/api/v1/map/quick_search", Some(json!({"place_id": "nope"})), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/v1/map/quick_search",
            Some(json!({"place_id": "mock_osaka_sushi_1", "language_code": "fr"})),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn advance_search_filters_results() {
    let app = app();
    let body = json!({
        "text_query": "mock",
        "location_bias": {"rectangle": {
            "low": {"latitude": 34.0, "longitude": 135.0},
            "high": {"latitude": 36.0, "longitude": 140.0}
        }},
        "max_result_count": 10,
        "min_rating": 4.6,
    });
    let (status, body) = send(&app, request("POST", "/api/v1/map/advance_search", Some(body), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 2);
    assert_eq!(body["search_metadata"]["text_query"], "mock");

    let (_, body) = send(
        &app,
        request(
            "POST",
            "/api/v1/map/advance_search",
            Some(json!({"text_query": "mock", "open_now": true})),
            None,
        ),
    )
    .await;
    assert_eq!(body["total_count"], 1);
    assert_eq!(body["places"][0]["id"], "mock_tokyo_ramen_1");
}

#[tokio::test]
async fn advance_search_validates_input() {
    let app = app();
    let (status, body) = send(
        &app,
        request("POST", "/api/v1/map/advance_search", Some(json!({"text_query": "mock", "max_result_count": 50})), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
}
