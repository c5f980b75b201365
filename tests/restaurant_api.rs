mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use common::{jwt, request, send, settings, spawn, token};
use tabelogo::controller::mock_places_controller::{self, default_places, LatencyConfig, MockPlaces};
use tabelogo::controller::{application, favorites_controller, map_controller, restaurant_controller};
use tabelogo::models::user::Role;
use tabelogo::repositories::memory_repo::{InMemoryFavoriteRepo, InMemoryRestaurantRepo};
use tabelogo::repositories::place_cache::PlaceCache;
use tabelogo::services::jwt::JwtManager;
use tabelogo::services::map_client::HttpMapClient;
use tabelogo::services::map_service::MapService;
use tabelogo::services::places_client::HttpPlacesClient;
use tabelogo::services::restaurant_service::RestaurantService;

struct Harness {
    app: Router,
    jwt: Arc<JwtManager>,
}

fn harness(map_service_url: &str) -> Harness {
    let jwt = jwt();
    let restaurant_service = Arc::new(RestaurantService::new(
        Arc::new(InMemoryRestaurantRepo::new()),
        Arc::new(InMemoryFavoriteRepo::new()),
        Arc::new(HttpMapClient::new(map_service_url).unwrap()),
        Duration::from_secs(3600),
    ));
    let routes = restaurant_controller::router(restaurant_service.clone(), jwt.clone())
        .merge(favorites_controller::router(restaurant_service, jwt.clone()));
    Harness {
        app: application(routes, &settings("restaurant-service", Some(jwt.clone()))),
        jwt,
    }
}

/// Mock Places API behind a real map service, both on ephemeral ports.
fn map_service_chain() -> String {
    let mock = MockPlaces::new(default_places(), LatencyConfig::default());
    let mock_url = spawn("mock-map-service", mock_places_controller::router(Arc::new(mock)));
    let map_service = MapService::new(
        Arc::new(HttpPlacesClient::mock(&mock_url).unwrap()),
        PlaceCache::new(Duration::from_secs(60)),
    );
    spawn("map-service", map_controller::router(Arc::new(map_service)))
}

async fn create(harness: &Harness, body: Value) -> Value {
    let admin = token(&harness.jwt, Uuid::new_v4(), Role::Admin);
    let (status, body) = send(
        &harness.app,
        request("POST", "/api/v1/restaurants", Some(body), Some(&admin)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["restaurant"].clone()
}

fn ramen() -> Value {
    json!({
        "name": "Ichiran Shinjuku",
        "source": "google",
        "external_id": "ChIJ-ichiran",
        "address": "Shinjuku, Tokyo",
        "latitude": 35.6938,
        "longitude": 139.7034,
        "rating": 4.5,
        "cuisine_type": "ramen",
    })
}

#[tokio::test]
async fn only_admins_create_restaurants() {
    let harness = harness("http://127.0.0.1:9");
    let user = token(&harness.jwt, Uuid::new_v4(), Role::User);

    let (status, _) = send(&harness.app, request("POST", "/api/v1/restaurants", Some(ramen()), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &harness.app,
        request("POST", "/api/v1/restaurants", Some(ramen()), Some(&user)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let restaurant = create(&harness, ramen()).await;
    assert_eq!(restaurant["name"], "Ichiran Shinjuku");
    assert_eq!(restaurant["view_count"], 0);
}

#[tokio::test]
async fn list_search_and_nearby() {
    let harness = harness("http://127.0.0.1:9");
    create(&harness, ramen()).await;
    create(
        &harness,
        json!({
            "name": "Sushi Zanmai",
            "source": "google",
            "external_id": "ChIJ-zanmai",
            "latitude": 34.6686,
            "longitude": 135.5004,
            "cuisine_type": "sushi",
        }),
    )
    .await;

    let (status, body) = send(&harness.app, request("GET", "/api/v1/restaurants", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);

    let (_, body) = send(
        &harness.app,
        request("GET", "/api/v1/restaurants?cuisine_type=sushi", None, None),
    )
    .await;
    assert_eq!(body["restaurants"][0]["name"], "Sushi Zanmai");

    let (_, body) = send(&harness.app, request("GET", "/api/v1/restaurants/search?q=ichiran", None, None)).await;
    assert_eq!(body["total"], 1);

    let (status, _) = send(&harness.app, request("GET", "/api/v1/restaurants/search", None, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(
        &harness.app,
        request("GET", "/api/v1/restaurants/nearby?lat=35.69&lng=139.70&radius_km=2", None, None),
    )
    .await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["restaurants"][0]["name"], "Ichiran Shinjuku");
}

#[tokio::test]
async fn huge_offsets_page_past_the_end() {
    let harness = harness("http://127.0.0.1:9");
    create(&harness, ramen()).await;

    let uri = format!("/api/v1/restaurants?offset={}", u64::MAX);
    let (status, body) = send(&harness.app, request("GET", &uri, None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["restaurants"], json!([]));
}

#[tokio::test]
async fn get_counts_views_and_delete_hides() {
    let harness = harness("http://127.0.0.1:9");
    let restaurant = create(&harness, ramen()).await;
    let uri = format!("/api/v1/restaurants/{}", restaurant["id"].as_str().unwrap());

    send(&harness.app, request("GET", &uri, None, None)).await;
    let (status, body) = send(&harness.app, request("GET", &uri, None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["restaurant"]["view_count"], 2);

    let admin = token(&harness.jwt, Uuid::new_v4(), Role::Admin);
    let (status, _) = send(&harness.app, request("DELETE", &uri, None, Some(&admin))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&harness.app, request("GET", &uri, None, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&harness.app, request("GET", "/api/v1/restaurants/not-a-uuid", None, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn favorites_belong_to_their_owner() {
    let harness = harness("http://127.0.0.1:9");
    let restaurant = create(&harness, ramen()).await;
    let owner_id = Uuid::new_v4();
    let owner = token(&harness.jwt, owner_id, Role::User);
    let stranger = token(&harness.jwt, Uuid::new_v4(), Role::User);

    let (status, body) = send(
        &harness.app,
        request(
            "POST",
            "/api/v1/favorites",
            Some(json!({"restaurant_id": restaurant["id"], "notes": "go early", "tags": ["ramen", "late-night"]})),
            Some(&owner),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["favorite"]["notes"], "go early");
    let uri = format!("/api/v1/favorites/{}", body["favorite"]["id"].as_str().unwrap());

    let (status, _) = send(&harness.app, request("GET", &uri, None, Some(&stranger))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &harness.app,
        request(
            "PATCH",
            &uri,
            Some(json!({"remove_tags": ["late-night"], "visit": true})),
            Some(&owner),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["favorite"]["visit_count"], 1);
    assert_eq!(body["favorite"]["tags"], json!(["ramen"]));

    let list = format!("/api/v1/users/{}/favorites?tag=ramen", owner_id);
    let (status, body) = send(&harness.app, request("GET", &list, None, Some(&owner))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let (status, _) = send(&harness.app, request("GET", &list, None, Some(&stranger))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&harness.app, request("DELETE", &uri, None, Some(&owner))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn quick_search_goes_through_the_map_service_once() {
    let harness = harness(&map_service_chain());
    let uri = "/api/v1/restaurants/quick-search/mock_tokyo_ramen_1";

    let response = harness
        .app
        .clone()
        .oneshot(request("GET", uri, None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-cache-status"], "MISS");
    assert_eq!(response.headers()["x-data-source"], "MAP_SERVICE");
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["restaurant"]["external_id"], "mock_tokyo_ramen_1");
    assert_eq!(body["restaurant"]["source"], "google");

    let response = harness
        .app
        .clone()
        .oneshot(request("GET", uri, None, None))
        .await
        .unwrap();
    assert_eq!(response.headers()["x-cache-status"], "HIT");
    assert_eq!(response.headers()["x-data-source"], "CACHE");
    assert!(response.headers()["x-data-age"].to_str().unwrap().ends_with('s'));
}

#[tokio::test]
async fn quick_search_without_data_or_map_service_fails() {
    let harness = harness("http://127.0.0.1:9");
    let (status, body) = send(
        &harness.app,
        request("GET", "/api/v1/restaurants/quick-search/ChIJ-unknown", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "internal_error");
}
