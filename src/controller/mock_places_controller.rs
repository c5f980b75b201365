//! A stand-in for the Google Places API (v1) so the map service can run without
//! a key. Serves text search, place details and photo media from a fixed data set.

use std::path::Path as FsPath;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::Path;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::MockMapConfig;
use crate::models::place::{
    LatLng, LocalizedText, OpeningHours, Photo, Place, SearchTextRequest, SearchTextResponse,
};

pub const SERVICE_NAME: &str = "mock-map-service";
const MAX_RESULTS: usize = 20;

/// 1x1 transparent PNG.
pub const PLACEHOLDER_PNG: [u8; 67] = [
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

#[derive(Clone, Copy, Debug, Default)]
pub struct LatencyConfig {
    pub enabled: bool,
    pub min: Duration,
    pub max: Duration,
}

impl LatencyConfig {
    pub fn delay(&self) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        let spread = self.max.saturating_sub(self.min).as_millis() as u64;
        if spread == 0 {
            return self.min;
        }
        self.min + Duration::from_millis(rand::random::<u64>() % spread)
    }

    async fn simulate(&self) {
        let delay = self.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

pub struct MockPlaces {
    places: Vec<Place>,
    latency: LatencyConfig,
}

impl MockPlaces {
    pub fn new(places: Vec<Place>, latency: LatencyConfig) -> Self {
        Self { places, latency }
    }

    pub fn from_config(config: &MockMapConfig) -> Self {
        let places = match config.mock_places_file.as_deref() {
            Some(path) => load_places(FsPath::new(path)),
            None => default_places(),
        };
        let latency = LatencyConfig {
            enabled: config.mock_latency_enabled,
            min: Duration::from_millis(config.mock_latency_min_ms),
            max: Duration::from_millis(config.mock_latency_max_ms),
        };
        Self::new(places, latency)
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    /// Case-insensitive substring match on the display name.
    pub fn search(&self, text_query: &str, max_results: Option<u32>) -> Vec<Place> {
        let query = text_query.to_lowercase();
        let limit = max_results
            .map(|max| (max as usize).clamp(1, MAX_RESULTS))
            .unwrap_or(MAX_RESULTS);
        self.places
            .iter()
            .filter(|place| place.display_name().to_lowercase().contains(&query))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn find(&self, place_id: &str) -> Option<&Place> {
        self.places.iter().find(|place| place.id == place_id)
    }
}

/// Accepts either a bare JSON array of places or `{"places": [...]}`.
/// Anything unreadable falls back to the built-in data set.
pub fn load_places(path: &FsPath) -> Vec<Place> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("No mock places file at {} due to: {}, using default data", path.display(), e);
            return default_places();
        }
    };
    let parsed = serde_json::from_str::<Vec<Place>>(&raw)
        .or_else(|_| serde_json::from_str::<SearchTextResponse>(&raw).map(|r| r.places));
    match parsed {
        Ok(places) => {
            info!(count = places.len(), "Loaded mock places from {}", path.display());
            places
        }
        Err(e) => {
            warn!("Something went wrong parsing {} due to: {}, using default data", path.display(), e);
            default_places()
        }
    }
}

pub fn router(mock: Arc<MockPlaces>) -> Router {
    // `places:searchText` is not a valid route segment, so everything under /v1 is
    // dispatched by hand.
    Router::new()
        .route("/v1/*path", get(get_resource).post(post_resource))
        .route_layer(Extension(mock))
}

async fn post_resource(
    Extension(mock): Extension<Arc<MockPlaces>>,
    Path(path): Path<String>,
    payload: Result<Json<SearchTextRequest>, JsonRejection>,
) -> Response {
    if path.trim_start_matches('/') != "places:searchText" {
        return not_found("route not found");
    }
    let Ok(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid request"}))).into_response();
    };

    mock.latency.simulate().await;
    debug!(text_query = %request.text_query, "Mock text search");
    let places = mock.search(&request.text_query, request.max_result_count);
    Json(SearchTextResponse { places }).into_response()
}

async fn get_resource(
    Extension(mock): Extension<Arc<MockPlaces>>,
    Path(path): Path<String>,
) -> Response {
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match segments.as_slice() {
        ["places", place_id] => {
            mock.latency.simulate().await;
            debug!(place_id, "Mock place details");
            match mock.find(place_id) {
                Some(place) => Json(place.clone()).into_response(),
                None => not_found("place not found"),
            }
        }
        [.., "media"] if segments.len() > 1 => {
            debug!(photo = %path, "Mock photo media");
            ([(CONTENT_TYPE, "image/png")], PLACEHOLDER_PNG.to_vec()).into_response()
        }
        _ => not_found("route not found"),
    }
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
}

fn weekly_hours(weekdays: &str, weekend: &str) -> Vec<String> {
    ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"]
        .iter()
        .map(|day| format!("{}: {}", day, weekdays))
        .chain(
            ["Saturday", "Sunday"]
                .iter()
                .map(|day| format!("{}: {}", day, weekend)),
        )
        .collect()
}

fn mock_place(
    id: &str,
    name: &str,
    address: &str,
    (latitude, longitude): (f64, f64),
    rating: f64,
    rating_count: i64,
    price_level: &str,
    cuisine: &str,
) -> Place {
    Place {
        id: id.to_string(),
        display_name: Some(LocalizedText {
            text: name.to_string(),
            language_code: "ja".to_string(),
        }),
        formatted_address: Some(address.to_string()),
        location: Some(LatLng {
            latitude,
            longitude,
        }),
        rating: Some(rating),
        user_rating_count: Some(rating_count),
        price_level: Some(price_level.to_string()),
        types: vec![
            "restaurant".to_string(),
            cuisine.to_string(),
            "food".to_string(),
        ],
        ..Default::default()
    }
}

/// Tokyo ramen, Osaka sushi and Kyoto tempura.
pub fn default_places() -> Vec<Place> {
    let mut ramen = mock_place(
        "mock_tokyo_ramen_1",
        "一蘭拉麵 (Mock)",
        "東京都新宿區歌舞伎町1-1-1",
        (35.6938, 139.7034),
        4.5,
        5000,
        "PRICE_LEVEL_MODERATE",
        "ramen_restaurant",
    );
    ramen.national_phone_number = Some("03-1234-5678".to_string());
    ramen.website_uri = Some("https://example.com/mock-ramen".to_string());
    ramen.photos = vec![Photo {
        name: "places/mock_tokyo_ramen_1/photos/photo1".to_string(),
        width_px: 1200,
        height_px: 800,
    }];
    ramen.current_opening_hours = Some(OpeningHours {
        open_now: Some(true),
        weekday_descriptions: weekly_hours("11:00 AM – 10:00 PM", "11:00 AM – 11:00 PM"),
    });
    ramen.regular_opening_hours = ramen.current_opening_hours.clone();

    let mut sushi = mock_place(
        "mock_osaka_sushi_1",
        "すしざんまい (Mock)",
        "大阪府大阪市中央區道頓堀1-1-1",
        (34.6686, 135.5004),
        4.7,
        3000,
        "PRICE_LEVEL_EXPENSIVE",
        "sushi_restaurant",
    );
    sushi.national_phone_number = Some("06-1234-5678".to_string());
    sushi.website_uri = Some("https://example.com/mock-sushi".to_string());
    sushi.photos = vec![Photo {
        name: "places/mock_osaka_sushi_1/photos/photo1".to_string(),
        width_px: 1200,
        height_px: 800,
    }];

    let mut tempura = mock_place(
        "mock_kyoto_tempura_1",
        "天ぷら京都 (Mock)",
        "京都府京都市東山區祇園町1-1-1",
        (35.0036, 135.7681),
        4.6,
        2000,
        "PRICE_LEVEL_EXPENSIVE",
        "japanese_restaurant",
    );
    tempura.national_phone_number = Some("075-1234-5678".to_string());
    tempura.website_uri = Some("https://example.com/mock-tempura".to_string());

    vec![ramen, sushi, tempura]
}
