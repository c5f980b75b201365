use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::place::{Place, SearchTextRequest, SearchTextResponse};

pub const DEFAULT_DETAILS_FIELD_MASK: &str =
    "id,displayName,formattedAddress,location,rating,priceLevel,photos,currentOpeningHours,addressComponents";
pub const DEFAULT_SEARCH_FIELD_MASK: &str = "places.id,places.displayName,places.formattedAddress,\
places.location,places.rating,places.priceLevel,places.currentOpeningHours,places.addressComponents";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MapError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("place not found: {0}")]
    PlaceNotFound(String),
    #[error("google api error: status {status}, body: {body}")]
    Upstream { status: u16, body: String },
    #[error("places request failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait PlacesClient: Send + Sync {
    async fn get_place_details(
        &self,
        place_id: &str,
        language_code: &str,
        field_mask: &str,
    ) -> Result<Place, MapError>;

    async fn search_text(
        &self,
        request: &SearchTextRequest,
        field_mask: &str,
    ) -> Result<Vec<Place>, MapError>;
}

/// Talks the Places API (v1) wire protocol, either to Google or to the mock service.
pub struct HttpPlacesClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    label: &'static str,
}

impl HttpPlacesClient {
    pub fn google(base_url: &str, api_key: &str) -> Result<Self, MapError> {
        Self::build(base_url, Some(api_key.to_string()), "google")
    }

    pub fn mock(base_url: &str) -> Result<Self, MapError> {
        Self::build(base_url, None, "mock")
    }

    fn build(base_url: &str, api_key: Option<String>, label: &'static str) -> Result<Self, MapError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MapError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            label,
        })
    }

    fn with_headers(&self, request: reqwest::RequestBuilder, field_mask: &str) -> reqwest::RequestBuilder {
        let request = request.header("X-Goog-FieldMask", field_mask);
        match &self.api_key {
            Some(key) => request.header("X-Goog-Api-Key", key),
            None => request,
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, MapError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(MapError::Upstream {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl PlacesClient for HttpPlacesClient {
    async fn get_place_details(
        &self,
        place_id: &str,
        language_code: &str,
        field_mask: &str,
    ) -> Result<Place, MapError> {
        let url = format!("{}/v1/places/{}", self.base_url, urlencoding::encode(place_id));
        let started = Instant::now();
        let response = self
            .with_headers(self.client.get(&url), field_mask)
            .query(&[("languageCode", language_code)])
            .send()
            .await
            .map_err(|e| MapError::Transport(e.to_string()))?;
        metrics::histogram!("map_places_api_duration_seconds", "client" => self.label, "call" => "details")
            .record(started.elapsed().as_secs_f64());

        if response.status() == StatusCode::NOT_FOUND {
            debug!(place_id, client = self.label, "Place not found upstream");
            return Err(MapError::PlaceNotFound(place_id.to_string()));
        }
        let response = check_status(response).await?;
        response
            .json::<Place>()
            .await
            .map_err(|e| MapError::Transport(format!("failed to decode place: {}", e)))
    }

    async fn search_text(
        &self,
        request: &SearchTextRequest,
        field_mask: &str,
    ) -> Result<Vec<Place>, MapError> {
        let url = format!("{}/v1/places:searchText", self.base_url);
        let started = Instant::now();
        let response = self
            .with_headers(self.client.post(&url), field_mask)
            .json(request)
            .send()
            .await
            .map_err(|e| MapError::Transport(e.to_string()))?;
        metrics::histogram!("map_places_api_duration_seconds", "client" => self.label, "call" => "search_text")
            .record(started.elapsed().as_secs_f64());

        let response = check_status(response).await.map_err(|e| {
            warn!(client = self.label, "searchText failed: {}", e);
            e
        })?;
        let body = response
            .json::<SearchTextResponse>()
            .await
            .map_err(|e| MapError::Transport(format!("failed to decode search response: {}", e)))?;
        Ok(body.places)
    }
}
