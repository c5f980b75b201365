use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tracing::debug;

use crate::models::place::Place;
use crate::services::map_service::QuickSearchResponse;
use crate::services::places_client::MapError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// What the restaurant service needs from the map service.
#[async_trait]
pub trait MapServiceClient: Send + Sync {
    async fn quick_search(&self, place_id: &str) -> Result<Place, MapError>;
}

pub struct HttpMapClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMapClient {
    pub fn new(base_url: &str) -> Result<Self, MapError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MapError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MapServiceClient for HttpMapClient {
    async fn quick_search(&self, place_id: &str) -> Result<Place, MapError> {
        let url = format!("{}/api/v1/map/quick_search", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "place_id": place_id }))
            .send()
            .await
            .map_err(|e| MapError::Transport(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let body = response
                    .json::<QuickSearchResponse>()
                    .await
                    .map_err(|e| MapError::Transport(format!("failed to decode quick search: {}", e)))?;
                debug!(place_id, source = ?body.source, "Map service quick search succeeded");
                Ok(body.result)
            }
            StatusCode::NOT_FOUND => Err(MapError::PlaceNotFound(place_id.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(MapError::Upstream {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}
