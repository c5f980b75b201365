use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::models::place::{LocationBias, Place, SearchTextRequest};
use crate::repositories::place_cache::PlaceCache;
use crate::services::places_client::{
    MapError, PlacesClient, DEFAULT_DETAILS_FIELD_MASK, DEFAULT_SEARCH_FIELD_MASK,
};

pub const SUPPORTED_LANGUAGES: [&str; 3] = ["en", "ja", "zh-TW"];
pub const DEFAULT_LANGUAGE: &str = "en";
pub const MAX_RESULT_COUNT: u32 = 20;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QuickSearchRequest {
    #[serde(default)]
    pub place_id: String,
    #[serde(default)]
    pub language_code: Option<String>,
    #[serde(default)]
    pub api_mask: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuickSearchSource {
    Cache,
    Google,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuickSearchResponse {
    pub source: QuickSearchSource,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub cached_at: Option<OffsetDateTime>,
    pub result: Place,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AdvanceSearchRequest {
    #[serde(default)]
    pub text_query: String,
    pub location_bias: Option<LocationBias>,
    pub max_result_count: Option<u32>,
    #[serde(default)]
    pub min_rating: f64,
    #[serde(default)]
    pub open_now: bool,
    pub rank_preference: Option<String>,
    pub language_code: Option<String>,
    pub api_mask: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchMetadata {
    pub text_query: String,
    pub search_time_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdvanceSearchResponse {
    pub places: Vec<Place>,
    pub total_count: usize,
    pub search_metadata: SearchMetadata,
}

pub struct MapService {
    places: Arc<dyn PlacesClient>,
    cache: PlaceCache,
}

impl MapService {
    pub fn new(places: Arc<dyn PlacesClient>, cache: PlaceCache) -> Self {
        Self { places, cache }
    }

    /// Cache-first lookup of a single place.
    pub async fn quick_search(
        &self,
        request: QuickSearchRequest,
    ) -> Result<QuickSearchResponse, MapError> {
        let place_id = request.place_id.trim();
        if place_id.is_empty() {
            return Err(MapError::InvalidRequest("place_id is required".into()));
        }
        let language = resolve_language(request.language_code.as_deref())?;

        if let Some(cached) = self.cache.get(place_id, language) {
            metrics::counter!("map_cache_hits_total").increment(1);
            return Ok(QuickSearchResponse {
                source: QuickSearchSource::Cache,
                cached_at: Some(cached.cached_at),
                result: cached.place,
            });
        }
        metrics::counter!("map_cache_misses_total").increment(1);

        let field_mask = non_empty(request.api_mask.as_deref()).unwrap_or(DEFAULT_DETAILS_FIELD_MASK);
        let place = self
            .places
            .get_place_details(place_id, language, field_mask)
            .await?;

        if place.id.is_empty() {
            warn!(place_id, "Places API returned a place without an id, not caching");
        } else {
            self.cache.set(place_id, language, place.clone());
        }

        info!(place_id, language, "Quick search served from Places API");
        Ok(QuickSearchResponse {
            source: QuickSearchSource::Google,
            cached_at: None,
            result: place,
        })
    }

    pub async fn advance_search(
        &self,
        request: AdvanceSearchRequest,
    ) -> Result<AdvanceSearchResponse, MapError> {
        validate_advance_search(&request)?;
        let language = resolve_language(request.language_code.as_deref())?;

        let started = Instant::now();
        let search = SearchTextRequest {
            text_query: request.text_query.trim().to_string(),
            location_bias: request.location_bias,
            max_result_count: request.max_result_count,
            rank_preference: request.rank_preference.clone(),
            language_code: Some(language.to_string()),
        };
        let field_mask = non_empty(request.api_mask.as_deref()).unwrap_or(DEFAULT_SEARCH_FIELD_MASK);
        let places = self.places.search_text(&search, field_mask).await?;

        let places: Vec<Place> = places
            .into_iter()
            .filter(|place| request.min_rating <= 0.0 || place.rating.unwrap_or(0.0) >= request.min_rating)
            .filter(|place| !request.open_now || place.is_open_now())
            .collect();

        Ok(AdvanceSearchResponse {
            total_count: places.len(),
            places,
            search_metadata: SearchMetadata {
                text_query: search.text_query,
                search_time_ms: started.elapsed().as_millis() as u64,
            },
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn resolve_language(language_code: Option<&str>) -> Result<&'static str, MapError> {
    match non_empty(language_code) {
        None => Ok(DEFAULT_LANGUAGE),
        Some(code) => SUPPORTED_LANGUAGES
            .iter()
            .find(|supported| **supported == code)
            .copied()
            .ok_or_else(|| {
                MapError::InvalidRequest(format!(
                    "language_code must be one of {}",
                    SUPPORTED_LANGUAGES.join(", ")
                ))
            }),
    }
}

fn validate_advance_search(request: &AdvanceSearchRequest) -> Result<(), MapError> {
    if request.text_query.trim().is_empty() {
        return Err(MapError::InvalidRequest("text_query is required".into()));
    }
    if let Some(bias) = &request.location_bias {
        for corner in [bias.rectangle.low, bias.rectangle.high] {
            if !(-90.0..=90.0).contains(&corner.latitude) {
                return Err(MapError::InvalidRequest(
                    "latitude must be between -90 and 90".into(),
                ));
            }
            if !(-180.0..=180.0).contains(&corner.longitude) {
                return Err(MapError::InvalidRequest(
                    "longitude must be between -180 and 180".into(),
                ));
            }
        }
    }
    if let Some(count) = request.max_result_count {
        if !(1..=MAX_RESULT_COUNT).contains(&count) {
            return Err(MapError::InvalidRequest(format!(
                "max_result_count must be between 1 and {}",
                MAX_RESULT_COUNT
            )));
        }
    }
    if !(0.0..=5.0).contains(&request.min_rating) {
        return Err(MapError::InvalidRequest(
            "min_rating must be between 0 and 5".into(),
        ));
    }
    if let Some(rank) = non_empty(request.rank_preference.as_deref()) {
        if rank != "DISTANCE" && rank != "RELEVANCE" {
            return Err(MapError::InvalidRequest(
                "rank_preference must be DISTANCE or RELEVANCE".into(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::place::{LatLng, LocalizedText, OpeningHours, Rectangle};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct StubPlaces {
        details_calls: Mutex<Vec<(String, String)>>,
        search_requests: Mutex<Vec<SearchTextRequest>>,
        places: Vec<Place>,
    }

    #[async_trait]
    impl PlacesClient for StubPlaces {
        async fn get_place_details(
            &self,
            place_id: &str,
            language_code: &str,
            _field_mask: &str,
        ) -> Result<Place, MapError> {
            self.details_calls
                .lock()
                .push((place_id.to_string(), language_code.to_string()));
            if place_id == "missing" {
                return Err(MapError::PlaceNotFound(place_id.into()));
            }
            Ok(Place {
                id: place_id.to_string(),
                ..Default::default()
            })
        }

        async fn search_text(
            &self,
            request: &SearchTextRequest,
            _field_mask: &str,
        ) -> Result<Vec<Place>, MapError> {
            self.search_requests.lock().push(request.clone());
            Ok(self.places.clone())
        }
    }

    fn place(id: &str, rating: f64, open_now: bool) -> Place {
        Place {
            id: id.into(),
            display_name: Some(LocalizedText {
                text: id.into(),
                language_code: "en".into(),
            }),
            rating: Some(rating),
            current_opening_hours: Some(OpeningHours {
                open_now: Some(open_now),
                weekday_descriptions: vec![],
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn quick_search_hits_cache_on_second_call() {
        let stub = Arc::new(StubPlaces::default());
        let service = MapService::new(stub.clone(), PlaceCache::new(Duration::from_secs(60)));
        let request = QuickSearchRequest {
            place_id: "p1".into(),
            ..Default::default()
        };

        let first = service.quick_search(request.clone()).await.unwrap();
        assert_eq!(first.source, QuickSearchSource::Google);
        assert!(first.cached_at.is_none());

        let second = service.quick_search(request).await.unwrap();
        assert_eq!(second.source, QuickSearchSource::Cache);
        assert!(second.cached_at.is_some());
        assert_eq!(stub.details_calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn quick_search_validates_input() {
        let service = MapService::new(
            Arc::new(StubPlaces::default()),
            PlaceCache::new(Duration::from_secs(60)),
        );
        assert!(matches!(
            service.quick_search(QuickSearchRequest::default()).await,
            Err(MapError::InvalidRequest(_))
        ));
        assert!(matches!(
            service
                .quick_search(QuickSearchRequest {
                    place_id: "p1".into(),
                    language_code: Some("fr".into()),
                    api_mask: None,
                })
                .await,
            Err(MapError::InvalidRequest(_))
        ));
        assert!(matches!(
            service
                .quick_search(QuickSearchRequest {
                    place_id: "missing".into(),
                    ..Default::default()
                })
                .await,
            Err(MapError::PlaceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn advance_search_filters_results() {
        let stub = Arc::new(StubPlaces {
            places: vec![
                place("good-open", 4.6, true),
                place("good-closed", 4.8, false),
                place("poor-open", 3.1, true),
            ],
            ..Default::default()
        });
        let service = MapService::new(stub.clone(), PlaceCache::new(Duration::from_secs(60)));

        let response = service
            .advance_search(AdvanceSearchRequest {
                text_query: " ramen ".into(),
                min_rating: 4.0,
                open_now: true,
                rank_preference: Some("RELEVANCE".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(response.total_count, 1);
        assert_eq!(response.places[0].id, "good-open");
        assert_eq!(response.search_metadata.text_query, "ramen");
        let sent = stub.search_requests.lock()[0].clone();
        assert_eq!(sent.language_code.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn advance_search_validation() {
        let service = MapService::new(
            Arc::new(StubPlaces::default()),
            PlaceCache::new(Duration::from_secs(60)),
        );
        let base = AdvanceSearchRequest {
            text_query: "sushi".into(),
            ..Default::default()
        };

        let cases = vec![
            AdvanceSearchRequest {
                text_query: "".into(),
                ..base.clone()
            },
            AdvanceSearchRequest {
                max_result_count: Some(21),
                ..base.clone()
            },
            AdvanceSearchRequest {
                min_rating: 5.5,
                ..base.clone()
            },
            AdvanceSearchRequest {
                rank_preference: Some("POPULARITY".into()),
                ..base.clone()
            },
            AdvanceSearchRequest {
                location_bias: Some(LocationBias {
                    rectangle: Rectangle {
                        low: LatLng {
                            latitude: -91.0,
                            longitude: 0.0,
                        },
                        high: LatLng {
                            latitude: 10.0,
                            longitude: 10.0,
                        },
                    },
                }),
                ..base.clone()
            },
        ];

        for case in cases {
            assert!(matches!(
                service.advance_search(case).await,
                Err(MapError::InvalidRequest(_))
            ));
        }
        assert!(service.advance_search(base).await.is_ok());
    }
}
