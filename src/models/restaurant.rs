use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RestaurantError {
    #[error("restaurant not found")]
    RestaurantNotFound,
    #[error("restaurant already exists")]
    RestaurantAlreadyExists,
    #[error("invalid location: {0}")]
    InvalidLocation(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("invalid rating")]
    InvalidRating,
    #[error("invalid restaurant source: {0}")]
    InvalidSource(String),
    #[error("favorite not found")]
    FavoriteNotFound,
    #[error("favorite already exists")]
    FavoriteAlreadyExists,
    #[error("invalid user ID")]
    InvalidUserId,
    #[error("invalid restaurant ID")]
    InvalidRestaurantId,
    #[error("map service quick search failed: {0}")]
    MapService(String),
    #[error("repository error: {0}")]
    Repository(String),
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RestaurantSource {
    Tabelog,
    Google,
    Opentable,
}

impl RestaurantSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestaurantSource::Tabelog => "tabelog",
            RestaurantSource::Google => "google",
            RestaurantSource::Opentable => "opentable",
        }
    }
}

impl fmt::Display for RestaurantSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RestaurantSource {
    type Err = RestaurantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tabelog" => Ok(RestaurantSource::Tabelog),
            "google" => Ok(RestaurantSource::Google),
            "opentable" => Ok(RestaurantSource::Opentable),
            other => Err(RestaurantError::InvalidSource(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    pub fn new(lat: f64, lng: f64) -> Result<Self, RestaurantError> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(RestaurantError::InvalidLocation(
                "latitude must be between -90 and 90".into(),
            ));
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(RestaurantError::InvalidLocation(
                "longitude must be between -180 and 180".into(),
            ));
        }
        Ok(Self { lat, lng })
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Restaurant {
    pub id: Uuid,
    pub name: String,
    pub name_ja: String,
    pub area: String,
    pub source: RestaurantSource,
    pub external_id: String,
    pub address: String,
    pub location: Option<Location>,
    pub rating: f64,
    pub price_range: String,
    pub cuisine_type: String,
    pub phone: String,
    pub website: String,
    pub opening_hours: HashMap<String, String>,
    pub metadata: Map<String, Value>,
    pub view_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

/// Non-empty values replace the current ones, empty values are ignored.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RestaurantDetails {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub name_ja: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub price_range: String,
    #[serde(default)]
    pub cuisine_type: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub website: String,
}

impl Restaurant {
    pub fn new(
        name: impl Into<String>,
        source: RestaurantSource,
        external_id: impl Into<String>,
        location: Option<Location>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            name_ja: String::new(),
            area: String::new(),
            source,
            external_id: external_id.into(),
            address: String::new(),
            location,
            rating: 0.0,
            price_range: String::new(),
            cuisine_type: String::new(),
            phone: String::new(),
            website: String::new(),
            opening_hours: HashMap::new(),
            metadata: Map::new(),
            view_count: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc();
    }

    pub fn update_rating(&mut self, rating: f64) {
        self.rating = rating.clamp(0.0, 5.0);
        self.touch();
    }

    pub fn increment_view_count(&mut self) {
        self.view_count += 1;
        self.touch();
    }

    pub fn update_details(&mut self, details: RestaurantDetails) {
        let RestaurantDetails {
            name,
            name_ja,
            address,
            price_range,
            cuisine_type,
            phone,
            website,
        } = details;

        for (target, value) in [
            (&mut self.name, name),
            (&mut self.name_ja, name_ja),
            (&mut self.address, address),
            (&mut self.price_range, price_range),
            (&mut self.cuisine_type, cuisine_type),
            (&mut self.phone, phone),
            (&mut self.website, website),
        ] {
            if !value.is_empty() {
                *target = value;
            }
        }
        self.touch();
    }

    pub fn update_location(&mut self, location: Location) {
        self.location = Some(location);
        self.touch();
    }

    pub fn set_opening_hours(&mut self, hours: HashMap<String, String>) {
        self.opening_hours = hours;
        self.touch();
    }

    pub fn update_opening_hours(&mut self, day: impl Into<String>, hours: impl Into<String>) {
        self.opening_hours.insert(day.into(), hours.into());
        self.touch();
    }

    pub fn set_metadata(&mut self, metadata: Map<String, Value>) {
        self.metadata = metadata;
        self.touch();
    }

    pub fn update_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
        self.touch();
    }

    pub fn soft_delete(&mut self) {
        let now = OffsetDateTime::now_utc();
        self.deleted_at = Some(now);
        self.updated_at = now;
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
