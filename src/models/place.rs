use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// A Google Places API (v1) place, as it travels over the wire.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Place {
    #[serde(default)]
    pub id: String,
    pub display_name: Option<LocalizedText>,
    pub formatted_address: Option<String>,
    pub location: Option<LatLng>,
    pub rating: Option<f64>,
    pub user_rating_count: Option<i64>,
    pub price_level: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photos: Vec<Photo>,
    pub current_opening_hours: Option<OpeningHours>,
    pub regular_opening_hours: Option<OpeningHours>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address_components: Vec<AddressComponent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    pub editorial_summary: Option<LocalizedText>,
    pub website_uri: Option<String>,
    pub national_phone_number: Option<String>,
    pub international_phone_number: Option<String>,
    pub google_maps_uri: Option<String>,
}

#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedText {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub language_code: String,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub width_px: i64,
    #[serde(default)]
    pub height_px: i64,
}

#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpeningHours {
    pub open_now: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weekday_descriptions: Vec<String>,
}

#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddressComponent {
    #[serde(default)]
    pub long_text: String,
    #[serde(default)]
    pub short_text: String,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub language_code: String,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct Rectangle {
    pub low: LatLng,
    pub high: LatLng,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct LocationBias {
    pub rectangle: Rectangle,
}

/// Body of `places:searchText`.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchTextRequest {
    pub text_query: String,
    pub location_bias: Option<LocationBias>,
    pub max_result_count: Option<u32>,
    pub rank_preference: Option<String>,
    pub language_code: Option<String>,
}

#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct SearchTextResponse {
    #[serde(default)]
    pub places: Vec<Place>,
}

impl Place {
    pub fn display_name(&self) -> &str {
        self.display_name
            .as_ref()
            .map(|name| name.text.as_str())
            .unwrap_or_default()
    }

    pub fn is_open_now(&self) -> bool {
        self.current_opening_hours
            .as_ref()
            .and_then(|hours| hours.open_now)
            .unwrap_or(false)
    }
}
