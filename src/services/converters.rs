use std::collections::HashMap;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::models::place::{AddressComponent, Place};
use crate::models::restaurant::{Location, Restaurant, RestaurantDetails, RestaurantSource};

const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

const GENERIC_TYPES: [&str; 5] = [
    "restaurant",
    "food",
    "point_of_interest",
    "establishment",
    "store",
];

pub fn place_to_restaurant(place: &Place) -> Restaurant {
    // An out-of-range coordinate drops the location rather than the place.
    let location = place
        .location
        .and_then(|latlng| Location::new(latlng.latitude, latlng.longitude).ok());

    let mut restaurant = Restaurant::new(
        place.display_name(),
        RestaurantSource::Google,
        place.id.clone(),
        location,
    );
    restaurant.area = area_from_components(&place.address_components);
    restaurant.update_details(details_from_place(place));
    restaurant.update_rating(place.rating.unwrap_or_default());
    restaurant.set_opening_hours(opening_hours(place));
    restaurant.set_metadata(metadata(place));

    debug!(
        place_id = %place.id,
        area = %restaurant.area,
        components = place.address_components.len(),
        "Converted place into restaurant"
    );
    restaurant
}

/// Refreshes a stored restaurant from a freshly converted one, keeping its identity.
pub fn apply_refresh(existing: &mut Restaurant, fresh: &Restaurant) {
    existing.update_details(RestaurantDetails {
        name: fresh.name.clone(),
        name_ja: fresh.name_ja.clone(),
        address: fresh.address.clone(),
        price_range: fresh.price_range.clone(),
        cuisine_type: fresh.cuisine_type.clone(),
        phone: fresh.phone.clone(),
        website: fresh.website.clone(),
    });
    existing.update_rating(fresh.rating);
    if let Some(location) = fresh.location {
        existing.update_location(location);
    }
    if !fresh.area.is_empty() {
        existing.area = fresh.area.clone();
    }
    if !fresh.opening_hours.is_empty() {
        existing.set_opening_hours(fresh.opening_hours.clone());
    }
    if !fresh.metadata.is_empty() {
        existing.set_metadata(fresh.metadata.clone());
    }
}

fn details_from_place(place: &Place) -> RestaurantDetails {
    RestaurantDetails {
        address: place.formatted_address.clone().unwrap_or_default(),
        price_range: price_range(place.price_level.as_deref()).to_string(),
        cuisine_type: cuisine_type(&place.types),
        phone: place
            .national_phone_number
            .clone()
            .or_else(|| place.international_phone_number.clone())
            .unwrap_or_default(),
        website: place.website_uri.clone().unwrap_or_default(),
        ..Default::default()
    }
}

pub fn price_range(price_level: Option<&str>) -> &'static str {
    match price_level {
        Some("PRICE_LEVEL_FREE") | Some("PRICE_LEVEL_INEXPENSIVE") => "$",
        Some("PRICE_LEVEL_MODERATE") => "$$",
        Some("PRICE_LEVEL_EXPENSIVE") => "$$$",
        Some("PRICE_LEVEL_VERY_EXPENSIVE") => "$$$$",
        _ => "",
    }
}

fn cuisine_type(types: &[String]) -> String {
    types
        .iter()
        .find(|t| !GENERIC_TYPES.contains(&t.as_str()))
        .cloned()
        .unwrap_or_default()
}

/// English (or untagged) `administrative_area_level_1` short text first, then any
/// other language's short or long text.
pub fn area_from_components(components: &[AddressComponent]) -> String {
    let mut fallback = None;
    for component in components
        .iter()
        .filter(|c| c.types.iter().any(|t| t == "administrative_area_level_1"))
    {
        let english = component.language_code.is_empty() || component.language_code == "en";
        if english && !component.short_text.is_empty() {
            return component.short_text.clone();
        }
        if fallback.is_none() {
            fallback = [&component.short_text, &component.long_text]
                .into_iter()
                .find(|text| !text.is_empty())
                .cloned();
        }
    }
    fallback.unwrap_or_default()
}

fn opening_hours(place: &Place) -> HashMap<String, String> {
    let descriptions = place
        .current_opening_hours
        .as_ref()
        .or(place.regular_opening_hours.as_ref())
        .map(|hours| hours.weekday_descriptions.as_slice())
        .unwrap_or_default();

    descriptions
        .iter()
        .enumerate()
        .map(|(index, text)| (day_key(index, text), text.clone()))
        .collect()
}

fn day_key(index: usize, text: &str) -> String {
    match text.find(':') {
        Some(colon) if colon > 0 => text[..colon].to_string(),
        _ => WEEKDAYS.get(index).copied().unwrap_or("Unknown").to_string(),
    }
}

fn metadata(place: &Place) -> Map<String, Value> {
    let mut metadata = Map::new();
    if !place.photos.is_empty() {
        let photos: Vec<Value> = place
            .photos
            .iter()
            .map(|photo| {
                json!({
                    "name": photo.name,
                    "width": photo.width_px,
                    "height": photo.height_px,
                })
            })
            .collect();
        metadata.insert("photo_count".into(), json!(photos.len()));
        metadata.insert("photos".into(), Value::Array(photos));
    }
    if let Some(hours) = &place.current_opening_hours {
        metadata.insert("open_now".into(), json!(hours.open_now.unwrap_or(false)));
    }
    if let Some(summary) = place.editorial_summary.as_ref().filter(|s| !s.text.is_empty()) {
        metadata.insert("editorial_summary".into(), json!(summary.text));
    }
    if let Some(total) = place.user_rating_count.filter(|count| *count > 0) {
        metadata.insert("user_ratings_total".into(), json!(total));
    }
    if !place.types.is_empty() {
        metadata.insert("types".into(), json!(place.types));
    }
    metadata
}
