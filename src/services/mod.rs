pub mod auth_service;
pub mod converters;
pub mod jwt;
pub mod map_client;
pub mod map_service;
pub mod places_client;
pub mod restaurant_service;
