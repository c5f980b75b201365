pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod helpers;
pub mod models;
pub mod repositories;
pub mod services;
pub mod spider;
pub mod telemetry;
