use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::helpers::handler_404::page_not_found_handler;
use crate::helpers::rate_limit::{rate_limit, RateLimitState};
use crate::helpers::request_metrics::track_requests;
use crate::services::jwt::JwtManager;
use crate::telemetry;

pub mod auth_controller;
pub mod favorites_controller;
pub mod health_check;
pub mod map_controller;
pub mod mock_places_controller;
pub mod restaurant_controller;
pub mod spider_controller;

const EXPOSED_HEADERS: [&str; 7] = [
    "x-request-id",
    "x-cache-status",
    "x-data-source",
    "x-data-age",
    "x-ratelimit-limit",
    "x-ratelimit-remaining",
    "x-ratelimit-reset",
];

/// Per-service settings shared by every router stack.
#[derive(Clone)]
pub struct ServiceSettings {
    pub name: &'static str,
    pub origins: Vec<HeaderValue>,
    pub max_concurrent_requests: usize,
    pub rate_limit_per_minute: u32,
    /// Lets the rate limiter key authenticated callers by user id.
    pub jwt: Option<Arc<JwtManager>>,
    /// Reported by `/health`.
    pub dependencies: Value,
}

impl ServiceSettings {
    pub fn from_config(
        name: &'static str,
        config: &Config,
        jwt: Option<Arc<JwtManager>>,
    ) -> anyhow::Result<Self> {
        let origins = config
            .origin_urls
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(|origin| {
                origin
                    .parse::<HeaderValue>()
                    .with_context(|| format!("Invalid CORS origin: {}", origin))
            })
            .collect::<anyhow::Result<Vec<HeaderValue>>>()?;

        Ok(Self {
            name,
            origins,
            max_concurrent_requests: config.max_concurrent_requests.max(1),
            rate_limit_per_minute: config.rate_limit_per_minute,
            jwt,
            dependencies: json!({}),
        })
    }

    pub fn with_dependencies(mut self, dependencies: Value) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// Adds health, metrics, the JSON 404 fallback and the shared middleware stack.
pub fn application(routes: Router, settings: &ServiceSettings) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_origin(settings.origins.clone())
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .expose_headers(EXPOSED_HEADERS.map(HeaderName::from_static));

    let mut application = routes
        .merge(health_check::router(settings.name, settings.dependencies.clone()))
        .route("/metrics", get(metrics_endpoint))
        .fallback(page_not_found_handler);

    if settings.rate_limit_per_minute > 0 {
        let state = RateLimitState::new(settings.rate_limit_per_minute, settings.jwt.clone());
        application = application.layer(middleware::from_fn_with_state(state, rate_limit));
    }

    application.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(cors)
            .layer(CompressionLayer::new())
            .layer(GlobalConcurrencyLimitLayer::new(settings.max_concurrent_requests))
            .layer(middleware::from_fn_with_state(settings.name, track_requests)),
    )
}

pub async fn serve(
    routes: Router,
    settings: ServiceSettings,
    address: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let application = application(routes, &settings);

    info!("{} listening on: {}", settings.name, address);
    axum::Server::try_bind(&address)
        .with_context(|| format!("Error binding {} to {}", settings.name, address))?
        .serve(application.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await
        .with_context(|| format!("Error spinning up the {} server", settings.name))
}

async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        telemetry::metrics_handle().render(),
    )
}
