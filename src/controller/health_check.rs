use std::sync::Arc;

use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
struct HealthInfo {
    service: &'static str,
    dependencies: Arc<Value>,
}

/// `dependencies` is reported as-is, e.g. `{"places_api": "mock"}`.
pub fn router(service: &'static str, dependencies: Value) -> Router {
    Router::new()
        .route("/health", get(get_health_check))
        .route_layer(Extension(HealthInfo {
            service,
            dependencies: Arc::new(dependencies),
        }))
}

/// Liveness for load balancers and the frontend's service status widget
async fn get_health_check(Extension(info): Extension<HealthInfo>) -> Json<Value> {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    Json(json!({
        "status": "healthy",
        "service": info.service,
        "version": VERSION,
        "timestamp": timestamp,
        "dependencies": info.dependencies.as_ref(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::test_support::send;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    #[tokio::test]
    async fn reports_the_service_name() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(router("map-service", json!({"places_api": "mock"})), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "map-service");
        assert_eq!(body["version"], VERSION);
        assert_eq!(body["dependencies"]["places_api"], "mock");
    }
}
