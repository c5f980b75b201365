#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use tabelogo::controller::{application, ServiceSettings};
use tabelogo::models::user::Role;
use tabelogo::services::jwt::{JwtManager, TokenKind};

pub const TEST_SECRET: &str = "integration-test-secret-at-least-32-chars";

pub fn jwt() -> Arc<JwtManager> {
    Arc::new(
        JwtManager::new(
            TEST_SECRET,
            time::Duration::minutes(15),
            time::Duration::hours(24),
        )
        .unwrap(),
    )
}

pub fn token(jwt: &JwtManager, user_id: Uuid, role: Role) -> String {
    jwt.generate(user_id, Uuid::new_v4(), role, TokenKind::Access)
        .unwrap()
}

pub fn settings(name: &'static str, jwt: Option<Arc<JwtManager>>) -> ServiceSettings {
    ServiceSettings {
        name,
        origins: vec![HeaderValue::from_static("http://localhost:3000")],
        max_concurrent_requests: 64,
        rate_limit_per_minute: 0,
        jwt,
        dependencies: json!({}),
    }
}

/// Serves `app` behind the shared middleware stack on an ephemeral port.
pub fn spawn(name: &'static str, routes: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let address = listener.local_addr().unwrap();
    let app = application(routes, &settings(name, None));
    tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    format!("http://{}", address)
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

pub fn request(method: &str, uri: &str, body: Option<Value>, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}
