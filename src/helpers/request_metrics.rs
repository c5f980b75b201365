use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

/// Counts every response as `http_requests_total{service, method, status}`.
pub async fn track_requests<B>(
    State(service): State<&'static str>,
    request: Request<B>,
    next: Next<B>,
) -> Response {
    let method = request.method().to_string();
    let response = next.run(request).await;
    metrics::counter!(
        "http_requests_total",
        "service" => service,
        "method" => method,
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    response
}
