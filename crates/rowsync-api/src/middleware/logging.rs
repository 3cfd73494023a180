//! Request identification and access logging.

use std::{net::SocketAddr, time::Instant};

use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use tracing::info;
use uuid::Uuid;

/// Header carrying the generated request id.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Middleware to inject request ID into all responses.
pub async fn inject_request_id(mut req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    }

    response
}

/// Logs method, path with query, status, client address and latency of
/// every request.
///
/// The client address is only known when the server was started with
/// connect info; it is logged as `-` otherwise.
pub async fn log_request(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path_and_query().map_or_else(
        || req.uri().path().to_string(),
        |path_and_query| path_and_query.as_str().to_string(),
    );
    let client_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "-".to_string(), |ConnectInfo(addr)| addr.ip().to_string());

    let response = next.run(req).await;

    info!(
        %method,
        path,
        status = response.status().as_u16(),
        client_ip,
        latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        "request completed"
    );

    response
}
