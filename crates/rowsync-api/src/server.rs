//! HTTP server configuration and request routing.
//!
//! Requests flow through middleware in order:
//! 1. Request ID generation
//! 2. Access logging
//! 3. Request tracing
//! 4. Panic recovery
//! 5. Handler execution
//!
//! # Graceful Shutdown
//!
//! The server stops accepting connections once the shutdown future
//! resolves and waits for in-flight requests. The caller bounds that wait.

use std::{any::Any, future::Future, net::SocketAddr};

use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use tokio::net::TcpListener;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::{
    handlers::{self, sync_record::FAILURE_CODE},
    middleware::{inject_request_id, log_request},
    AppState,
};

/// Path of the on-demand sync operation.
pub const SYNC_RECORD_PATH: &str = "/api/records/sync";

/// Creates the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use rowsync_api::{create_router, AppState};
///
/// fn build(state: AppState) {
///     let app = create_router(state);
///     // Serve the app...
/// }
/// ```
pub fn create_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check));

    let api_routes = Router::new().route(SYNC_RECORD_PATH, any(handlers::sync_record));

    Router::new()
        .merge(health_routes)
        .merge(api_routes)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(log_request))
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Turns a handler panic into the failure envelope.
///
/// The status stays 200 so callers of the sync operation always receive the
/// same envelope.
fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "unknown panic".to_string()
    };

    error!(panic = %detail, "request handler panicked");

    let body = serde_json::json!({
        "code": FAILURE_CODE,
        "message": format!("internal error: {detail}"),
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// Binds `addr` and serves until `shutdown` resolves.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound or the server
/// fails while running.
pub async fn start_server<F>(
    state: AppState,
    addr: SocketAddr,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    serve(listener, state, shutdown).await
}

/// Serves requests on an already bound listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns `std::io::Error` if the listener fails.
pub async fn serve<F>(
    listener: TcpListener,
    state: AppState,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);
    let actual_addr = listener.local_addr()?;

    info!("HTTP server listening on {}", actual_addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}
