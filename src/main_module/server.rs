//! HTTP server initialization and routing

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::api;
use crate::core::shared::state::AppState;
use crate::core::urls::ApiUrls;
use crate::security::cors::create_cors_layer;
use crate::security::csrf::csrf_middleware;
use crate::security::request_id::request_id_middleware;

use super::{health_check, health_check_simple};

pub fn build_router(state: AppState) -> Router {
    let cors = create_cors_layer(
        &state.config.server.allowed_origins,
        &state.config.csrf.header_name,
    );

    Router::new()
        .route(ApiUrls::HEALTH_SIMPLE, get(health_check_simple))
        .route(ApiUrls::HEALTH, get(health_check))
        .merge(api::configure(&state))
        // Last added runs first: tracing, CORS, request id, then CSRF.
        .layer(middleware::from_fn_with_state(
            state.csrf.clone(),
            csrf_middleware,
        ))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(state: AppState) -> std::io::Result<()> {
    let addr = state.config.bind_address();
    let app = build_router(state);

    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {} - is another instance running?", addr, e);
            return Err(e);
        }
    };
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(std::io::Error::other)
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
