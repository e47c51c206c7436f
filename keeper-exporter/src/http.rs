//! HTTP server for the Prometheus metrics endpoint.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::engine::SharedEngine;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    engine: SharedEngine,
    refresh_on_scrape: bool,
}

/// Create the HTTP router.
pub fn create_router(engine: SharedEngine, metrics_path: &str, refresh_on_scrape: bool) -> Router {
    let state = AppState {
        engine,
        refresh_on_scrape,
    };

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint.
///
/// A failed refresh is logged; the cached values are served regardless.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    if state.refresh_on_scrape
        && let Err(e) = state.engine.prepare().await
    {
        warn!(error = %e, "Refresh before scrape failed, serving cached values");
    }

    let body = state.engine.collector().render();

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
async fn ready_handler(State(state): State<AppState>) -> Response {
    if state.engine.is_ready() {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - discovery has not completed\n",
        )
            .into_response()
    }
}

/// HTTP server configuration.
pub struct HttpServer {
    engine: SharedEngine,
    listen_addr: SocketAddr,
    metrics_path: String,
    refresh_on_scrape: bool,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(
        engine: SharedEngine,
        listen_addr: SocketAddr,
        metrics_path: String,
        refresh_on_scrape: bool,
    ) -> Self {
        Self {
            engine,
            listen_addr,
            metrics_path,
            refresh_on_scrape,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(
        self,
        listener: tokio::net::TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let router = create_router(self.engine, &self.metrics_path, self.refresh_on_scrape);

        info!(
            addr = %listener.local_addr()?,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
