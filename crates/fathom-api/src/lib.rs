//! HTTP API for Fathom.
//!
//! Provides an [`ApiServer`] exposing a [`StorageEngine`] over axum:
//!
//! - `PUT /chunks/{hash}?tenant=N`: store the request body
//! - `GET /chunks/{hash}?path=P`: fetch bytes
//! - `GET /chunks/{hash}/url?path=P&ttl_secs=N`: presigned download URL
//! - `DELETE /chunks`: delete a JSON `{hash: path}` map
//! - `GET /admin/health/cluster`: per-node reachability
//! - `GET /admin/health/domains`: per-domain health
//! - `GET /admin/chunks/{hash}/locations?tenant=N`: verified locations
//! - `POST /admin/rebalance?domain=D` / `GET /admin/rebalance`
//! - `POST /admin/repair`: consistency audit
//! - `GET /admin/degraded`: pending degraded writes
//! - `POST /admin/nodes/{node}/enable` and `/disable`
//!
//! Errors are returned as JSON `{ "error": code, "message": text }`.

mod error;
mod handlers;


use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use fathom_engine::{DEFAULT_MAX_IN_MEMORY_BYTES, StorageEngine};

pub use error::ApiError;

/// Shared state for all handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub engine: Arc<dyn StorageEngine>,
}

/// Configuration for creating an [`ApiServer`].
pub struct ApiServerConfig {
    /// The engine to serve.
    pub engine: Arc<dyn StorageEngine>,
    /// Largest request body accepted by `PUT /chunks/{hash}`.
    pub max_body_bytes: usize,
}

impl ApiServerConfig {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self {
            engine,
            max_body_bytes: DEFAULT_MAX_IN_MEMORY_BYTES as usize,
        }
    }
}

/// HTTP server backed by a [`StorageEngine`].
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        let state = AppState {
            engine: config.engine,
        };
        Self {
            router: Self::build_router(state, config.max_body_bytes),
        }
    }

    fn build_router(state: AppState, max_body_bytes: usize) -> Router {
        let data_routes = Router::new()
            .route("/chunks", axum::routing::delete(handlers::delete_chunks))
            .route(
                "/chunks/{hash}",
                put(handlers::store_chunk).get(handlers::fetch_chunk),
            )
            .route("/chunks/{hash}/url", get(handlers::presigned_url));

        let admin_routes = Router::new()
            .route("/admin/health/cluster", get(handlers::cluster_health))
            .route("/admin/health/domains", get(handlers::domain_health))
            .route(
                "/admin/chunks/{hash}/locations",
                get(handlers::chunk_locations),
            )
            .route(
                "/admin/rebalance",
                post(handlers::trigger_rebalance).get(handlers::rebalance_status),
            )
            .route("/admin/repair", post(handlers::trigger_repair))
            .route("/admin/degraded", get(handlers::degraded_pending))
            .route("/admin/nodes/{node}/enable", post(handlers::enable_node))
            .route("/admin/nodes/{node}/disable", post(handlers::disable_node));

        Router::new()
            .merge(data_routes)
            .merge(admin_routes)
            .layer(DefaultBodyLimit::max(max_body_bytes))
            .with_state(state)
    }

    /// Return the inner [`Router`] (useful for testing with `tower::ServiceExt`).
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve on `addr` until `shutdown` completes, then drain in-flight
    /// requests.
    pub async fn serve_with_shutdown(
        self,
        addr: &str,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr, "HTTP API listening");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
