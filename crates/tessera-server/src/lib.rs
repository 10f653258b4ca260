//! Tessera node server library logic.

pub mod analysis;
pub mod api;
pub mod api_final;
pub mod api_intermediate;
pub mod api_local;
pub mod config;
pub mod error;
pub mod final_result;
pub mod hub;
pub mod intermediate;
pub mod local;
pub mod middleware;
pub mod objects;
pub mod outbound;
pub mod peers;
pub mod retrieval;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, put},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use tessera_crypto::KeyMaterialProvider;
use tessera_db::DbPool;
use tower_http::trace::TraceLayer;

use hub::Hub;
use middleware::TokenVerifier;
use objects::ObjectStore;

/// Ceiling for request bodies; uploads are buffered whole before sealing.
pub const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024 * 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Tag ledger connection pool.
    pub pool: DbPool,
    /// Local result storage.
    pub objects: Arc<dyn ObjectStore>,
    /// Hub core and storage services.
    pub hub: Arc<dyn Hub>,
    /// This node's ECDH private key.
    pub keys: Arc<dyn KeyMaterialProvider>,
    /// Bearer token verification.
    pub tokens: Arc<TokenVerifier>,
    /// Base URL used in links handed back to clients.
    pub public_url: String,
    /// Client allowed to purge the results of deleted projects.
    pub admin_client_id: String,
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/final", put(api_final::upload_final_handler))
        .route(
            "/intermediate",
            put(api_intermediate::upload_intermediate_handler),
        )
        .route(
            "/intermediate/{object_id}",
            get(api_intermediate::get_intermediate_handler),
        )
        .route(
            "/local",
            put(api_local::upload_local_handler).delete(api_local::delete_local_handler),
        )
        .route(
            "/local/tags",
            get(api_local::list_tags_handler).post(api_local::tag_object_handler),
        )
        .route(
            "/local/tags/{tag_name}",
            get(api_local::tagged_results_handler),
        )
        .route("/local/upload", put(api_local::forward_local_handler))
        .route("/local/{object_id}", get(api_local::get_local_handler))
        .layer(axum::middleware::from_fn(middleware::auth_middleware));

    Router::new()
        .route("/healthz", get(health))
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
