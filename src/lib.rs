pub mod api;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod multipart;
pub mod services;

use crate::config::GatewayConfig;
use crate::services::transaction::StowService;
use axum::{
    Router,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Shared handler state. The last clone holds the last upload producer handle,
/// so dropping it lets the pipeline drain.
#[derive(Clone)]
pub struct AppState {
    pub stow: Arc<StowService>,
    pub config: Arc<GatewayConfig>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::handlers::health::health_check))
        .route("/studies", post(api::handlers::studies::store_instances))
        .route(
            "/studies/:study_uid",
            post(api::handlers::studies::store_study_instances),
        )
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .with_state(state)
}
