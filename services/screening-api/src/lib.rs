//! HTTP surface of the sanctions screening service

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;

use actix_web::web;
use screening_core::SearchOrchestrator;
use std::sync::Arc;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SearchOrchestrator>,
}

/// Routes and body handling, shared by the server and the tests
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(errors::json_error_handler))
        .route("/", web::get().to(handlers::index))
        .route("/health", web::get().to(handlers::health_check))
        .route("/metrics", web::get().to(handlers::prometheus_metrics))
        .service(
            web::scope("/api/v1")
                .route("/search", web::post().to(handlers::search))
                .route("/search/select", web::post().to(handlers::select_candidate)),
        );
}
