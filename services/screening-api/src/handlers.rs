use crate::errors::{ApiError, ApiResult};
use crate::models::{HealthResponse, ServiceInfo};
use crate::AppState;
use actix_web::{web, HttpResponse};
use prometheus::{Encoder, TextEncoder};
use screening_core::{ScreeningOutcome, SearchRequest, SelectionRequest};
use tracing::{error, info};

// ===== Service Info =====
pub async fn index() -> HttpResponse {
    HttpResponse::Ok().json(ServiceInfo {
        service: "screening-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoints: vec![
            "POST /api/v1/search".to_string(),
            "POST /api/v1/search/select".to_string(),
            "GET /health".to_string(),
            "GET /metrics".to_string(),
        ],
    })
}

// ===== Health Check =====
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let report = state.orchestrator.health().await;

    let health = HealthResponse {
        status: if report.is_healthy() { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        list_cache_ready: report.list_cache_ready,
        list_fetched_at: report.list_fetched_at,
        storage_reachable: report.storage_reachable,
        live_source_reachable: report.live_source_reachable,
    };

    HttpResponse::Ok().json(health)
}

// ===== Screening =====
pub async fn search(
    state: web::Data<AppState>,
    req: web::Json<SearchRequest>,
) -> ApiResult<HttpResponse> {
    let request = req.into_inner();
    info!("Screening request: '{}' ({})", request.name, request.search_type);

    let outcome = state.orchestrator.search(request).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

pub async fn select_candidate(
    state: web::Data<AppState>,
    req: web::Json<SelectionRequest>,
) -> ApiResult<HttpResponse> {
    let request = req.into_inner();
    info!(
        "Disambiguation continuation: '{}' ({})",
        request.selected_candidate_name, request.search_type
    );

    let envelope = state.orchestrator.select(request).await?;
    Ok(HttpResponse::Ok().json(ScreeningOutcome::Final(envelope)))
}

// ===== Metrics =====
pub async fn prometheus_metrics() -> ApiResult<HttpResponse> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder.encode(&metric_families, &mut buffer).map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        ApiError::InternalError(e.to_string())
    })?;

    let body = String::from_utf8(buffer).map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body))
}
