//! Health check endpoint.

use actix_web::{HttpResponse, web};
use radix_shared::dto::HealthResponse;

use crate::state::AppState;

/// Health check endpoint - returns server status.
///
/// GET /health
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        environment: state.environment.to_string(),
        counter_store: state.limiter.store_name().to_string(),
    };

    HttpResponse::Ok().json(response)
}
