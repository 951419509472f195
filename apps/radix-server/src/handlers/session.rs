//! Session endpoint behind the strict auth bucket.

use actix_web::{HttpRequest, HttpResponse, web};
use radix_shared::dto::SessionResponse;

use crate::middleware::client::{client_ip, rate_limit_subject};
use crate::state::AppState;

/// Report how the server identifies the caller.
///
/// GET /auth/session
pub async fn session(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let response = SessionResponse {
        client_ip: client_ip(&req, &state.resolver).to_string(),
        subject: rate_limit_subject(&req, &state.resolver),
    };

    HttpResponse::Ok().json(response)
}
