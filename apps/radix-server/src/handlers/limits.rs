//! Rate limit introspection endpoints.

use actix_web::{HttpRequest, HttpResponse, web};
use radix_shared::ApiResponse;
use radix_shared::dto::{BucketPolicyResponse, BucketUsageResponse};

use crate::middleware::client::rate_limit_subject;
use crate::middleware::error::AppResult;
use crate::state::AppState;

/// List configured buckets.
///
/// GET /api/limits
pub async fn list(state: web::Data<AppState>) -> HttpResponse {
    let policies: Vec<BucketPolicyResponse> = state
        .limiter
        .buckets()
        .iter()
        .map(|policy| BucketPolicyResponse {
            name: policy.name.clone(),
            limit: policy.limit,
            window_seconds: policy.window_seconds,
        })
        .collect();

    HttpResponse::Ok().json(ApiResponse::ok(policies))
}

/// The caller's usage of one bucket. Reading it does not count as a hit.
///
/// GET /api/limits/{bucket}
pub async fn usage(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let bucket = path.into_inner();
    let limit = state.limiter.policy(&bucket)?.limit;
    let identifier = rate_limit_subject(&req, &state.resolver);

    let counter = state.limiter.usage(&bucket, &identifier).await?;
    let used = counter.as_ref().map(|c| c.count).unwrap_or(0);

    let response = BucketUsageResponse {
        bucket,
        identifier,
        limit,
        used,
        remaining: limit.saturating_sub(used),
        resets_at: counter.map(|c| c.expires_at.to_rfc3339()),
    };

    Ok(HttpResponse::Ok().json(ApiResponse::ok(response)))
}
