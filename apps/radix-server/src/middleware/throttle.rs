//! Rate limiting middleware.

use actix_web::{
    Error, HttpMessage, HttpResponse,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::{HeaderName, HeaderValue, RETRY_AFTER},
};
use radix_shared::ErrorResponse;
use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use radix_core::domain::{BucketPolicy, Decision};
use radix_core::network::ClientIpResolver;
use radix_core::{ConfigurationError, RateLimiter};

use super::client::rate_limit_subject;
use crate::observability::RequestId;

pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Rate limiting middleware factory, bound to one bucket.
///
/// Wrap a scope with it to give the whole route group that bucket's quota.
#[derive(Clone)]
pub struct Throttle {
    limiter: Arc<RateLimiter>,
    resolver: Arc<ClientIpResolver>,
    policy: BucketPolicy,
}

impl Throttle {
    /// Bind the throttle to `bucket`. Unknown buckets are rejected here, at wiring
    /// time, rather than on the first request.
    pub fn new(
        limiter: Arc<RateLimiter>,
        resolver: Arc<ClientIpResolver>,
        bucket: &str,
    ) -> Result<Self, ConfigurationError> {
        let policy = limiter.policy(bucket)?.clone();
        Ok(Self {
            limiter,
            resolver,
            policy,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.policy.name
    }
}

impl<S, B> Transform<S, ServiceRequest> for Throttle
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = ThrottleService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ThrottleService {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
            resolver: self.resolver.clone(),
            policy: Rc::new(self.policy.clone()),
        }))
    }
}

pub struct ThrottleService<S> {
    service: Rc<S>,
    limiter: Arc<RateLimiter>,
    resolver: Arc<ClientIpResolver>,
    policy: Rc<BucketPolicy>,
}

impl<S, B> Service<ServiceRequest> for ThrottleService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let limiter = self.limiter.clone();
        let policy = self.policy.clone();
        let subject = rate_limit_subject(req.request(), &self.resolver);

        Box::pin(async move {
            let decision = match limiter.check(&policy.name, &subject).await {
                Ok(decision) => decision,
                Err(e) => {
                    // Buckets are validated in Throttle::new; fail open like a store error.
                    tracing::error!(error = %e, "Throttle bucket vanished, allowing request");
                    Decision::fail_open(policy.limit)
                }
            };

            if !decision.allowed {
                tracing::warn!(
                    bucket = %policy.name,
                    subject = %subject,
                    retry_after = decision.retry_after_seconds,
                    "Rate limit exceeded"
                );

                let request_id = req.extensions().get::<RequestId>().map(|id| id.as_str().to_string());
                let error = ErrorResponse::too_many_requests(decision.retry_after_seconds)
                    .with_request_id(request_id);

                let response = HttpResponse::TooManyRequests()
                    .insert_header((RETRY_AFTER, decision.retry_after_seconds))
                    .insert_header((RATE_LIMIT_LIMIT, policy.limit))
                    .insert_header((RATE_LIMIT_REMAINING, 0u64))
                    .json(error);

                let (http_req, _payload) = req.into_parts();
                let srv_response = ServiceResponse::new(http_req, response);
                return Ok(srv_response.map_into_right_body());
            }

            let mut res = service.call(req).await?;
            let headers = res.headers_mut();
            headers.insert(
                HeaderName::from_static(RATE_LIMIT_LIMIT),
                HeaderValue::from(policy.limit),
            );
            headers.insert(
                HeaderName::from_static(RATE_LIMIT_REMAINING),
                HeaderValue::from(decision.remaining),
            );

            Ok(res.map_into_left_body())
        })
    }
}
