//! Request log middleware - request IDs and per-request access logging.

use actix_web::{
    Error, HttpMessage,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::{HeaderName, HeaderValue},
};
use chrono::Utc;
use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;

/// Wall-clock stamps in microseconds that never go backwards.
///
/// A step back of the system clock is clamped to the last stamp handed out.
#[derive(Debug, Clone, Default)]
pub struct MonotonicStamps {
    high_water: Arc<AtomicI64>,
}

impl MonotonicStamps {
    /// Stamp `wall_micros`, clamped to the highest stamp seen so far.
    pub fn stamp(&self, wall_micros: i64) -> i64 {
        let previous = self.high_water.fetch_max(wall_micros, Ordering::AcqRel);
        previous.max(wall_micros)
    }

    pub fn now(&self) -> i64 {
        self.stamp(Utc::now().timestamp_micros())
    }
}

/// Middleware that tags each request with an ID and logs it on completion.
///
/// An incoming `X-Request-ID` is reused when it looks sane, otherwise a
/// fresh UUID is generated. The ID is echoed on the response. Every line
/// carries the `service` name so several instances can share one sink.
#[derive(Clone)]
pub struct RequestLog {
    service: Arc<str>,
    stamps: MonotonicStamps,
}

impl RequestLog {
    pub fn new(service: impl Into<Arc<str>>) -> Self {
        Self {
            service: service.into(),
            stamps: MonotonicStamps::default(),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestLog
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RequestLogService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLogService {
            service,
            service_name: self.service.clone(),
            stamps: self.stamps.clone(),
        }))
    }
}

pub struct RequestLogService<S> {
    service: S,
    service_name: Arc<str>,
    stamps: MonotonicStamps,
}

impl<S, B> Service<ServiceRequest> for RequestLogService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let started = self.stamps.now();

        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|id| is_acceptable_id(id))
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        req.extensions_mut().insert(RequestId(request_id.clone()));

        let method = req.method().to_string();
        let path = req.path().to_string();
        let stamps = self.stamps.clone();
        let service_name = self.service_name.clone();
        let fut = self.service.call(req);

        Box::pin(async move {
            let mut res = fut.await?;
            let elapsed_ms = (stamps.now() - started) as f64 / 1000.0;

            tracing::info!(
                service = %service_name,
                request_id = %request_id,
                method = %method,
                path = %path,
                status = res.status().as_u16(),
                elapsed_ms,
                "Request completed"
            );

            if let Ok(value) = HeaderValue::from_str(&request_id) {
                res.headers_mut()
                    .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
            }

            Ok(res)
        })
    }
}

fn is_acceptable_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_REQUEST_ID_LEN
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
}

/// Request ID extractor for handlers.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl actix_web::FromRequest for RequestId {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &actix_web::HttpRequest, _: &mut actix_web::dev::Payload) -> Self::Future {
        let request_id = req
            .extensions()
            .get::<RequestId>()
            .cloned()
            .unwrap_or_else(|| RequestId(Uuid::new_v4().to_string()));

        ready(Ok(request_id))
    }
}
