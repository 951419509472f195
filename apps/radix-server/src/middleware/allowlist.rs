//! IP allowlist middleware.

use actix_web::{
    Error, HttpResponse,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::ContentType,
};
use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::sync::Arc;

use radix_core::network::{ClientIpResolver, IpAllowlist};

use super::client::client_ip;

/// Middleware that only lets allowlisted client IPs through.
///
/// Anyone else gets a bare `403 Forbidden` in plain text.
#[derive(Clone)]
pub struct IpAllowlistGuard {
    allowlist: Arc<IpAllowlist>,
    resolver: Arc<ClientIpResolver>,
}

impl IpAllowlistGuard {
    pub fn new(allowlist: Arc<IpAllowlist>, resolver: Arc<ClientIpResolver>) -> Self {
        Self {
            allowlist,
            resolver,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for IpAllowlistGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = IpAllowlistService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(IpAllowlistService {
            service,
            allowlist: self.allowlist.clone(),
            resolver: self.resolver.clone(),
        }))
    }
}

pub struct IpAllowlistService<S> {
    service: S,
    allowlist: Arc<IpAllowlist>,
    resolver: Arc<ClientIpResolver>,
}

impl<S, B> Service<ServiceRequest> for IpAllowlistService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let ip = client_ip(req.request(), &self.resolver);

        if !self.allowlist.permits(&ip) {
            tracing::warn!(client_ip = %ip, path = %req.path(), "Client not in allowlist");

            let response = HttpResponse::Forbidden()
                .content_type(ContentType::plaintext())
                .body("Forbidden");

            let (http_req, _payload) = req.into_parts();
            let srv_response = ServiceResponse::new(http_req, response);

            return Box::pin(async move { Ok(srv_response.map_into_right_body()) });
        }

        if self.allowlist.bypassed() {
            tracing::debug!(client_ip = %ip, "Allowlist bypassed for this environment");
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_left_body())
        })
    }
}
