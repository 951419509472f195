//! HTTP handlers and route configuration.

mod health;
mod limits;
mod session;

use actix_web::{HttpResponse, web};

use crate::middleware::{IpAllowlistGuard, Throttle};

/// Middleware instances that guard each route group.
#[derive(Clone)]
pub struct RouteGuards {
    pub allowlist: IpAllowlistGuard,
    pub web: Throttle,
    pub api: Throttle,
    pub auth: Throttle,
}

/// Configure all application routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig, guards: RouteGuards) {
    cfg.service(
        web::resource("/health")
            .wrap(guards.allowlist)
            .route(web::get().to(health::health_check)),
    )
    .service(
        web::resource("/")
            .wrap(guards.web)
            .route(web::get().to(index)),
    )
    .service(
        web::scope("/api")
            .wrap(guards.api)
            .route("/limits", web::get().to(limits::list))
            .route("/limits/{bucket}", web::get().to(limits::usage)),
    )
    .service(
        web::scope("/auth")
            .wrap(guards.auth)
            .route("/session", web::get().to(session::session)),
    );
}

async fn index() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body(concat!("Radix ", env!("CARGO_PKG_VERSION"), "\n"))
}
