//! # Radix Server
//!
//! The main entry point for the Actix-web HTTP server.

use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use anyhow::Context;
use tracing_actix_web::TracingLogger;

use radix_core::RateLimiter;
use radix_core::network::{ClientIpResolver, IpAllowlist};

#[cfg(feature = "sweeper")]
mod background;
mod config;
mod handlers;
mod middleware;
mod observability;
mod state;
mod telemetry;

use config::AppConfig;
use handlers::RouteGuards;
use middleware::{IpAllowlistGuard, Throttle};
use observability::RequestLog;
use state::AppState;
use telemetry::{TelemetryConfig, init_telemetry};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let telemetry = TelemetryConfig::from_env().context("invalid telemetry configuration")?;
    init_telemetry(&telemetry);

    let config = AppConfig::from_env().context("invalid configuration")?;

    tracing::info!(
        service = %telemetry.service_name,
        environment = %config.environment,
        "Starting Radix server on {}:{}",
        config.host,
        config.port
    );

    let store = radix_infra::connect(&config.store)
        .await
        .context("failed to open counter store")?;

    let limiter = Arc::new(
        RateLimiter::new(store, config.buckets.clone()).with_store_timeout(config.store_timeout),
    );
    let resolver = Arc::new(ClientIpResolver::new(config.trusted_proxies.clone()));
    let allowlist = Arc::new(IpAllowlist::new(
        config.health_allowlist.clone(),
        config.environment,
    ));

    let throttle = |bucket: &str| {
        Throttle::new(limiter.clone(), resolver.clone(), bucket)
            .with_context(|| format!("route bucket '{}' is not configured", bucket))
    };
    let guards = RouteGuards {
        allowlist: IpAllowlistGuard::new(allowlist, resolver.clone()),
        web: throttle(&config.routes.web)?,
        api: throttle(&config.routes.api)?,
        auth: throttle(&config.routes.auth)?,
    };

    tracing::info!(
        web = guards.web.bucket(),
        api = guards.api.bucket(),
        auth = guards.auth.bucket(),
        "Route throttles configured"
    );

    #[cfg(feature = "sweeper")]
    let sweeper = match config.sweep_interval {
        Some(interval) => Some(
            background::Sweeper::start(limiter.clone(), interval)
                .await
                .context("failed to start counter sweep")?,
        ),
        None => None,
    };
    #[cfg(not(feature = "sweeper"))]
    if config.sweep_interval.is_some() {
        tracing::warn!("RATE_LIMIT_SWEEP_SECS set but built without the sweeper feature");
    }

    let state = AppState::new(limiter, resolver, config.environment);
    let request_log = RequestLog::new(telemetry.service_name);

    HttpServer::new(move || {
        let guards = guards.clone();
        App::new()
            .wrap(request_log.clone())
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(move |cfg| handlers::configure_routes(cfg, guards))
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    #[cfg(feature = "sweeper")]
    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await?;
    }

    Ok(())
}
