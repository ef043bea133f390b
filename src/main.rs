use actix_web::{web, App, HttpResponse, HttpServer};
use anyhow::Context;
use serde_json::json;
use std::sync::Arc;
use storefront_admission::backend::memory::InMemoryBackend;
use storefront_admission::backend::AnyBackend;
use storefront_admission::config::Settings;
use storefront_admission::{LimiterRegistry, RateLimiter};
use tracing_subscriber::EnvFilter;

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "success": true, "status": "ok" }))
}

async fn login() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "success": true }))
}

async fn password_reset() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "success": true,
        "message": "If the account exists a reset link has been sent"
    }))
}

#[cfg(feature = "redis")]
async fn backend(settings: &Settings) -> AnyBackend {
    let fallback = InMemoryBackend::builder().with_gc_interval(settings.gc_interval());
    let shared = match settings.redis_url.as_deref() {
        Some(url) => storefront_admission::backend::redis::connect_shared_store(url).await,
        None => {
            log::info!("Redis URL not configured");
            None
        }
    };
    AnyBackend::select(shared, settings.redis_key_prefix.as_deref(), fallback).await
}

#[cfg(not(feature = "redis"))]
async fn backend(settings: &Settings) -> AnyBackend {
    log::info!("Using in-memory rate limiter");
    InMemoryBackend::builder()
        .with_gc_interval(settings.gc_interval())
        .build()
        .into()
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env().context("Failed to read configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&settings.log_level))
        .init();

    let global = settings
        .global_policy()
        .context("Invalid global rate limit")?;
    let backend = backend(&settings).await;
    let registry = Arc::new(LimiterRegistry::builder(backend, global).build()?);

    log::info!("Listening on {}:{}", settings.host, settings.port);
    HttpServer::new(move || {
        App::new()
            .service(
                web::scope("/health")
                    .route("", web::get().to(health))
                    .route("/live", web::get().to(health)),
            )
            .service(
                web::scope("/auth")
                    .service(
                        web::resource("/login")
                            .wrap(RateLimiter::builder(registry.login().clone()).build())
                            .route(web::post().to(login)),
                    )
                    .service(
                        web::resource("/password/reset")
                            .wrap(RateLimiter::builder(registry.password_reset().clone()).build())
                            .route(web::post().to(password_reset)),
                    ),
            )
            .wrap(RateLimiter::builder(registry.global().clone()).build())
    })
    .bind((settings.host.as_str(), settings.port))?
    .run()
    .await?;
    Ok(())
}
