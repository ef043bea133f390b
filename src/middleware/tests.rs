use crate::backend::memory::InMemoryBackend;
use crate::backend::{Backend, Error, Verdict};
use crate::engine::Limiter;
use crate::middleware::*;
use crate::policy::QuotaPolicy;
use crate::profile::{LimiterRegistry, Profile};
use actix_web::http::header::RETRY_AFTER;
use actix_web::http::StatusCode;
use actix_web::test::{self, read_body, TestRequest};
use actix_web::{web, App, HttpResponse};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

async fn route_200() -> HttpResponse {
    HttpResponse::Ok().body("Hello world!")
}

#[derive(Clone)]
struct FailingBackend;

impl Backend for FailingBackend {
    async fn consume(&self, _key: &str, _policy: &QuotaPolicy) -> Result<Verdict, Error> {
        Err(Error::NegativeTtl)
    }
}

fn registry(global_points: u64) -> LimiterRegistry<InMemoryBackend> {
    LimiterRegistry::builder(
        InMemoryBackend::builder().with_gc_interval(None).build(),
        QuotaPolicy::new(global_points, 60, 0).unwrap(),
    )
    .build()
    .unwrap()
}

fn get(uri: &str, peer: &str) -> TestRequest {
    TestRequest::get().uri(uri).peer_addr(peer.parse().unwrap())
}

fn post(uri: &str, peer: &str) -> TestRequest {
    TestRequest::post().uri(uri).peer_addr(peer.parse().unwrap())
}

#[actix_web::test]
async fn test_login_rejection() {
    let registry = registry(100);
    let calls = Arc::new(AtomicUsize::new(0));
    let handler_calls = calls.clone();
    let app = test::init_service(
        App::new()
            .route(
                "/auth/login",
                web::post().to(move || {
                    let calls = handler_calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::Relaxed);
                        HttpResponse::Ok().finish()
                    }
                }),
            )
            .wrap(RateLimiter::builder(registry.login().clone()).build()),
    )
    .await;

    for _ in 0..5 {
        let response =
            test::call_service(&app, post("/auth/login", "1.2.3.4:5000").to_request()).await;
        assert_eq!(response.status(), StatusCode::OK);
        // Headers are only attached on rejection by default
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
    }

    let response =
        test::call_service(&app, post("/auth/login", "1.2.3.4:5001").to_request()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let headers = response.headers();
    assert_eq!(headers.get(RETRY_AFTER).unwrap(), "900");
    assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "5");
    assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");
    assert!(headers.contains_key("x-ratelimit-reset"));
    let body: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "RATE_LIMIT_EXCEEDED");
    assert_eq!(body["error"]["statusCode"], 429);

    // The handler never ran for the rejected request
    assert_eq!(calls.load(Ordering::Relaxed), 5);

    // Another client has its own bucket
    let response =
        test::call_service(&app, post("/auth/login", "5.6.7.8:5000").to_request()).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[actix_web::test]
async fn test_client_address_key_ignores_path() {
    let registry = registry(100);
    let limiter = registry.password_reset().clone();
    let app = test::init_service(
        App::new()
            .service(
                web::resource("/auth/password/reset")
                    .wrap(RateLimiter::builder(limiter.clone()).build())
                    .route(web::post().to(route_200)),
            )
            .service(
                web::resource("/auth/password/forgot")
                    .wrap(RateLimiter::builder(limiter).build())
                    .route(web::post().to(route_200)),
            ),
    )
    .await;
    for uri in ["/auth/password/reset", "/auth/password/forgot", "/auth/password/reset"] {
        let response =
            test::call_service(&app, post(uri, "1.2.3.4:5000").to_request()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response =
        test::call_service(&app, post("/auth/password/forgot", "1.2.3.4:5000").to_request()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "3600");
}

#[actix_web::test]
async fn test_route_key_uses_matched_pattern() {
    let registry = registry(1);
    let app = test::init_service(
        App::new()
            .route("/store/products/{id}", web::get().to(route_200))
            .route("/store/carts", web::get().to(route_200))
            .wrap(RateLimiter::builder(registry.global().clone()).build()),
    )
    .await;
    let response =
        test::call_service(&app, get("/store/products/1", "1.2.3.4:5000").to_request()).await;
    assert_eq!(response.status(), StatusCode::OK);
    // Same route template, same bucket
    let response =
        test::call_service(&app, get("/store/products/2", "1.2.3.4:5000").to_request()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert_eq!(body["error"]["message"], "Too many requests");
    // Another route
    let response =
        test::call_service(&app, get("/store/carts", "1.2.3.4:5000").to_request()).await;
    assert_eq!(response.status(), StatusCode::OK);
    // Unmatched paths fall back to the raw path
    let response =
        test::call_service(&app, get("/missing", "1.2.3.4:5000").to_request()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response =
        test::call_service(&app, get("/missing", "1.2.3.4:5000").to_request()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[actix_web::test]
async fn test_informational_headers() {
    let registry = registry(2);
    let limiter = RateLimiter::builder(registry.global().clone())
        .informational_headers(true)
        .build();
    let app = test::init_service(
        App::new()
            .route("/200", web::get().to(route_200))
            .wrap(limiter),
    )
    .await;
    let response =
        test::call_service(&app, get("/200", "1.2.3.4:5000").to_request()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "2");
    assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "1");
    assert!(headers.contains_key("x-ratelimit-reset"));
    assert!(!headers.contains_key(RETRY_AFTER));
}

#[actix_web::test]
async fn test_custom_deny_response() {
    let registry = registry(1);
    let limiter = RateLimiter::builder(registry.global().clone())
        .request_denied_response(|rejection| {
            HttpResponse::build(StatusCode::IM_A_TEAPOT).body(format!("limit {}", rejection.limit))
        })
        .build();
    let app = test::init_service(
        App::new()
            .route("/200", web::get().to(route_200))
            .wrap(limiter),
    )
    .await;
    test::call_service(&app, get("/200", "1.2.3.4:5000").to_request()).await;
    let response =
        test::call_service(&app, get("/200", "1.2.3.4:5000").to_request()).await;
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    let body = String::from_utf8(read_body(response).await.to_vec()).unwrap();
    assert_eq!(body, "limit 1");
}

#[actix_web::test]
async fn test_fail_open() {
    // Test first without fail open
    let limiter = RateLimiter::builder(Limiter::new(FailingBackend, Profile::strict())).build();
    let app = test::init_service(
        App::new()
            .route("/200", web::get().to(route_200))
            .wrap(limiter),
    )
    .await;
    let response =
        test::call_service(&app, get("/200", "1.2.3.4:5000").to_request()).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // Test again with fail open enabled
    let limiter = RateLimiter::builder(Limiter::new(FailingBackend, Profile::strict()))
        .fail_open(true)
        .informational_headers(true)
        .build();
    let app = test::init_service(
        App::new()
            .route("/200", web::get().to(route_200))
            .wrap(limiter),
    )
    .await;
    let response =
        test::call_service(&app, get("/200", "1.2.3.4:5000").to_request()).await;
    assert_eq!(response.status(), StatusCode::OK);
    // Nothing to report without a verdict
    assert!(!response.headers().contains_key("x-ratelimit-limit"));
}

#[actix_web::test]
async fn test_invalid_forwarded_address() {
    let registry = registry(100);
    let app = test::init_service(
        App::new()
            .route("/200", web::get().to(route_200))
            .wrap(RateLimiter::builder(registry.global().clone()).build()),
    )
    .await;
    let request = TestRequest::get()
        .uri("/200")
        .insert_header(("x-forwarded-for", "not-an-address"))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
