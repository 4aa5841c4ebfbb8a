//! Shared test harness: an in-memory database plus a fully wired router

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tower::ServiceExt;

use emby_balance::{
    config::Config,
    repositories::{RouteRepository, StatisticsRepository},
    services::{
        HttpLinkResolver, PlaybackService, RetentionSweeper, RouteSelector, RouteService,
        ScoringService, StatisticsService,
    },
    web::{AppState, WebServer},
};

pub async fn test_pool() -> SqlitePool {
    // A single connection keeps the in-memory database alive and shared
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");

    pool
}

pub fn test_state(pool: &SqlitePool) -> AppState {
    let config = Config::default();
    let client = reqwest::Client::new();

    let scoring_service = Arc::new(ScoringService::new(
        StatisticsRepository::new(pool.clone()),
        &config.balancer,
    ));
    let selector = Arc::new(RouteSelector::new(
        RouteRepository::new(pool.clone()),
        scoring_service.clone(),
    ));
    let link_resolver = Arc::new(HttpLinkResolver::new(client.clone(), &config.resolver));
    let playback_service = Arc::new(PlaybackService::new(
        client,
        &config.upstream,
        selector.clone(),
        link_resolver,
    ));

    AppState {
        route_service: Arc::new(RouteService::new(RouteRepository::new(pool.clone()))),
        statistics_service: Arc::new(StatisticsService::new(
            StatisticsRepository::new(pool.clone()),
            config.balancer.abuse_max_requests_per_hour,
        )),
        scoring_service,
        selector,
        playback_service,
        sweeper: Arc::new(RetentionSweeper::new(
            StatisticsRepository::new(pool.clone()),
            &config.retention,
        )),
    }
}

pub async fn test_app() -> (Router, SqlitePool) {
    let pool = test_pool().await;
    let app = WebServer::create_router(test_state(&pool));
    (app, pool)
}

/// Send one request to the router and return status plus JSON body
pub async fn send_request(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request_builder = Request::builder().method(method).uri(uri);

    let request = if let Some(body) = body {
        request_builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    } else {
        request_builder.body(Body::empty()).unwrap()
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();

    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(json!({}))
    };

    (status, json)
}
