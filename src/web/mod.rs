//! Web layer
//!
//! HTTP interface for the balancer: thin axum handlers that delegate to
//! the service layer. Errors are mapped centrally onto status codes in
//! `api::error_response`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    config::Config,
    services::{
        PlaybackService, RetentionSweeper, RouteSelector, RouteService, ScoringService,
        StatisticsService,
    },
};

pub mod api;
pub mod proxy;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub route_service: Arc<RouteService>,
    pub statistics_service: Arc<StatisticsService>,
    pub scoring_service: Arc<ScoringService>,
    pub selector: Arc<RouteSelector>,
    pub playback_service: Arc<PlaybackService>,
    pub sweeper: Arc<RetentionSweeper>,
}

pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(config: &Config, state: AppState) -> Result<Self> {
        let app = Self::create_router(state);
        let addr: SocketAddr = format!("{}:{}", config.web.host, config.web.port).parse()?;

        Ok(Self { app, addr })
    }

    /// Create the router with all routes and middleware
    pub fn create_router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(api::health))
            // The proxied playback path Emby clients hit directly
            .route(
                "/emby/Items/:item_id/PlaybackInfo",
                post(proxy::playback_info),
            )
            .nest("/api/v1", Self::api_v1_routes())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    fn api_v1_routes() -> Router<AppState> {
        Router::new()
            // Download routes
            .route("/routes", get(api::list_routes).post(api::create_route))
            .route("/routes/search", get(api::search_routes))
            .route(
                "/routes/:id",
                get(api::get_route)
                    .put(api::update_route)
                    .delete(api::delete_route),
            )
            // Telemetry ingestion
            .route("/statistics/record", post(api::record_statistic))
            .route("/statistics/record/batch", post(api::record_statistics_batch))
            .route("/statistics/client/:client_ip", get(api::client_statistics))
            .route("/statistics/cleanup", post(api::cleanup_statistics))
            // Performance ranking and reports
            .route("/performance/ranking", get(api::performance_ranking))
            .route("/performance/routes/:id", get(api::route_performance))
            .route("/performance/overview", get(api::performance_overview))
    }

    /// Start the web server
    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }

    /// Get the host address
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}
