use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, warn};
use uuid::Uuid;

use super::AppState;
use crate::{
    errors::AppError,
    models::{
        BatchRecordRequest, BatchRecordResponse, ClientStatisticsReport, DownloadRoute,
        RankedRoute, RecordStatisticRequest, RouteCreateRequest, RouteProtocol,
        RouteUpdateRequest, RouteWindowAggregate, SweepOutcome,
    },
};

type ApiError = (StatusCode, Json<Value>);

/// Map an application error onto a status code and JSON error body
pub fn error_response(err: AppError) -> ApiError {
    let status = match &err {
        AppError::Validation { .. } => StatusCode::BAD_REQUEST,
        AppError::Conflict { .. } => StatusCode::CONFLICT,
        AppError::NotFound { .. } => StatusCode::NOT_FOUND,
        AppError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        AppError::Upstream { .. } => StatusCode::BAD_GATEWAY,
        AppError::Repository(_) | AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        warn!("Request rejected: {}", err);
    }

    (status, Json(json!({ "error": err.to_string() })))
}

/// Resolve the client address the way reverse proxies report it:
/// X-Forwarded-For first, then X-Real-IP, then the socket peer
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() && !first.eq_ignore_ascii_case("unknown") {
                return Some(first.to_string());
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real_ip.is_empty() && !real_ip.eq_ignore_ascii_case("unknown") {
            return Some(real_ip.to_string());
        }
    }

    peer.map(|addr| addr.ip().to_string())
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

// Download routes API

#[derive(Debug, Deserialize)]
pub struct ListRoutesParams {
    pub protocol: Option<RouteProtocol>,
}

pub async fn list_routes(
    State(state): State<AppState>,
    Query(params): Query<ListRoutesParams>,
) -> Result<Json<Vec<DownloadRoute>>, ApiError> {
    let result = match params.protocol {
        Some(protocol) => state.route_service.find_by_protocol(protocol).await,
        None => state.route_service.list().await,
    };

    result.map(Json).map_err(error_response)
}

#[derive(Debug, Deserialize)]
pub struct SearchRoutesParams {
    pub domain: String,
}

pub async fn search_routes(
    State(state): State<AppState>,
    Query(params): Query<SearchRoutesParams>,
) -> Result<Json<Vec<DownloadRoute>>, ApiError> {
    state
        .route_service
        .search_by_domain(&params.domain)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn create_route(
    State(state): State<AppState>,
    Json(payload): Json<RouteCreateRequest>,
) -> Result<(StatusCode, Json<DownloadRoute>), ApiError> {
    state
        .route_service
        .create(payload)
        .await
        .map(|route| (StatusCode::CREATED, Json(route)))
        .map_err(error_response)
}

pub async fn get_route(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<DownloadRoute>, ApiError> {
    state
        .route_service
        .get(id)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn update_route(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<RouteUpdateRequest>,
) -> Result<Json<DownloadRoute>, ApiError> {
    state
        .route_service
        .update(id, payload)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn delete_route(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state
        .route_service
        .delete(id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(error_response)
}

// Telemetry ingestion API

pub async fn record_statistic(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<RecordStatisticRequest>,
) -> Result<StatusCode, ApiError> {
    let fallback_ip = client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr));

    state
        .statistics_service
        .record_detached(payload, fallback_ip)
        .map(|_| StatusCode::ACCEPTED)
        .map_err(error_response)
}

pub async fn record_statistics_batch(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<BatchRecordRequest>,
) -> Result<Json<BatchRecordResponse>, ApiError> {
    if payload.statistics.is_empty() {
        return Err(error_response(AppError::validation(
            "statistics list must not be empty",
        )));
    }

    let fallback_ip = client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr));
    let response = state
        .statistics_service
        .record_batch(payload, fallback_ip)
        .await;

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct ClientStatisticsParams {
    pub hours: Option<i64>,
}

pub async fn client_statistics(
    Path(client_ip): Path<String>,
    Query(params): Query<ClientStatisticsParams>,
    State(state): State<AppState>,
) -> Result<Json<ClientStatisticsReport>, ApiError> {
    state
        .statistics_service
        .client_report(&client_ip, params.hours.unwrap_or(24))
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn cleanup_statistics(
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    match state.sweeper.run_once().await {
        Ok(SweepOutcome::Completed { cutoff }) => Ok(Json(json!({
            "status": "completed",
            "cutoff": cutoff.to_rfc3339(),
        }))),
        Ok(SweepOutcome::Skipped) => Ok(Json(json!({ "status": "skipped" }))),
        Err(e) => Err(error_response(e)),
    }
}

// Performance API

pub async fn performance_ranking(
    State(state): State<AppState>,
) -> Result<Json<Vec<RankedRoute>>, ApiError> {
    let routes = state.route_service.list().await.map_err(error_response)?;

    state
        .scoring_service
        .ranking(routes)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn route_performance(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<RankedRoute>, ApiError> {
    let route = state.route_service.get(id).await.map_err(error_response)?;
    let performance = state
        .scoring_service
        .score_route(&route)
        .await
        .map_err(error_response)?;

    Ok(Json(RankedRoute::new(route, performance)))
}

pub async fn performance_overview(
    State(state): State<AppState>,
) -> Result<Json<Vec<RouteWindowAggregate>>, ApiError> {
    state
        .scoring_service
        .overview()
        .await
        .map(Json)
        .map_err(error_response)
}
