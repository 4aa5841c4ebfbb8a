mod common;

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use common::{send_request, test_app, test_pool, test_state};
use emby_balance::{
    config::Config,
    models::{NewDownloadStatistic, SweepOutcome},
    repositories::{RouteRepository, StatisticsRepository},
    services::{RouteSelector, ScoringService},
};

async fn append_success(
    statistics: &StatisticsRepository,
    route_id: Uuid,
    download_size: i64,
    download_duration: i64,
    response_time: i64,
) {
    statistics
        .append(NewDownloadStatistic {
            route_id,
            client_ip: "10.0.0.1".to_string(),
            file_path: Some("/media/movie.mkv".to_string()),
            download_size,
            download_duration,
            response_time,
            success: true,
            user_agent: Some("nginx-edge".to_string()),
        })
        .await
        .expect("append statistic");
}

async fn insert_backdated(pool: &SqlitePool, route_id: Uuid, days_ago: i64) {
    let created_at = (Utc::now() - Duration::days(days_ago)).to_rfc3339();
    sqlx::query(
        "INSERT INTO download_statistics (
             id, route_id, client_ip, file_path, download_size, download_duration,
             bandwidth, response_time, success, user_agent, created_at
         )
         VALUES (?, ?, '10.0.0.9', '/media/old.mkv', 1048576, 1000, 1.0, 50, 1, NULL, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(route_id.to_string())
    .bind(created_at)
    .execute(pool)
    .await
    .expect("backdated insert");
}

async fn statistics_count(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM download_statistics")
        .fetch_one(pool)
        .await
        .expect("count statistics")
}

#[tokio::test]
async fn test_batch_ingestion_reports_counts_and_derives_bandwidth() {
    let (app, pool) = test_app().await;

    let (status, response) = send_request(
        &app,
        Method::POST,
        "/api/v1/statistics/record/batch",
        Some(json!({
            "statistics": [
                {
                    "route_id": Uuid::new_v4(),
                    "client_ip": "10.1.0.1",
                    "download_size": 104857600u64,
                    "download_duration": 10000,
                    "response_time": 120,
                    "success": true
                },
                { "client_ip": "10.1.0.2" },
                { "client_ip": "10.1.0.3", "download_size": -5 }
            ]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["success_count"], 2);
    assert_eq!(response["failure_count"], 1);
    assert_eq!(statistics_count(&pool).await, 2);

    // 100MB over 10s comes out at exactly 10 MB/s
    let bandwidth: f64 = sqlx::query_scalar(
        "SELECT bandwidth FROM download_statistics WHERE download_size = 104857600",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!((bandwidth - 10.0).abs() < f64::EPSILON);

    // Absent fields default rather than fail
    let (size, duration, success): (i64, i64, bool) = sqlx::query_as(
        "SELECT download_size, download_duration, success FROM download_statistics
         WHERE client_ip = '10.1.0.2'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!((size, duration, success), (0, 0, false));
}

#[tokio::test]
async fn test_record_endpoint_accepts_and_validates() {
    let (app, _pool) = test_app().await;

    let (status, _) = send_request(
        &app,
        Method::POST,
        "/api/v1/statistics/record",
        Some(json!({ "client_ip": "10.2.0.1", "download_size": 1024, "success": true })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, response) = send_request(
        &app,
        Method::POST,
        "/api/v1/statistics/record",
        Some(json!({ "client_ip": "10.2.0.1", "download_duration": -1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response["error"]
        .as_str()
        .unwrap()
        .contains("download_duration"));
}

#[tokio::test]
async fn test_client_statistics_report() {
    let (app, pool) = test_app().await;
    let statistics = StatisticsRepository::new(pool.clone());

    let route_id = Uuid::new_v4();
    append_success(&statistics, route_id, 2 * 1024 * 1024, 1000, 80).await;
    append_success(&statistics, route_id, 4 * 1024 * 1024, 1000, 90).await;
    statistics
        .append(NewDownloadStatistic {
            route_id,
            client_ip: "10.0.0.1".to_string(),
            file_path: None,
            download_size: 0,
            download_duration: 0,
            response_time: 0,
            success: false,
            user_agent: None,
        })
        .await
        .unwrap();

    let (status, report) = send_request(
        &app,
        Method::GET,
        "/api/v1/statistics/client/10.0.0.1?hours=24",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["total_downloads"], 3);
    assert_eq!(report["successful_downloads"], 2);
    // Average over successful transfers only: (2 + 4) / 2 MB/s
    assert!((report["average_bandwidth"].as_f64().unwrap() - 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_purge_before_is_exact_and_idempotent() {
    let pool = test_pool().await;
    let statistics = StatisticsRepository::new(pool.clone());
    let route_id = Uuid::new_v4();

    insert_backdated(&pool, route_id, 10).await;
    insert_backdated(&pool, route_id, 8).await;
    append_success(&statistics, route_id, 1024, 100, 10).await;
    append_success(&statistics, route_id, 2048, 100, 10).await;
    assert_eq!(statistics_count(&pool).await, 4);

    let cutoff = Utc::now() - Duration::days(7);
    let removed = statistics.purge_before(cutoff).await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(statistics_count(&pool).await, 2);

    // Same cutoff again removes nothing
    let removed = statistics.purge_before(cutoff).await.unwrap();
    assert_eq!(removed, 0);
    assert_eq!(statistics_count(&pool).await, 2);
}

#[tokio::test]
async fn test_cleanup_endpoint_purges_old_records() {
    let (app, pool) = test_app().await;
    let statistics = StatisticsRepository::new(pool.clone());
    let route_id = Uuid::new_v4();

    insert_backdated(&pool, route_id, 30).await;
    append_success(&statistics, route_id, 1024, 100, 10).await;

    let (status, response) =
        send_request(&app, Method::POST, "/api/v1/statistics/cleanup", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "completed");
    assert!(response.get("cutoff").is_some());

    assert_eq!(statistics_count(&pool).await, 1);
}

#[tokio::test]
async fn test_sweeper_run_once_reports_completion() {
    let pool = test_pool().await;
    let state = test_state(&pool);

    let outcome = state.sweeper.run_once().await.unwrap();
    assert!(matches!(outcome, SweepOutcome::Completed { .. }));
}

#[tokio::test]
async fn test_ranking_orders_by_composite_with_weight_fallback() {
    let (app, pool) = test_app().await;
    let statistics = StatisticsRepository::new(pool.clone());

    let (_, fast) = send_request(
        &app,
        Method::POST,
        "/api/v1/routes",
        Some(json!({ "domain": "fast.example.com", "protocol": "http", "port": 80, "weight": 5 })),
    )
    .await;
    let (_, sparse) = send_request(
        &app,
        Method::POST,
        "/api/v1/routes",
        Some(json!({ "domain": "sparse.example.com", "protocol": "http", "port": 81, "weight": 50 })),
    )
    .await;
    let fast_id: Uuid = fast["id"].as_str().unwrap().parse().unwrap();
    let sparse_id: Uuid = sparse["id"].as_str().unwrap().parse().unwrap();

    // Six saturated transfers give the fast route a real score
    for _ in 0..6 {
        append_success(&statistics, fast_id, 20 * 1024 * 1024, 1000, 100).await;
    }
    // Two samples are below the evidence threshold
    for _ in 0..2 {
        append_success(&statistics, sparse_id, 1024, 1000, 100).await;
    }

    let (status, ranking) =
        send_request(&app, Method::GET, "/api/v1/performance/ranking", None).await;
    assert_eq!(status, StatusCode::OK);
    let ranking = ranking.as_array().unwrap();
    assert_eq!(ranking.len(), 2);

    // bandwidth 100 * 0.4 + response (100 - 1) * 0.3 + success 100 * 0.3
    assert_eq!(ranking[0]["route"]["domain"], "fast.example.com");
    assert!((ranking[0]["composite_score"].as_f64().unwrap() - 99.7).abs() < 1e-9);
    assert_eq!(ranking[0]["sample_count"], 6);

    // Too few samples: the configured weight stands in for the score
    assert_eq!(ranking[1]["route"]["domain"], "sparse.example.com");
    assert_eq!(ranking[1]["composite_score"], 50.0);
    assert_eq!(ranking[1]["sample_count"], 2);
}

#[tokio::test]
async fn test_route_performance_report_and_overview() {
    let (app, pool) = test_app().await;
    let statistics = StatisticsRepository::new(pool.clone());

    let (_, created) = send_request(
        &app,
        Method::POST,
        "/api/v1/routes",
        Some(json!({ "domain": "node.example.com", "protocol": "http", "port": 80, "weight": 7 })),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();
    let route_id: Uuid = id.parse().unwrap();

    append_success(&statistics, route_id, 1024 * 1024, 1000, 60).await;

    let (status, report) = send_request(
        &app,
        Method::GET,
        &format!("/api/v1/performance/routes/{id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["sample_count"], 1);
    assert_eq!(report["composite_score"], 7.0);
    assert_eq!(report["success_rate"], 100.0);

    let (status, _) = send_request(
        &app,
        Method::GET,
        "/api/v1/performance/routes/00000000-0000-0000-0000-000000000001",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, overview) =
        send_request(&app, Method::GET, "/api/v1/performance/overview", None).await;
    assert_eq!(status, StatusCode::OK);
    let overview = overview.as_array().unwrap();
    assert_eq!(overview.len(), 1);
    assert_eq!(overview[0]["total_requests"], 1);
}

#[tokio::test]
async fn test_selector_handles_empty_route_set() {
    let pool = test_pool().await;
    let config = Config::default();

    let scoring = Arc::new(ScoringService::new(
        StatisticsRepository::new(pool.clone()),
        &config.balancer,
    ));
    let selector = RouteSelector::new(RouteRepository::new(pool.clone()), scoring);

    let mut rng = fastrand::Rng::with_seed(11);
    assert!(selector.select_by_weight(&mut rng).await.unwrap().is_none());
    assert!(selector
        .select_by_performance(&mut rng)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_selector_uses_weight_until_evidence_accumulates() {
    let (app, pool) = test_app().await;
    let config = Config::default();

    send_request(
        &app,
        Method::POST,
        "/api/v1/routes",
        Some(json!({ "domain": "only.example.com", "protocol": "http", "port": 80, "weight": 9 })),
    )
    .await;

    let scoring = Arc::new(ScoringService::new(
        StatisticsRepository::new(pool.clone()),
        &config.balancer,
    ));
    let selector = RouteSelector::new(RouteRepository::new(pool.clone()), scoring);

    // No telemetry at all: the weight fallback still yields a selection
    let mut rng = fastrand::Rng::with_seed(21);
    let selected = selector.select_by_performance(&mut rng).await.unwrap();
    assert_eq!(selected.unwrap().domain, "only.example.com");
}
