use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A configured backend eligible to serve a download
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct DownloadRoute {
    #[sqlx(try_from = "String")]
    pub id: Uuid,
    pub domain: String,
    pub protocol: RouteProtocol,
    pub port: i32,
    pub weight: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadRoute {
    /// Render the base URL for this route, e.g. `https://cdn.example.com:8443`
    pub fn full_url(&self) -> String {
        format!("{}://{}:{}", self.protocol.as_str(), self.domain, self.port)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "route_protocol", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RouteProtocol {
    Http,
    Https,
}

impl RouteProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteProtocol::Http => "http",
            RouteProtocol::Https => "https",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteCreateRequest {
    pub domain: String,
    pub protocol: RouteProtocol,
    pub port: i32,
    /// Defaults to 1 when omitted
    pub weight: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteUpdateRequest {
    pub domain: String,
    pub protocol: RouteProtocol,
    pub port: i32,
    pub weight: i32,
}

/// One observed download outcome attributed to a route
///
/// Rows are append-only: created once, never mutated, destroyed only by the
/// retention sweep.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DownloadStatistic {
    #[sqlx(try_from = "String")]
    pub id: Uuid,
    #[sqlx(try_from = "String")]
    pub route_id: Uuid,
    pub client_ip: String,
    pub file_path: Option<String>,
    pub download_size: i64,
    pub download_duration: i64,
    pub bandwidth: f64,
    pub response_time: i64,
    pub success: bool,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Bandwidth in MB/s: size in bytes over duration in milliseconds.
///
/// A zero or negative duration yields 0.0 rather than a division error.
pub fn calculate_bandwidth(download_size: i64, download_duration: i64) -> f64 {
    if download_duration > 0 {
        let size_mb = download_size as f64 / (1024.0 * 1024.0);
        let duration_seconds = download_duration as f64 / 1000.0;
        size_mb / duration_seconds
    } else {
        0.0
    }
}

/// A fully resolved outcome record, ready for insertion
///
/// Bandwidth and the creation timestamp are derived at insert time by the
/// statistics repository.
#[derive(Debug, Clone)]
pub struct NewDownloadStatistic {
    pub route_id: Uuid,
    pub client_ip: String,
    pub file_path: Option<String>,
    pub download_size: i64,
    pub download_duration: i64,
    pub response_time: i64,
    pub success: bool,
    pub user_agent: Option<String>,
}

/// Telemetry ingestion payload; every field may be absent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordStatisticRequest {
    pub route_id: Option<Uuid>,
    pub client_ip: Option<String>,
    pub file_path: Option<String>,
    pub download_size: Option<i64>,
    pub download_duration: Option<i64>,
    pub response_time: Option<i64>,
    pub success: Option<bool>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecordRequest {
    pub statistics: Vec<RecordStatisticRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecordResponse {
    pub success_count: usize,
    pub failure_count: usize,
}

/// Derived per-route performance over a trailing window; never persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutePerformance {
    pub route_id: Uuid,
    pub avg_bandwidth: f64,
    pub avg_response_time: f64,
    pub success_rate: f64,
    pub sample_count: usize,
    pub composite_score: f64,
}

/// Raw per-route aggregates over the trailing window, before any scoring
///
/// Unlike [`RoutePerformance`], the averages here run over all records in
/// the window, failed transfers included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteWindowAggregate {
    pub route_id: Uuid,
    pub avg_bandwidth: f64,
    pub avg_response_time: f64,
    pub success_rate: f64,
    pub total_requests: usize,
}

/// A route joined with its current performance, as served by the ranking API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedRoute {
    pub route: DownloadRoute,
    pub avg_bandwidth: f64,
    pub avg_response_time: f64,
    pub success_rate: f64,
    pub sample_count: usize,
    pub composite_score: f64,
}

impl RankedRoute {
    pub fn new(route: DownloadRoute, performance: RoutePerformance) -> Self {
        Self {
            route,
            avg_bandwidth: performance.avg_bandwidth,
            avg_response_time: performance.avg_response_time,
            success_rate: performance.success_rate,
            sample_count: performance.sample_count,
            composite_score: performance.composite_score,
        }
    }
}

/// Per-client download report over a trailing window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientStatisticsReport {
    pub client_ip: String,
    pub hours: i64,
    pub total_downloads: usize,
    pub successful_downloads: usize,
    pub average_bandwidth: f64,
    pub statistics: Vec<DownloadStatistic>,
}

/// Outcome of a retention sweep run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SweepOutcome {
    /// Records older than the returned cutoff were purged
    Completed { cutoff: DateTime<Utc> },
    /// Another sweep was already in progress; nothing was done
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bandwidth_formula() {
        // 100MB over 10 seconds is exactly 10 MB/s
        let bandwidth = calculate_bandwidth(104_857_600, 10_000);
        assert!((bandwidth - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_bandwidth_zero_duration() {
        assert_eq!(calculate_bandwidth(104_857_600, 0), 0.0);
        assert_eq!(calculate_bandwidth(0, 0), 0.0);
    }

    #[test]
    fn test_full_url() {
        let route = DownloadRoute {
            id: Uuid::new_v4(),
            domain: "cdn.example.com".to_string(),
            protocol: RouteProtocol::Https,
            port: 8443,
            weight: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(route.full_url(), "https://cdn.example.com:8443");
    }
}
