//! Download telemetry ingestion and client reports
//!
//! Appends are best-effort from the serving path's perspective: the
//! detached variant spawns the insert and swallows failures after logging,
//! so a download response is never delayed by telemetry persistence.

use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    errors::AppError,
    models::{
        BatchRecordRequest, BatchRecordResponse, ClientStatisticsReport, DownloadStatistic,
        NewDownloadStatistic, RecordStatisticRequest,
    },
    repositories::StatisticsRepository,
};

pub struct StatisticsService {
    statistics: StatisticsRepository,
    abuse_max_requests_per_hour: i64,
}

impl StatisticsService {
    pub fn new(statistics: StatisticsRepository, abuse_max_requests_per_hour: i64) -> Self {
        Self {
            statistics,
            abuse_max_requests_per_hour,
        }
    }

    /// Validate an ingestion payload and fill in defaults for absent fields
    ///
    /// `fallback_ip` is the transport-derived client address used when the
    /// payload carries none.
    pub fn resolve_request(
        request: RecordStatisticRequest,
        fallback_ip: Option<String>,
    ) -> Result<NewDownloadStatistic, AppError> {
        let download_size = request.download_size.unwrap_or(0);
        let download_duration = request.download_duration.unwrap_or(0);
        let response_time = request.response_time.unwrap_or(0);

        if download_size < 0 {
            return Err(AppError::validation("download_size must not be negative"));
        }
        if download_duration < 0 {
            return Err(AppError::validation(
                "download_duration must not be negative",
            ));
        }
        if response_time < 0 {
            return Err(AppError::validation("response_time must not be negative"));
        }

        let client_ip = request
            .client_ip
            .filter(|ip| !ip.is_empty())
            .or(fallback_ip)
            .unwrap_or_default();

        Ok(NewDownloadStatistic {
            route_id: request.route_id.unwrap_or(Uuid::nil()),
            client_ip,
            file_path: request.file_path,
            download_size,
            download_duration,
            response_time,
            success: request.success.unwrap_or(false),
            user_agent: request.user_agent,
        })
    }

    /// Append one record, waiting for the insert to complete
    pub async fn record(
        &self,
        request: RecordStatisticRequest,
        fallback_ip: Option<String>,
    ) -> Result<DownloadStatistic, AppError> {
        let new = Self::resolve_request(request, fallback_ip)?;
        let statistic = self.statistics.append(new).await?;

        info!(
            "Recorded download statistic: route={}, client={}, bandwidth={:.2}MB/s, success={}",
            statistic.route_id, statistic.client_ip, statistic.bandwidth, statistic.success
        );
        Ok(statistic)
    }

    /// Validate now, insert in the background; failures are logged and
    /// swallowed
    pub fn record_detached(
        &self,
        request: RecordStatisticRequest,
        fallback_ip: Option<String>,
    ) -> Result<(), AppError> {
        let new = Self::resolve_request(request, fallback_ip)?;
        let statistics = self.statistics.clone();

        tokio::spawn(async move {
            if let Err(e) = statistics.append(new).await {
                warn!("Failed to record download statistic: {}", e);
            }
        });

        Ok(())
    }

    /// Append a batch of records, reporting per-record success and failure
    /// counts; never fails as a whole
    pub async fn record_batch(
        &self,
        batch: BatchRecordRequest,
        fallback_ip: Option<String>,
    ) -> BatchRecordResponse {
        let mut success_count = 0;
        let mut failure_count = 0;

        for request in batch.statistics {
            match self.record(request, fallback_ip.clone()).await {
                Ok(_) => success_count += 1,
                Err(e) => {
                    warn!("Failed to record batched statistic: {}", e);
                    failure_count += 1;
                }
            }
        }

        info!(
            "Batch record completed: {} succeeded, {} failed",
            success_count, failure_count
        );
        BatchRecordResponse {
            success_count,
            failure_count,
        }
    }

    /// Download report for one client over the trailing `hours`
    pub async fn client_report(
        &self,
        client_ip: &str,
        hours: i64,
    ) -> Result<ClientStatisticsReport, AppError> {
        let from = Utc::now() - Duration::hours(hours);
        let statistics = self.statistics.find_by_client_since(client_ip, from).await?;

        let successful: Vec<&DownloadStatistic> =
            statistics.iter().filter(|s| s.success).collect();
        let average_bandwidth = if successful.is_empty() {
            0.0
        } else {
            successful.iter().map(|s| s.bandwidth).sum::<f64>() / successful.len() as f64
        };

        Ok(ClientStatisticsReport {
            client_ip: client_ip.to_string(),
            hours,
            total_downloads: statistics.len(),
            successful_downloads: successful.len(),
            average_bandwidth,
            statistics,
        })
    }

    /// Whether a client exceeded the configured hourly request ceiling
    ///
    /// Exposed as a signal only; nothing in this crate enforces it.
    pub async fn is_client_abusing(&self, client_ip: &str) -> Result<bool, AppError> {
        let from = Utc::now() - Duration::hours(1);
        let count = self.statistics.count_by_client(client_ip, from).await?;
        Ok(count > self.abuse_max_requests_per_hour)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_request_defaults_absent_fields() {
        let new = StatisticsService::resolve_request(RecordStatisticRequest::default(), None)
            .unwrap();

        assert_eq!(new.route_id, Uuid::nil());
        assert_eq!(new.client_ip, "");
        assert_eq!(new.download_size, 0);
        assert_eq!(new.download_duration, 0);
        assert_eq!(new.response_time, 0);
        assert!(!new.success);
        assert!(new.file_path.is_none());
        assert!(new.user_agent.is_none());
    }

    #[test]
    fn test_resolve_request_prefers_payload_ip_over_fallback() {
        let request = RecordStatisticRequest {
            client_ip: Some("203.0.113.7".to_string()),
            ..Default::default()
        };
        let new =
            StatisticsService::resolve_request(request, Some("10.0.0.1".to_string())).unwrap();
        assert_eq!(new.client_ip, "203.0.113.7");

        let request = RecordStatisticRequest {
            client_ip: Some(String::new()),
            ..Default::default()
        };
        let new =
            StatisticsService::resolve_request(request, Some("10.0.0.1".to_string())).unwrap();
        assert_eq!(new.client_ip, "10.0.0.1");
    }

    #[test]
    fn test_resolve_request_rejects_negative_values() {
        for request in [
            RecordStatisticRequest {
                download_size: Some(-1),
                ..Default::default()
            },
            RecordStatisticRequest {
                download_duration: Some(-1),
                ..Default::default()
            },
            RecordStatisticRequest {
                response_time: Some(-1),
                ..Default::default()
            },
        ] {
            assert!(StatisticsService::resolve_request(request, None).is_err());
        }
    }
}
