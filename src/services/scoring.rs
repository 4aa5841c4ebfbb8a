//! Route performance scoring
//!
//! Turns the trailing telemetry window into a comparable 0-100 score per
//! route. Scores are pure functions of the window's records: bandwidth
//! weighs 40%, response time and success rate 30% each. Routes with fewer
//! than the configured minimum of samples fall back to their configured
//! weight, which shares the 1-100 range with the composite score.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::{
    config::BalancerConfig,
    errors::AppError,
    models::{
        DownloadRoute, DownloadStatistic, RankedRoute, RoutePerformance, RouteWindowAggregate,
    },
    repositories::StatisticsRepository,
};

/// Bandwidth treated as saturation: this fast or faster scores 100
const BANDWIDTH_SATURATION_MBPS: f64 = 10.0;
/// Response-time score decays linearly, reaching 0 at 10 000 ms
const RESPONSE_TIME_FLOOR_MS: f64 = 10_000.0;

const BANDWIDTH_WEIGHT: f64 = 0.4;
const RESPONSE_TIME_WEIGHT: f64 = 0.3;
const SUCCESS_RATE_WEIGHT: f64 = 0.3;

pub struct ScoringService {
    statistics: StatisticsRepository,
    window_hours: i64,
    min_samples: usize,
}

impl ScoringService {
    pub fn new(statistics: StatisticsRepository, config: &BalancerConfig) -> Self {
        Self {
            statistics,
            window_hours: config.score_window_hours,
            min_samples: config.min_samples,
        }
    }

    /// Score a single route over the trailing window
    pub async fn score_route(&self, route: &DownloadRoute) -> Result<RoutePerformance, AppError> {
        let now = Utc::now();
        let from = now - Duration::hours(self.window_hours);
        let records = self
            .statistics
            .query_window(Some(route.id), from, now)
            .await?;

        Ok(score_from_records(route, &records, self.min_samples))
    }

    /// Score every given route from a single window query
    pub async fn score_routes(
        &self,
        routes: &[DownloadRoute],
    ) -> Result<Vec<RoutePerformance>, AppError> {
        let now = Utc::now();
        let from = now - Duration::hours(self.window_hours);
        let records = self.statistics.query_window(None, from, now).await?;

        let mut by_route: HashMap<Uuid, Vec<DownloadStatistic>> = HashMap::new();
        for record in records {
            by_route.entry(record.route_id).or_default().push(record);
        }

        let empty = Vec::new();
        let performances = routes
            .iter()
            .map(|route| {
                let records = by_route.get(&route.id).unwrap_or(&empty);
                let performance = score_from_records(route, records, self.min_samples);
                debug!(
                    "Route {} score: bandwidth={:.2}, response_time={:.2}, success_rate={:.2}, composite={:.2}",
                    route.id,
                    performance.avg_bandwidth,
                    performance.avg_response_time,
                    performance.success_rate,
                    performance.composite_score
                );
                performance
            })
            .collect();

        Ok(performances)
    }

    /// Full ranking sorted by composite score descending, ties broken by
    /// route id ascending for determinism
    pub async fn ranking(&self, routes: Vec<DownloadRoute>) -> Result<Vec<RankedRoute>, AppError> {
        let performances = self.score_routes(&routes).await?;

        let mut ranked: Vec<RankedRoute> = routes
            .into_iter()
            .zip(performances)
            .map(|(route, performance)| RankedRoute::new(route, performance))
            .collect();

        ranked.sort_by(|a, b| {
            b.composite_score
                .partial_cmp(&a.composite_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.route.id.cmp(&b.route.id))
        });

        Ok(ranked)
    }

    /// Raw window aggregates for every route that has records, averaged
    /// over all transfers including failed ones
    pub async fn overview(&self) -> Result<Vec<RouteWindowAggregate>, AppError> {
        let now = Utc::now();
        let from = now - Duration::hours(self.window_hours);
        let records = self.statistics.query_window(None, from, now).await?;

        let mut by_route: HashMap<Uuid, Vec<DownloadStatistic>> = HashMap::new();
        for record in records {
            by_route.entry(record.route_id).or_default().push(record);
        }

        let mut aggregates: Vec<RouteWindowAggregate> = by_route
            .into_iter()
            .map(|(route_id, records)| {
                let total = records.len();
                let successes = records.iter().filter(|r| r.success).count();
                RouteWindowAggregate {
                    route_id,
                    avg_bandwidth: mean(records.iter().map(|r| r.bandwidth)),
                    avg_response_time: mean(records.iter().map(|r| r.response_time as f64)),
                    success_rate: 100.0 * successes as f64 / total as f64,
                    total_requests: total,
                }
            })
            .collect();

        aggregates.sort_by(|a, b| {
            b.avg_bandwidth
                .partial_cmp(&a.avg_bandwidth)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.route_id.cmp(&b.route_id))
        });

        Ok(aggregates)
    }
}

/// Derive a route's performance from its window records
///
/// Averages run over successful records only; the success rate runs over
/// everything. Below `min_samples` total records the composite falls back
/// to the route's configured weight.
pub fn score_from_records(
    route: &DownloadRoute,
    records: &[DownloadStatistic],
    min_samples: usize,
) -> RoutePerformance {
    let total = records.len();
    let successful: Vec<&DownloadStatistic> = records.iter().filter(|r| r.success).collect();

    let avg_bandwidth = mean(successful.iter().map(|r| r.bandwidth));
    let avg_response_time = mean(successful.iter().map(|r| r.response_time as f64));
    let success_rate = if total == 0 {
        0.0
    } else {
        100.0 * successful.len() as f64 / total as f64
    };

    let composite_score = if total < min_samples {
        route.weight as f64
    } else {
        composite(avg_bandwidth, avg_response_time, success_rate)
    };

    RoutePerformance {
        route_id: route.id,
        avg_bandwidth,
        avg_response_time,
        success_rate,
        sample_count: total,
        composite_score,
    }
}

fn composite(avg_bandwidth: f64, avg_response_time: f64, success_rate: f64) -> f64 {
    let bandwidth_score = (avg_bandwidth / BANDWIDTH_SATURATION_MBPS).min(1.0) * 100.0;
    let response_time_score =
        (100.0 - avg_response_time / (RESPONSE_TIME_FLOOR_MS / 100.0)).max(0.0);
    let success_score = success_rate;

    bandwidth_score * BANDWIDTH_WEIGHT
        + response_time_score * RESPONSE_TIME_WEIGHT
        + success_score * SUCCESS_RATE_WEIGHT
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn route_with_weight(weight: i32) -> DownloadRoute {
        DownloadRoute {
            id: Uuid::new_v4(),
            domain: "node.example.com".to_string(),
            protocol: crate::models::RouteProtocol::Http,
            port: 8080,
            weight,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn record(route_id: Uuid, bandwidth: f64, response_time: i64, success: bool) -> DownloadStatistic {
        DownloadStatistic {
            id: Uuid::new_v4(),
            route_id,
            client_ip: "10.0.0.1".to_string(),
            file_path: Some("/media/movie.mkv".to_string()),
            download_size: 0,
            download_duration: 0,
            bandwidth,
            response_time,
            success,
            user_agent: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_insufficient_samples_fall_back_to_weight() {
        let route = route_with_weight(42);
        // Four extreme samples must not override the configured weight
        let records: Vec<_> = (0..4)
            .map(|_| record(route.id, 1000.0, 1, true))
            .collect();

        let performance = score_from_records(&route, &records, 5);
        assert_eq!(performance.sample_count, 4);
        assert_eq!(performance.composite_score, 42.0);
    }

    #[test]
    fn test_empty_window_scores_weight_and_zero_rates() {
        let route = route_with_weight(7);
        let performance = score_from_records(&route, &[], 5);
        assert_eq!(performance.avg_bandwidth, 0.0);
        assert_eq!(performance.avg_response_time, 0.0);
        assert_eq!(performance.success_rate, 0.0);
        assert_eq!(performance.composite_score, 7.0);
    }

    #[test]
    fn test_composite_saturates_at_100() {
        let route = route_with_weight(1);
        // Saturated bandwidth, instant responses, all successful
        let records: Vec<_> = (0..10)
            .map(|_| record(route.id, 50.0, 0, true))
            .collect();

        let performance = score_from_records(&route, &records, 5);
        assert!((performance.composite_score - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_composite_stays_in_range_for_extreme_inputs() {
        let route = route_with_weight(100);
        let records: Vec<_> = (0..20)
            .map(|i| record(route.id, 1e12, i64::MAX / 2, i % 2 == 0))
            .collect();

        let performance = score_from_records(&route, &records, 5);
        assert!(performance.composite_score >= 0.0);
        assert!(performance.composite_score <= 100.0);
    }

    #[test]
    fn test_averages_use_successful_records_only() {
        let route = route_with_weight(1);
        let mut records = vec![
            record(route.id, 8.0, 200, true),
            record(route.id, 4.0, 400, true),
        ];
        // Failed transfers contribute to the success rate, not the averages
        records.extend((0..4).map(|_| record(route.id, 0.0, 90_000, false)));

        let performance = score_from_records(&route, &records, 5);
        assert!((performance.avg_bandwidth - 6.0).abs() < 1e-9);
        assert!((performance.avg_response_time - 300.0).abs() < 1e-9);
        assert!((performance.success_rate - (200.0 / 6.0)).abs() < 1e-9);
    }

    #[test]
    fn test_composite_weighting() {
        let route = route_with_weight(1);
        // 5 MB/s, 2000ms, all successful over 5 samples:
        // bandwidth 50 * 0.4 + response (100 - 20) * 0.3 + success 100 * 0.3
        let records: Vec<_> = (0..5)
            .map(|_| record(route.id, 5.0, 2000, true))
            .collect();

        let performance = score_from_records(&route, &records, 5);
        assert!((performance.composite_score - (20.0 + 24.0 + 30.0)).abs() < 1e-9);
    }
}
