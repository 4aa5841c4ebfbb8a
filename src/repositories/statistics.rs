//! Download statistics repository
//!
//! The `download_statistics` table is an append-only, time-indexed log.
//! Rows are inserted with `append`, read back through window queries, and
//! removed only by `purge_before`.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    errors::{RepositoryError, RepositoryResult},
    models::{calculate_bandwidth, DownloadStatistic, NewDownloadStatistic},
};

const SELECT_COLUMNS: &str = "id, route_id, client_ip, file_path, download_size, \
     download_duration, bandwidth, response_time, success, user_agent, created_at";

#[derive(Clone)]
pub struct StatisticsRepository {
    pool: SqlitePool,
}

impl StatisticsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert one outcome record, stamping its id and creation time and
    /// deriving the bandwidth from size and duration
    pub async fn append(
        &self,
        new: NewDownloadStatistic,
    ) -> RepositoryResult<DownloadStatistic> {
        let statistic = DownloadStatistic {
            id: Uuid::new_v4(),
            route_id: new.route_id,
            client_ip: new.client_ip,
            file_path: new.file_path,
            download_size: new.download_size,
            download_duration: new.download_duration,
            bandwidth: calculate_bandwidth(new.download_size, new.download_duration),
            response_time: new.response_time,
            success: new.success,
            user_agent: new.user_agent,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO download_statistics (
                 id, route_id, client_ip, file_path, download_size,
                 download_duration, bandwidth, response_time, success,
                 user_agent, created_at
             )
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(statistic.id.to_string())
        .bind(statistic.route_id.to_string())
        .bind(&statistic.client_ip)
        .bind(&statistic.file_path)
        .bind(statistic.download_size)
        .bind(statistic.download_duration)
        .bind(statistic.bandwidth)
        .bind(statistic.response_time)
        .bind(statistic.success)
        .bind(&statistic.user_agent)
        .bind(statistic.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::query_failed("insert_download_statistic", e.to_string()))?;

        Ok(statistic)
    }

    /// Records with `created_at` in `[from, to)`, optionally for one route
    pub async fn query_window(
        &self,
        route_id: Option<Uuid>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepositoryResult<Vec<DownloadStatistic>> {
        let records = match route_id {
            Some(route_id) => {
                sqlx::query_as::<_, DownloadStatistic>(&format!(
                    "SELECT {SELECT_COLUMNS} FROM download_statistics
                     WHERE route_id = ? AND created_at >= ? AND created_at < ?
                     ORDER BY created_at ASC"
                ))
                .bind(route_id.to_string())
                .bind(from.to_rfc3339())
                .bind(to.to_rfc3339())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, DownloadStatistic>(&format!(
                    "SELECT {SELECT_COLUMNS} FROM download_statistics
                     WHERE created_at >= ? AND created_at < ?
                     ORDER BY created_at ASC"
                ))
                .bind(from.to_rfc3339())
                .bind(to.to_rfc3339())
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| RepositoryError::query_failed("query_window", e.to_string()))?;

        Ok(records)
    }

    /// Records for one client since `from`, newest first
    pub async fn find_by_client_since(
        &self,
        client_ip: &str,
        from: DateTime<Utc>,
    ) -> RepositoryResult<Vec<DownloadStatistic>> {
        let records = sqlx::query_as::<_, DownloadStatistic>(&format!(
            "SELECT {SELECT_COLUMNS} FROM download_statistics
             WHERE client_ip = ? AND created_at >= ?
             ORDER BY created_at DESC"
        ))
        .bind(client_ip)
        .bind(from.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::query_failed("find_by_client_since", e.to_string()))?;

        Ok(records)
    }

    /// Request count for one client since `from`
    pub async fn count_by_client(
        &self,
        client_ip: &str,
        from: DateTime<Utc>,
    ) -> RepositoryResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM download_statistics
             WHERE client_ip = ? AND created_at >= ?",
        )
        .bind(client_ip)
        .bind(from.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::query_failed("count_by_client", e.to_string()))?;

        Ok(count)
    }

    /// Delete every record strictly older than `cutoff`; idempotent
    pub async fn purge_before(&self, cutoff: DateTime<Utc>) -> RepositoryResult<u64> {
        let result = sqlx::query("DELETE FROM download_statistics WHERE created_at < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::query_failed("purge_before", e.to_string()))?;

        Ok(result.rows_affected())
    }
}
