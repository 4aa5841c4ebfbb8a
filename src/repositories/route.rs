//! Download route repository
//!
//! Data access operations for the `download_routes` table. Uniqueness of
//! `(domain, port)` is backed by a UNIQUE index; violations surface as
//! `RepositoryError::ConstraintViolation`.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    errors::{RepositoryError, RepositoryResult},
    models::{DownloadRoute, RouteCreateRequest, RouteProtocol, RouteUpdateRequest},
    repositories::traits::Repository,
};

const SELECT_COLUMNS: &str = "id, domain, protocol, port, weight, created_at, updated_at";

pub struct RouteRepository {
    pool: SqlitePool,
}

impl RouteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Check whether a route with the given (domain, port) pair exists
    pub async fn exists_by_domain_and_port(
        &self,
        domain: &str,
        port: i32,
    ) -> RepositoryResult<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM download_routes WHERE domain = ? AND port = ?",
        )
        .bind(domain)
        .bind(port)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::query_failed("exists_by_domain_and_port", e.to_string()))?;

        Ok(count > 0)
    }

    /// Case-insensitive substring search on the domain
    pub async fn search_by_domain(&self, domain: &str) -> RepositoryResult<Vec<DownloadRoute>> {
        let pattern = format!("%{}%", domain.to_lowercase());
        let routes = sqlx::query_as::<_, DownloadRoute>(&format!(
            "SELECT {SELECT_COLUMNS} FROM download_routes
             WHERE LOWER(domain) LIKE ?
             ORDER BY created_at DESC"
        ))
        .bind(pattern)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::query_failed("search_by_domain", e.to_string()))?;

        Ok(routes)
    }

    pub async fn find_by_protocol(
        &self,
        protocol: RouteProtocol,
    ) -> RepositoryResult<Vec<DownloadRoute>> {
        let routes = sqlx::query_as::<_, DownloadRoute>(&format!(
            "SELECT {SELECT_COLUMNS} FROM download_routes
             WHERE protocol = ?
             ORDER BY created_at DESC"
        ))
        .bind(protocol.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::query_failed("find_by_protocol", e.to_string()))?;

        Ok(routes)
    }

    fn map_unique_violation(query: &str, e: sqlx::Error) -> RepositoryError {
        if let Some(db_err) = e.as_database_error() {
            if db_err.is_unique_violation() {
                return RepositoryError::constraint_violation(
                    "download_routes.domain_port",
                    db_err.to_string(),
                );
            }
        }
        RepositoryError::query_failed(query, e.to_string())
    }
}

#[async_trait]
impl Repository<DownloadRoute, Uuid> for RouteRepository {
    type CreateRequest = RouteCreateRequest;
    type UpdateRequest = RouteUpdateRequest;

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<DownloadRoute>> {
        let route = sqlx::query_as::<_, DownloadRoute>(&format!(
            "SELECT {SELECT_COLUMNS} FROM download_routes WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::query_failed("find_by_id", e.to_string()))?;

        Ok(route)
    }

    /// All routes, most recently created first
    async fn find_all(&self) -> RepositoryResult<Vec<DownloadRoute>> {
        let routes = sqlx::query_as::<_, DownloadRoute>(&format!(
            "SELECT {SELECT_COLUMNS} FROM download_routes ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::query_failed("find_all", e.to_string()))?;

        Ok(routes)
    }

    async fn create(&self, request: RouteCreateRequest) -> RepositoryResult<DownloadRoute> {
        let now = Utc::now();
        let route = DownloadRoute {
            id: Uuid::new_v4(),
            domain: request.domain,
            protocol: request.protocol,
            port: request.port,
            weight: request.weight.unwrap_or(1),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO download_routes (id, domain, protocol, port, weight, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(route.id.to_string())
        .bind(&route.domain)
        .bind(route.protocol.as_str())
        .bind(route.port)
        .bind(route.weight)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_unique_violation("insert_download_route", e))?;

        Ok(route)
    }

    async fn update(
        &self,
        id: Uuid,
        request: RouteUpdateRequest,
    ) -> RepositoryResult<DownloadRoute> {
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE download_routes
             SET domain = ?, protocol = ?, port = ?, weight = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&request.domain)
        .bind(request.protocol.as_str())
        .bind(request.port)
        .bind(request.weight)
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_unique_violation("update_download_route", e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::record_not_found(
                "download_routes",
                "id",
                id.to_string(),
            ));
        }

        self.find_by_id(id).await?.ok_or_else(|| {
            RepositoryError::record_not_found("download_routes", "id", id.to_string())
        })
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM download_routes WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::query_failed("delete_download_route", e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}
