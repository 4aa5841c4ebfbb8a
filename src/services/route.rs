//! Download route management
//!
//! Owns the validation and uniqueness invariants for routes: non-empty
//! domain, port in [1, 65535], weight in [1, 100], and a globally unique
//! (domain, port) pair.

use tracing::info;
use uuid::Uuid;

use crate::{
    errors::{AppError, RepositoryError},
    models::{DownloadRoute, RouteCreateRequest, RouteProtocol, RouteUpdateRequest},
    repositories::{traits::Repository, RouteRepository},
};

pub struct RouteService {
    routes: RouteRepository,
}

impl RouteService {
    pub fn new(routes: RouteRepository) -> Self {
        Self { routes }
    }

    /// All routes, most recently created first
    pub async fn list(&self) -> Result<Vec<DownloadRoute>, AppError> {
        Ok(self.routes.find_all().await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<DownloadRoute, AppError> {
        self.routes
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("download_route", id.to_string()))
    }

    pub async fn create(&self, request: RouteCreateRequest) -> Result<DownloadRoute, AppError> {
        validate_route(&request.domain, request.port, request.weight.unwrap_or(1))?;

        if self
            .routes
            .exists_by_domain_and_port(&request.domain, request.port)
            .await?
        {
            return Err(AppError::conflict(
                "download_route",
                format!("{}:{} already exists", request.domain, request.port),
            ));
        }

        let route = self
            .routes
            .create(request)
            .await
            .map_err(Self::map_repository_error)?;

        info!("Created download route: {}", route.full_url());
        Ok(route)
    }

    pub async fn update(
        &self,
        id: Uuid,
        request: RouteUpdateRequest,
    ) -> Result<DownloadRoute, AppError> {
        let existing = self.get(id).await?;

        validate_route(&request.domain, request.port, request.weight)?;

        // Re-check uniqueness only when the identifying pair changed
        if (existing.domain != request.domain || existing.port != request.port)
            && self
                .routes
                .exists_by_domain_and_port(&request.domain, request.port)
                .await?
        {
            return Err(AppError::conflict(
                "download_route",
                format!("{}:{} already exists", request.domain, request.port),
            ));
        }

        let route = self
            .routes
            .update(id, request)
            .await
            .map_err(Self::map_repository_error)?;

        info!("Updated download route {}: {}", id, route.full_url());
        Ok(route)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        if !self.routes.delete(id).await? {
            return Err(AppError::not_found("download_route", id.to_string()));
        }

        info!("Deleted download route {}", id);
        Ok(())
    }

    pub async fn search_by_domain(&self, domain: &str) -> Result<Vec<DownloadRoute>, AppError> {
        Ok(self.routes.search_by_domain(domain).await?)
    }

    pub async fn find_by_protocol(
        &self,
        protocol: RouteProtocol,
    ) -> Result<Vec<DownloadRoute>, AppError> {
        Ok(self.routes.find_by_protocol(protocol).await?)
    }

    /// A concurrent writer can still hit the UNIQUE index between the
    /// existence check and the insert, or delete the row between the
    /// lookup and the update; keep those outcomes structured
    fn map_repository_error(e: RepositoryError) -> AppError {
        match e {
            RepositoryError::ConstraintViolation { .. } => {
                AppError::conflict("download_route", "domain and port already exist")
            }
            RepositoryError::RecordNotFound { value, .. } => {
                AppError::not_found("download_route", value)
            }
            other => AppError::Repository(other),
        }
    }
}

fn validate_route(domain: &str, port: i32, weight: i32) -> Result<(), AppError> {
    if domain.trim().is_empty() {
        return Err(AppError::validation("domain must not be empty"));
    }
    if !(1..=65535).contains(&port) {
        return Err(AppError::validation("port must be between 1 and 65535"));
    }
    if !(1..=100).contains(&weight) {
        return Err(AppError::validation("weight must be between 1 and 100"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_route_rejects_bad_input() {
        assert!(validate_route("a.com", 70000, 1).is_err());
        assert!(validate_route("a.com", 0, 1).is_err());
        assert!(validate_route("", 80, 1).is_err());
        assert!(validate_route("   ", 80, 1).is_err());
        assert!(validate_route("a.com", 80, 0).is_err());
        assert!(validate_route("a.com", 80, 101).is_err());
    }

    #[test]
    fn test_validate_route_accepts_bounds() {
        assert!(validate_route("a.com", 1, 1).is_ok());
        assert!(validate_route("a.com", 65535, 100).is_ok());
    }
}
