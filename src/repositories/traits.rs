//! Common repository traits

use crate::errors::RepositoryResult;
use async_trait::async_trait;

/// Generic data access interface for entities with a primary key
///
/// Invariant enforcement (validation, uniqueness) lives in the service
/// layer; implementations of this trait only move validated data in and
/// out of the backing store.
#[async_trait]
pub trait Repository<T, K> {
    type CreateRequest;
    type UpdateRequest;

    async fn find_by_id(&self, id: K) -> RepositoryResult<Option<T>>;
    async fn find_all(&self) -> RepositoryResult<Vec<T>>;
    async fn create(&self, request: Self::CreateRequest) -> RepositoryResult<T>;
    async fn update(&self, id: K, request: Self::UpdateRequest) -> RepositoryResult<T>;
    /// Returns false when no row matched the id
    async fn delete(&self, id: K) -> RepositoryResult<bool>;
}
