//! Delivery link resolution
//!
//! Consumes the external file-resolution service: a media path is looked
//! up once to obtain its file id, and the delivery URL is then rendered on
//! whichever route was selected for the request. Path-to-file-id lookups
//! are memoized in an explicit in-process cache.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{config::ResolverConfig, errors::AppError, models::DownloadRoute};

#[async_trait]
pub trait LinkResolver: Send + Sync {
    /// Resolve a delivery URL for `path`, bound to the given route
    ///
    /// Fails with `NotFound` when the resolver does not know the path.
    async fn resolve(&self, route: &DownloadRoute, path: &str) -> Result<String, AppError>;
}

#[derive(Debug, Deserialize)]
struct FsListResponse {
    #[serde(default)]
    items: Vec<FsItem>,
}

#[derive(Debug, Deserialize)]
struct FsItem {
    file_id: String,
}

pub struct HttpLinkResolver {
    client: reqwest::Client,
    resolver_url: String,
    file_id_cache: RwLock<HashMap<String, String>>,
}

impl HttpLinkResolver {
    pub fn new(client: reqwest::Client, config: &ResolverConfig) -> Self {
        Self {
            client,
            resolver_url: config.url.trim_end_matches('/').to_string(),
            file_id_cache: RwLock::new(HashMap::new()),
        }
    }

    async fn file_id_for(&self, path: &str) -> Result<String, AppError> {
        if let Some(file_id) = self.file_id_cache.read().await.get(path) {
            return Ok(file_id.clone());
        }

        let url = format!("{}/api/fs/list", self.resolver_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "path": path }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::upstream(format!(
                "link resolver returned {} for {}",
                response.status(),
                path
            )));
        }

        let listing: FsListResponse = response
            .json()
            .await
            .map_err(|e| AppError::upstream(format!("link resolver payload invalid: {}", e)))?;

        let file_id = listing
            .items
            .into_iter()
            .next()
            .map(|item| item.file_id)
            .ok_or_else(|| AppError::not_found("file", path))?;

        debug!("Resolved file id for {}: {}", path, file_id);
        self.file_id_cache
            .write()
            .await
            .insert(path.to_string(), file_id.clone());

        Ok(file_id)
    }
}

#[async_trait]
impl LinkResolver for HttpLinkResolver {
    async fn resolve(&self, route: &DownloadRoute, path: &str) -> Result<String, AppError> {
        let file_id = self.file_id_for(path).await?;
        Ok(format!("{}/d/{}", route.full_url(), file_id))
    }
}
