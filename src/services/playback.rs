//! Playback-info proxying and media-source rewriting
//!
//! Forwards a client's PlaybackInfo request to the upstream Emby server,
//! then rebinds every media source in the answer to a download route
//! chosen by the selector. The rewrite only touches transport fields and
//! the two link fields; everything else in the payload passes through
//! verbatim.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::HeaderMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    config::UpstreamConfig,
    errors::AppError,
    models::DownloadRoute,
    services::{LinkResolver, RouteSelector},
};

/// Hop-specific headers never forwarded to the upstream
const SKIPPED_HEADERS: [&str; 2] = ["host", "content-length"];

pub struct PlaybackService {
    client: reqwest::Client,
    upstream_url: String,
    api_key: String,
    selector: Arc<RouteSelector>,
    link_resolver: Arc<dyn LinkResolver>,
}

impl PlaybackService {
    pub fn new(
        client: reqwest::Client,
        upstream: &UpstreamConfig,
        selector: Arc<RouteSelector>,
        link_resolver: Arc<dyn LinkResolver>,
    ) -> Self {
        Self {
            client,
            upstream_url: upstream.url.trim_end_matches('/').to_string(),
            api_key: upstream.api_key.clone(),
            selector,
            link_resolver,
        }
    }

    /// Proxy one PlaybackInfo request and return the rewritten payload
    pub async fn process_playback_info(
        &self,
        item_id: &str,
        query_params: &HashMap<String, String>,
        headers: &HeaderMap,
        body: Option<Value>,
    ) -> Result<Value, AppError> {
        let url = format!("{}/emby/Items/{}/PlaybackInfo", self.upstream_url, item_id);
        debug!("Forwarding PlaybackInfo request to {}", url);

        let mut query: Vec<(&str, &str)> = query_params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        if !query_params.contains_key("api_key") {
            query.push(("api_key", self.api_key.as_str()));
        }

        let mut request = self.client.post(&url).query(&query);
        for (name, value) in headers {
            if SKIPPED_HEADERS.contains(&name.as_str()) {
                continue;
            }
            if let Ok(value) = value.to_str() {
                request = request.header(name.as_str(), value);
            }
        }

        if let Some(body) = body {
            request = request.json(&body);
        } else {
            request = request.header("content-type", "application/json");
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::upstream(format!(
                "upstream returned {} for PlaybackInfo {}",
                status, item_id
            )));
        }

        let mut payload: Value = response
            .json()
            .await
            .map_err(|e| AppError::upstream(format!("upstream payload invalid: {}", e)))?;

        match self
            .selector
            .select_by_performance(&mut fastrand::Rng::new())
            .await?
        {
            Some(route) => {
                rewrite_media_sources(self.link_resolver.as_ref(), &route, &mut payload).await?;
                info!(
                    "PlaybackInfo for item {} bound to route {}",
                    item_id,
                    route.full_url()
                );
            }
            None => {
                warn!(
                    "No download route available, PlaybackInfo for item {} passed through unmodified",
                    item_id
                );
            }
        }

        Ok(payload)
    }
}

/// Rebind every media source in `payload` to `route`
///
/// Forces the transport flags on each entry and replaces `Path` and
/// `DirectStreamUrl` (each only when present) with a delivery link
/// resolved for that entry. Fields not listed here are left untouched.
pub async fn rewrite_media_sources(
    resolver: &dyn LinkResolver,
    route: &DownloadRoute,
    payload: &mut Value,
) -> Result<(), AppError> {
    let Some(sources) = payload
        .get_mut("MediaSources")
        .and_then(Value::as_array_mut)
    else {
        return Ok(());
    };

    for source in sources {
        let origin = source
            .get("Path")
            .and_then(Value::as_str)
            .or_else(|| source.get("DirectStreamUrl").and_then(Value::as_str))
            .map(str::to_owned);

        let link = match origin {
            Some(path) => Some(resolver.resolve(route, &path).await?),
            None => None,
        };

        apply_transport_overrides(source, link.as_deref());
    }

    Ok(())
}

fn apply_transport_overrides(source: &mut Value, link: Option<&str>) {
    let Some(fields) = source.as_object_mut() else {
        return;
    };

    fields.insert("Protocol".to_string(), Value::from("Http"));
    fields.insert("IsRemote".to_string(), Value::from(true));
    fields.insert("SupportsDirectPlay".to_string(), Value::from(true));
    fields.insert("SupportsDirectStream".to_string(), Value::from(false));
    fields.insert("SupportsTranscoding".to_string(), Value::from(false));

    if let Some(link) = link {
        if fields.contains_key("Path") {
            fields.insert("Path".to_string(), Value::from(link));
        }
        if fields.contains_key("DirectStreamUrl") {
            fields.insert("DirectStreamUrl".to_string(), Value::from(link));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    struct StaticResolver(String);

    #[async_trait]
    impl LinkResolver for StaticResolver {
        async fn resolve(&self, _route: &DownloadRoute, _path: &str) -> Result<String, AppError> {
            Ok(self.0.clone())
        }
    }

    fn test_route() -> DownloadRoute {
        DownloadRoute {
            id: Uuid::new_v4(),
            domain: "h".to_string(),
            protocol: crate::models::RouteProtocol::Http,
            port: 80,
            weight: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_rewrite_binds_path_and_stream_url() {
        let resolver = StaticResolver("http://h/x".to_string());
        let mut payload = json!({
            "MediaSources": [{ "Path": "/x.mp4", "DirectStreamUrl": "/x.mp4" }]
        });

        rewrite_media_sources(&resolver, &test_route(), &mut payload)
            .await
            .unwrap();

        assert_eq!(
            payload,
            json!({
                "MediaSources": [{
                    "Protocol": "Http",
                    "IsRemote": true,
                    "SupportsDirectPlay": true,
                    "SupportsDirectStream": false,
                    "SupportsTranscoding": false,
                    "Path": "http://h/x",
                    "DirectStreamUrl": "http://h/x"
                }]
            })
        );
    }

    #[tokio::test]
    async fn test_rewrite_leaves_unlisted_fields_alone() {
        let resolver = StaticResolver("http://h/x".to_string());
        let mut payload = json!({
            "PlaySessionId": "abc",
            "MediaSources": [{
                "Id": "m1",
                "Container": "mkv",
                "Path": "/movie.mkv"
            }]
        });

        rewrite_media_sources(&resolver, &test_route(), &mut payload)
            .await
            .unwrap();

        assert_eq!(payload["PlaySessionId"], "abc");
        let source = &payload["MediaSources"][0];
        assert_eq!(source["Id"], "m1");
        assert_eq!(source["Container"], "mkv");
        assert_eq!(source["Path"], "http://h/x");
        // No DirectStreamUrl was present, so none may appear
        assert!(source.get("DirectStreamUrl").is_none());
        assert_eq!(source["SupportsTranscoding"], false);
    }

    #[tokio::test]
    async fn test_rewrite_without_media_sources_is_a_no_op() {
        let resolver = StaticResolver("http://h/x".to_string());
        let mut payload = json!({ "ErrorCode": "NotAllowed" });
        let before = payload.clone();

        rewrite_media_sources(&resolver, &test_route(), &mut payload)
            .await
            .unwrap();

        assert_eq!(payload, before);
    }

    #[tokio::test]
    async fn test_rewrite_forces_flags_on_pathless_entries() {
        let resolver = StaticResolver("http://h/x".to_string());
        let mut payload = json!({ "MediaSources": [{ "Id": "m1" }] });

        rewrite_media_sources(&resolver, &test_route(), &mut payload)
            .await
            .unwrap();

        let source = &payload["MediaSources"][0];
        assert_eq!(source["Protocol"], "Http");
        assert_eq!(source["IsRemote"], true);
        assert_eq!(source["SupportsDirectPlay"], true);
        assert!(source.get("Path").is_none());
    }
}
