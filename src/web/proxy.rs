//! The proxied Emby playback path
//!
//! Accepts the PlaybackInfo request exactly as an Emby client sends it
//! (JSON or plain text body) and returns the rewritten payload. Any
//! failure along the proxy path collapses to a generic internal error
//! carrying the message; a partially rewritten payload is never sent.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde_json::{json, Value};
use tracing::{error, info};

use super::AppState;

pub async fn playback_info(
    Path(item_id): Path<String>,
    Query(query_params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    info!("Received PlaybackInfo request for item {}", item_id);

    let body = if body.is_empty() {
        None
    } else {
        // Non-JSON bodies are wrapped rather than rejected; some clients
        // send plain text
        Some(
            serde_json::from_str::<Value>(&body)
                .unwrap_or_else(|_| json!({ "content": body })),
        )
    };

    match state
        .playback_service
        .process_playback_info(&item_id, &query_params, &headers, body)
        .await
    {
        Ok(payload) => Ok(Json(payload)),
        Err(e) => {
            error!("PlaybackInfo request for item {} failed: {}", item_id, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            ))
        }
    }
}
