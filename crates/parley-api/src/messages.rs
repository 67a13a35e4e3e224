use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use parley_types::models::{Identity, Message};

use crate::auth::{AppState, blocking};

/// Upper bound on one history page.
pub const MAX_HISTORY_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Pass the `created_at` of the oldest message from the previous page
    /// to fetch older messages.
    pub before: Option<i64>,
}

fn default_limit() -> u32 {
    200
}

/// Conversation between the caller and `peer_id`, oldest first.
pub async fn get_history(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    // Run blocking DB query off the async runtime
    let db = state.db.clone();
    let caller = identity.id.to_string();
    let peer = peer_id.to_string();
    let limit = query.limit.clamp(1, MAX_HISTORY_LIMIT);
    let before = query.before;

    let rows = blocking(move || {
        db.get_conversation(&caller, &peer, limit, before).map_err(|e| {
            error!("Failed to load history for {}: {:#}", caller, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
    })
    .await?;

    let messages = rows
        .into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            Message::try_from(row)
                .map_err(|e| warn!("Skipping corrupt message '{}': {}", id, e))
                .ok()
        })
        .inspect(|msg: &Message| debug_assert!(msg.involves(identity.id) && msg.involves(peer_id)))
        .collect();

    Ok(Json(messages))
}
