use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::warn;

use parley_types::api::UserSummary;
use parley_types::models::Identity;

use crate::auth::{AppState, blocking};

const SEARCH_LIMIT: u32 = 20;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// Username prefix search. Never returns the caller.
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<UserSummary>>, StatusCode> {
    let prefix = query.q.trim();
    if prefix.is_empty() {
        return Ok(Json(vec![]));
    }

    let db = state.db.clone();
    let prefix = prefix.to_string();
    let caller = identity.id.to_string();
    let rows = blocking(move || {
        db.search_users(&prefix, &caller, SEARCH_LIMIT)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await?;

    let users = rows
        .iter()
        .filter_map(|row| {
            row.to_summary()
                .map_err(|e| warn!("Corrupt user id '{}': {}", row.id, e))
                .ok()
        })
        .collect();

    Ok(Json(users))
}
