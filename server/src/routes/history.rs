//! Prediction history endpoint

use axum::{extract::State, Json};

use crate::error::ApiError;
use crate::history::{HistoryEntry, HISTORY_LIMIT};
use crate::state::SharedState;

/// GET /history - Newest predictions first
pub async fn get_history(
    State(state): State<SharedState>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let history = state.history.as_ref().ok_or(ApiError::HistoryDisabled)?;
    let entries = history.recent(HISTORY_LIMIT).await?;
    Ok(Json(entries))
}
