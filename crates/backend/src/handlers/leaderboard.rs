use axum::{extract::State, Json};
use shared_types::LeaderboardEntry;

use crate::error::ApiResult;
use crate::services::leaderboard::LeaderboardService;
use crate::AppState;

pub async fn team_leaderboard(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<LeaderboardEntry>>> {
    let mut conn = state.pool.get().await?;
    let entries = LeaderboardService::teams(&mut conn).await?;
    Ok(Json(entries))
}

pub async fn user_leaderboard(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<LeaderboardEntry>>> {
    let mut conn = state.pool.get().await?;
    let entries = LeaderboardService::users(&mut conn).await?;
    Ok(Json(entries))
}
