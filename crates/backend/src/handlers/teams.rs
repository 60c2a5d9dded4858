use axum::{
    extract::State,
    http::StatusCode,
    Extension, Json,
};
use shared_types::{
    AdjustPointsRequest, CreateTeamRequest, JoinTeamRequest, MyTeamResponse, TeamActionResponse,
    TeamListResponse, TeamPointsResponse, TeamSummary, VerifyTeamRequest, VerifyTeamResponse,
};
use uuid::Uuid;

use crate::auth::types::AuthUser;
use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath};
use crate::services::teams::{normalize_join_code, normalize_team_name, TeamService};
use crate::AppState;

// Team membership handlers
pub async fn create_team(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(body): ApiJson<CreateTeamRequest>,
) -> ApiResult<(StatusCode, Json<TeamActionResponse>)> {
    let name = normalize_team_name(&body.name)?;
    let mut conn = state.pool.get().await?;

    let team = TeamService::create(&mut conn, auth.id, &name).await?;

    Ok((
        StatusCode::CREATED,
        Json(TeamActionResponse {
            message: "Team created successfully".to_string(),
            team: Some(TeamSummary {
                id: team.id,
                name: team.name,
                join_code: Some(team.join_code),
            }),
        }),
    ))
}

pub async fn join_team(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(body): ApiJson<JoinTeamRequest>,
) -> ApiResult<Json<TeamActionResponse>> {
    let code = normalize_join_code(&body.join_code)?;
    let mut conn = state.pool.get().await?;

    let team = TeamService::join(&mut conn, auth.id, &code).await?;

    Ok(Json(TeamActionResponse {
        message: "Successfully joined team".to_string(),
        team: Some(TeamSummary {
            id: team.id,
            name: team.name,
            join_code: None,
        }),
    }))
}

pub async fn leave_team(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<TeamActionResponse>> {
    let mut conn = state.pool.get().await?;
    TeamService::leave(&mut conn, auth.id).await?;

    Ok(Json(TeamActionResponse {
        message: "Successfully left team".to_string(),
        team: None,
    }))
}

pub async fn delete_team(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<TeamActionResponse>> {
    let mut conn = state.pool.get().await?;
    TeamService::delete(&mut conn, auth.id).await?;

    Ok(Json(TeamActionResponse {
        message: "Team deleted successfully".to_string(),
        team: None,
    }))
}

pub async fn my_team(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<MyTeamResponse>> {
    let mut conn = state.pool.get().await?;
    let team = TeamService::for_member(&mut conn, auth.id).await?;
    Ok(Json(MyTeamResponse { team }))
}

// Admin team handlers
pub async fn list_teams(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<TeamListResponse>> {
    let mut conn = state.pool.get().await?;
    let teams = TeamService::list_all(&mut conn, auth.id).await?;
    Ok(Json(TeamListResponse { teams }))
}

pub async fn verify_team(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<VerifyTeamRequest>,
) -> ApiResult<Json<VerifyTeamResponse>> {
    let mut conn = state.pool.get().await?;
    let response = TeamService::set_verification(&mut conn, body.team_id, body.is_verified).await?;
    Ok(Json(response))
}

pub async fn adjust_team_points(
    State(state): State<AppState>,
    ApiPath(team_id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<AdjustPointsRequest>,
) -> ApiResult<Json<TeamPointsResponse>> {
    let mut conn = state.pool.get().await?;
    let team = TeamService::adjust_points(&mut conn, team_id, body.delta).await?;

    Ok(Json(TeamPointsResponse {
        id: team.id,
        name: team.name,
        points: team.points,
    }))
}
