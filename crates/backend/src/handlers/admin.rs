use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use shared_types::{
    AdjustPointsRequest, AdminUserResponse, BanUserRequest, CreateUserRequest, MessageResponse,
    SessionResponse, SetRoleRequest, SignInResponse, UpdateUserRequest, UserListQuery,
    UserListResponse,
};
use uuid::Uuid;
use validator::Validate;

use crate::auth::session::ClientInfo;
use crate::auth::types::AuthUser;
use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath, ApiQuery, OptionalJson};
use crate::services::users::{UserAdminService, UserListParams};
use crate::AppState;

pub async fn list_users(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<UserListQuery>,
) -> ApiResult<Json<UserListResponse>> {
    let params = UserListParams::from_query(&query);
    let mut conn = state.pool.get().await?;
    let response = UserAdminService::list(&mut conn, &params).await?;
    Ok(Json(response))
}

pub async fn create_user(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<AdminUserResponse>)> {
    body.validate()?;
    let mut conn = state.pool.get().await?;
    let user = UserAdminService::create(&mut conn, body).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn update_user(
    State(state): State<AppState>,
    ApiPath(user_id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<UpdateUserRequest>,
) -> ApiResult<Json<AdminUserResponse>> {
    body.validate()?;
    let mut conn = state.pool.get().await?;
    let user = UserAdminService::update(&mut conn, user_id, body).await?;
    Ok(Json(user))
}

pub async fn set_role(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiPath(user_id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<SetRoleRequest>,
) -> ApiResult<Json<AdminUserResponse>> {
    let mut conn = state.pool.get().await?;
    let user = UserAdminService::set_role(&mut conn, &auth, user_id, body.role).await?;
    Ok(Json(user))
}

pub async fn adjust_points(
    State(state): State<AppState>,
    ApiPath(user_id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<AdjustPointsRequest>,
) -> ApiResult<Json<AdminUserResponse>> {
    let mut conn = state.pool.get().await?;
    let user = UserAdminService::adjust_points(&mut conn, user_id, body.delta).await?;
    Ok(Json(user))
}

pub async fn ban_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiPath(user_id): ApiPath<Uuid>,
    OptionalJson(body): OptionalJson<BanUserRequest>,
) -> ApiResult<Json<AdminUserResponse>> {
    let body = body.unwrap_or_default();
    let mut conn = state.pool.get().await?;
    let user = UserAdminService::ban(&mut conn, &auth, user_id, body).await?;
    Ok(Json(user))
}

pub async fn unban_user(
    State(state): State<AppState>,
    ApiPath(user_id): ApiPath<Uuid>,
) -> ApiResult<Json<AdminUserResponse>> {
    let mut conn = state.pool.get().await?;
    let user = UserAdminService::unban(&mut conn, user_id).await?;
    Ok(Json(user))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiPath(user_id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    let mut conn = state.pool.get().await?;
    UserAdminService::delete(&mut conn, &auth, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Session management
pub async fn list_user_sessions(
    State(state): State<AppState>,
    ApiPath(user_id): ApiPath<Uuid>,
) -> ApiResult<Json<Vec<SessionResponse>>> {
    let mut conn = state.pool.get().await?;
    let sessions = UserAdminService::list_sessions(&mut conn, user_id).await?;
    Ok(Json(sessions))
}

pub async fn revoke_user_session(
    State(state): State<AppState>,
    ApiPath((user_id, session_id)): ApiPath<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    let mut conn = state.pool.get().await?;
    UserAdminService::revoke_session(&mut conn, user_id, session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn revoke_user_sessions(
    State(state): State<AppState>,
    ApiPath(user_id): ApiPath<Uuid>,
) -> ApiResult<Json<MessageResponse>> {
    let mut conn = state.pool.get().await?;
    let revoked = UserAdminService::revoke_all_sessions(&mut conn, user_id).await?;
    Ok(Json(MessageResponse::new(format!(
        "Revoked {} sessions",
        revoked
    ))))
}

/// Sign in as another user. The response carries the impersonation cookie.
pub async fn impersonate_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiPath(user_id): ApiPath<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let mut conn = state.pool.get().await?;
    let (issued, target) = UserAdminService::impersonate(
        &mut conn,
        &state.config.auth,
        &auth,
        user_id,
        &ClientInfo::from_headers(&headers),
    )
    .await?;

    Ok((
        [(header::SET_COOKIE, issued.cookie)],
        Json(SignInResponse {
            token: issued.jwt,
            user: target.into(),
        }),
    )
        .into_response())
}
