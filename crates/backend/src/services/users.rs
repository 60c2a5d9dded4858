//! Administrative user management.

use chrono::{Duration, Utc};
use diesel_async::{scoped_futures::ScopedFutureExt, AsyncConnection, AsyncPgConnection};
use shared_types::{
    AdminUserResponse, BanUserRequest, CreateUserRequest, Role, SearchField, SessionResponse,
    SortDirection, UpdateUserRequest, UserListQuery, UserListResponse,
};
use uuid::Uuid;

use crate::auth::password::hash_password;
use crate::auth::session::{issue_session, ClientInfo, IssuedSession};
use crate::auth::types::{AuthConfig, AuthUser};
use crate::db::{accounts, sessions, teams, users};
use crate::error::{ApiError, ApiResult};
use crate::models::{TeamRow, UserRow, UserSortField};

use super::apply_points_delta;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;
pub const IMPERSONATION_MINUTES: i64 = 60;

/// Normalized list parameters
#[derive(Debug, Clone, PartialEq)]
pub struct UserListParams {
    pub limit: i64,
    pub offset: i64,
    pub search: Option<(SearchField, String)>,
    pub sort_field: UserSortField,
    pub direction: SortDirection,
}

impl UserListParams {
    pub fn from_query(query: &UserListQuery) -> Self {
        let search = query
            .search_value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| (query.search_field.unwrap_or(SearchField::Email), v.to_string()));

        Self {
            limit: query
                .limit
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
            offset: query.offset.unwrap_or(0).max(0),
            search,
            sort_field: UserSortField::parse(query.sort_by.as_deref()),
            direction: query.sort_direction.unwrap_or(SortDirection::Desc),
        }
    }
}

/// Resolve a ban duration in seconds into an absolute expiry.
pub fn ban_expiry(
    expires_in: Option<i64>,
    now: chrono::DateTime<Utc>,
) -> ApiResult<Option<chrono::DateTime<Utc>>> {
    match expires_in {
        None => Ok(None),
        Some(seconds) if seconds <= 0 => Err(ApiError::bad_request(
            "Ban duration must be a positive number of seconds",
        )),
        Some(seconds) => Duration::try_seconds(seconds)
            .and_then(|d| now.checked_add_signed(d))
            .map(Some)
            .ok_or_else(|| ApiError::bad_request("Ban duration is too long")),
    }
}

fn ensure_not_self(actor: &AuthUser, target_id: Uuid, message: &str) -> ApiResult<()> {
    if actor.id == target_id {
        return Err(ApiError::bad_request(message));
    }
    Ok(())
}

fn ensure_leads_no_team(team: Option<&TeamRow>) -> ApiResult<()> {
    match team {
        Some(team) => Err(ApiError::conflict(format!(
            "User leads team '{}'. Delete the team first.",
            team.name
        ))),
        None => Ok(()),
    }
}

async fn with_team_name(
    conn: &mut AsyncPgConnection,
    user: UserRow,
) -> ApiResult<AdminUserResponse> {
    let team_name = match user.team_id {
        Some(team_id) => teams::find_by_id(conn, team_id).await?.map(|t| t.name),
        None => None,
    };
    Ok(user.into_admin_response(team_name))
}

async fn existing_user(conn: &mut AsyncPgConnection, user_id: Uuid) -> ApiResult<UserRow> {
    users::find_by_id(conn, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// Service for admin user-management logic
pub struct UserAdminService;

impl UserAdminService {
    pub async fn list(
        conn: &mut AsyncPgConnection,
        params: &UserListParams,
    ) -> ApiResult<UserListResponse> {
        let (rows, total) = users::search(
            conn,
            params
                .search
                .as_ref()
                .map(|(field, value)| (*field, value.as_str())),
            params.sort_field,
            params.direction,
            params.limit,
            params.offset,
        )
        .await?;

        Ok(UserListResponse {
            users: rows
                .into_iter()
                .map(|(user, team_name)| user.into_admin_response(team_name))
                .collect(),
            total,
        })
    }

    /// Create a verified user with a password login.
    pub async fn create(
        conn: &mut AsyncPgConnection,
        request: CreateUserRequest,
    ) -> ApiResult<AdminUserResponse> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(ApiError::bad_request("Name is required"));
        }
        let email = request.email.trim().to_lowercase();
        let password_hash = hash_password(&request.password)?;
        let role = request.role;

        let (name, email, password_hash) = (&name, &email, &password_hash);
        let user = conn
            .transaction::<_, ApiError, _>(|conn| {
                async move {
                    if users::find_by_email(conn, email).await?.is_some() {
                        return Err(ApiError::conflict("A user with this email already exists"));
                    }
                    let user = users::create(
                        conn,
                        users::NewUser {
                            name,
                            email,
                            email_verified: true,
                            image: None,
                            role,
                        },
                    )
                    .await?;
                    accounts::create_credential(conn, user.id, password_hash).await?;
                    Ok(user)
                }
                .scope_boxed()
            })
            .await?;

        tracing::info!("Admin created user {} ({})", user.email, role.as_str());
        Ok(user.into_admin_response(None))
    }

    pub async fn update(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
        request: UpdateUserRequest,
    ) -> ApiResult<AdminUserResponse> {
        let name = request.name.as_deref().map(str::trim);
        if name.is_some_and(str::is_empty) {
            return Err(ApiError::bad_request("Name cannot be empty"));
        }
        let email = request.email.as_deref().map(|e| e.trim().to_lowercase());
        if let Some(points) = request.points {
            if points < 0 {
                return Err(ApiError::bad_request("Points cannot go below zero"));
            }
        }

        existing_user(conn, user_id).await?;
        let user = users::update(
            conn,
            user_id,
            users::UserChanges {
                name,
                email: email.as_deref(),
                points: request.points,
                updated_at: Utc::now(),
            },
        )
        .await?;

        with_team_name(conn, user).await
    }

    pub async fn set_role(
        conn: &mut AsyncPgConnection,
        actor: &AuthUser,
        user_id: Uuid,
        role: Role,
    ) -> ApiResult<AdminUserResponse> {
        if actor.id == user_id && role != Role::Admin {
            return Err(ApiError::bad_request("You cannot remove your own admin role"));
        }
        existing_user(conn, user_id).await?;

        let user = users::set_role(conn, user_id, role).await?;
        tracing::info!("{} set role of {} to {}", actor.email, user.email, role.as_str());
        with_team_name(conn, user).await
    }

    pub async fn adjust_points(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
        delta: i32,
    ) -> ApiResult<AdminUserResponse> {
        let user = conn
            .transaction::<_, ApiError, _>(|conn| {
                async move {
                    let user = users::lock_by_id(conn, user_id).await?;
                    let points = apply_points_delta(user.points, delta)?;
                    Ok(users::set_points(conn, user.id, points).await?)
                }
                .scope_boxed()
            })
            .await?;

        with_team_name(conn, user).await
    }

    /// Ban a user and revoke all of their sessions.
    pub async fn ban(
        conn: &mut AsyncPgConnection,
        actor: &AuthUser,
        user_id: Uuid,
        request: BanUserRequest,
    ) -> ApiResult<AdminUserResponse> {
        ensure_not_self(actor, user_id, "You cannot ban yourself")?;

        let now = Utc::now();
        let expires = ban_expiry(request.ban_expires_in, now)?;
        let reason = request
            .ban_reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());

        let user = conn
            .transaction::<_, ApiError, _>(|conn| {
                async move {
                    let user = users::lock_by_id(conn, user_id).await?;
                    let user = users::ban(conn, user.id, reason, expires, now).await?;
                    let revoked = sessions::delete_all_for_user(conn, user.id).await?;
                    tracing::info!("Banned {}, revoked {} sessions", user.email, revoked);
                    Ok(user)
                }
                .scope_boxed()
            })
            .await?;

        with_team_name(conn, user).await
    }

    pub async fn unban(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
    ) -> ApiResult<AdminUserResponse> {
        existing_user(conn, user_id).await?;
        let user = users::unban(conn, user_id).await?;
        tracing::info!("Unbanned {}", user.email);
        with_team_name(conn, user).await
    }

    /// Remove a user. Refused while they lead a team.
    pub async fn delete(
        conn: &mut AsyncPgConnection,
        actor: &AuthUser,
        user_id: Uuid,
    ) -> ApiResult<()> {
        ensure_not_self(actor, user_id, "You cannot delete your own account")?;

        conn.transaction::<_, ApiError, _>(|conn| {
            async move {
                // Creating a team locks the user row first, so holding it
                // keeps the lead check valid until the delete.
                let user = users::lock_by_id(conn, user_id).await?;
                ensure_leads_no_team(teams::find_by_lead(conn, user.id).await?.as_ref())?;
                users::delete(conn, user.id).await?;
                tracing::info!("Deleted user {}", user.email);
                Ok(())
            }
            .scope_boxed()
        })
        .await
    }

    pub async fn list_sessions(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
    ) -> ApiResult<Vec<SessionResponse>> {
        existing_user(conn, user_id).await?;
        Ok(sessions::list_for_user(conn, user_id, Utc::now()).await?)
    }

    pub async fn revoke_session(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
        session_id: Uuid,
    ) -> ApiResult<()> {
        let deleted = sessions::delete_for_user(conn, session_id, user_id).await?;
        if deleted == 0 {
            return Err(ApiError::not_found("Session not found"));
        }
        Ok(())
    }

    pub async fn revoke_all_sessions(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
    ) -> ApiResult<usize> {
        existing_user(conn, user_id).await?;
        Ok(sessions::delete_all_for_user(conn, user_id).await?)
    }

    /// Issue a short session that acts as the target user.
    pub async fn impersonate(
        conn: &mut AsyncPgConnection,
        config: &AuthConfig,
        actor: &AuthUser,
        user_id: Uuid,
        client: &ClientInfo,
    ) -> ApiResult<(IssuedSession, UserRow)> {
        ensure_not_self(actor, user_id, "You cannot impersonate yourself")?;

        let target = existing_user(conn, user_id).await?;
        if target.is_admin() {
            return Err(ApiError::forbidden("Cannot impersonate another admin"));
        }
        if target.is_banned_at(Utc::now()) {
            return Err(ApiError::bad_request("Cannot impersonate a banned user"));
        }

        let issued = issue_session(
            conn,
            config,
            target.id,
            client,
            Duration::minutes(IMPERSONATION_MINUTES),
            Some(actor.id),
        )
        .await?;

        tracing::info!(
            "{} is impersonating {} (session {})",
            actor.email,
            target.email,
            issued.session.id
        );
        Ok((issued, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures;
    use axum::http::StatusCode;

    fn query() -> UserListQuery {
        UserListQuery {
            limit: None,
            offset: None,
            search_value: None,
            search_field: None,
            sort_by: None,
            sort_direction: None,
        }
    }

    #[test]
    fn test_list_defaults() {
        let params = UserListParams::from_query(&query());
        assert_eq!(params.limit, DEFAULT_PAGE_SIZE);
        assert_eq!(params.offset, 0);
        assert!(params.search.is_none());
        assert_eq!(params.sort_field, UserSortField::CreatedAt);
        assert_eq!(params.direction, SortDirection::Desc);
    }

    #[test]
    fn test_limit_is_capped_and_offset_floored() {
        let mut q = query();
        q.limit = Some(5000);
        q.offset = Some(-3);
        let params = UserListParams::from_query(&q);
        assert_eq!(params.limit, MAX_PAGE_SIZE);
        assert_eq!(params.offset, 0);

        q.limit = Some(0);
        assert_eq!(UserListParams::from_query(&q).limit, 1);
    }

    #[test]
    fn test_search_defaults_to_email_and_ignores_blank() {
        let mut q = query();
        q.search_value = Some("  ada ".to_string());
        assert_eq!(
            UserListParams::from_query(&q).search,
            Some((SearchField::Email, "ada".to_string()))
        );

        q.search_field = Some(SearchField::Name);
        assert_eq!(
            UserListParams::from_query(&q).search,
            Some((SearchField::Name, "ada".to_string()))
        );

        q.search_value = Some("   ".to_string());
        assert!(UserListParams::from_query(&q).search.is_none());
    }

    #[test]
    fn test_unknown_sort_falls_back() {
        let mut q = query();
        q.sort_by = Some("password".to_string());
        q.sort_direction = Some(SortDirection::Asc);
        let params = UserListParams::from_query(&q);
        assert_eq!(params.sort_field, UserSortField::CreatedAt);
        assert_eq!(params.direction, SortDirection::Asc);
    }

    #[test]
    fn test_ban_expiry() {
        let now = Utc::now();
        assert_eq!(ban_expiry(None, now).unwrap(), None);
        assert_eq!(
            ban_expiry(Some(3600), now).unwrap(),
            Some(now + Duration::hours(1))
        );
        assert_eq!(
            ban_expiry(Some(0), now).unwrap_err().status(),
            StatusCode::BAD_REQUEST
        );
        assert!(ban_expiry(Some(i64::MAX), now).is_err());
    }

    #[test]
    fn test_team_lead_cannot_be_deleted() {
        let user = fixtures::user("user");
        let team = fixtures::team(user.id, false);
        let err = ensure_leads_no_team(Some(&team)).unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert!(err.to_string().contains("Compilers"));
        assert!(ensure_leads_no_team(None).is_ok());
    }

    #[test]
    fn test_admin_cannot_target_self() {
        let actor = AuthUser {
            id: Uuid::new_v4(),
            email: "admin@example.com".to_string(),
            role: Role::Admin,
            session_id: Uuid::new_v4(),
            session_token: "tok".to_string(),
            impersonated_by: None,
        };
        assert!(ensure_not_self(&actor, actor.id, "no").is_err());
        assert!(ensure_not_self(&actor, Uuid::new_v4(), "no").is_ok());
    }
}
