//! Team membership workflow.
//!
//! Every mutation runs in one transaction. Rows are locked team first, then
//! user, so concurrent requests on the same team or user serialize instead
//! of deadlocking.

use std::collections::HashMap;

use chrono::Utc;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::{scoped_futures::ScopedFutureExt, AsyncConnection, AsyncPgConnection};
use shared_types::{TeamMember, TeamResponse, VerifyTeamResponse};
use uuid::Uuid;

use crate::db::{teams, users};
use crate::error::{ApiError, ApiResult};
use crate::models::{TeamRow, UserRow};

use super::apply_points_delta;

pub const TEAM_NAME_MIN: usize = 3;
pub const TEAM_NAME_MAX: usize = 50;
const JOIN_CODE_ATTEMPTS: usize = 5;

/// Trim and length-check a requested team name.
pub fn normalize_team_name(raw: &str) -> ApiResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Team name is required"));
    }
    let len = name.chars().count();
    if !(TEAM_NAME_MIN..=TEAM_NAME_MAX).contains(&len) {
        return Err(ApiError::bad_request(format!(
            "Team name must be between {} and {} characters",
            TEAM_NAME_MIN, TEAM_NAME_MAX
        )));
    }
    Ok(name.to_string())
}

/// Join codes are matched trimmed and upper-cased.
pub fn normalize_join_code(raw: &str) -> ApiResult<String> {
    let code = raw.trim().to_uppercase();
    if code.is_empty() {
        return Err(ApiError::bad_request("Join code is required"));
    }
    Ok(code)
}

/// Eight uppercase hex characters.
pub fn generate_join_code() -> String {
    format!("{:08X}", rand::random::<u32>())
}

pub fn ensure_not_in_team(user: &UserRow) -> ApiResult<()> {
    if user.team_id.is_some() {
        return Err(ApiError::bad_request("You are already in a team"));
    }
    Ok(())
}

pub fn ensure_can_join(team: &TeamRow) -> ApiResult<()> {
    if team.is_verified {
        return Err(ApiError::forbidden("Cannot join a verified team"));
    }
    Ok(())
}

/// Membership is checked before the code lookup, so a member who sends a
/// bad code still hears that they are already in a team.
pub fn decide_join(user: &UserRow, team: Option<TeamRow>) -> ApiResult<TeamRow> {
    ensure_not_in_team(user)?;
    let team = team.ok_or_else(|| ApiError::not_found("Invalid join code"))?;
    ensure_can_join(&team)?;
    Ok(team)
}

pub fn ensure_can_leave(user: &UserRow, team: &TeamRow) -> ApiResult<()> {
    if team.teamlead_id == user.id {
        return Err(ApiError::bad_request(
            "Team leaders cannot leave their team. Delete the team instead.",
        ));
    }
    if team.is_verified {
        return Err(ApiError::forbidden("Cannot leave a verified team"));
    }
    Ok(())
}

pub fn ensure_can_delete(team: &TeamRow) -> ApiResult<()> {
    if team.is_verified {
        return Err(ApiError::forbidden("Cannot delete a verified team"));
    }
    Ok(())
}

/// Assemble the API view of a team. The join code is only included when
/// `show_join_code` is set.
pub fn build_team_response(
    team: TeamRow,
    members: Vec<UserRow>,
    teamlead_name: String,
    viewer_id: Option<Uuid>,
    show_join_code: bool,
) -> TeamResponse {
    TeamResponse {
        is_team_lead: viewer_id == Some(team.teamlead_id),
        join_code: show_join_code.then_some(team.join_code),
        members: members.into_iter().map(TeamMember::from).collect(),
        id: team.id,
        name: team.name,
        teamlead_id: team.teamlead_id,
        teamlead_name,
        points: team.points,
        logo_url: team.logo_url,
        is_verified: team.is_verified,
        created_at: team.created_at,
    }
}

fn lead_name(members: &[UserRow], lead_id: Uuid) -> Option<String> {
    members
        .iter()
        .find(|m| m.id == lead_id)
        .map(|m| m.name.clone())
}

fn map_create_conflict(err: DieselError) -> ApiError {
    match &err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            match info.constraint_name() {
                Some("teams_teamlead_id_key") => ApiError::bad_request("You are already in a team"),
                Some("teams_join_code_key") => {
                    ApiError::Internal(anyhow::anyhow!("Join code collision on insert"))
                }
                _ => ApiError::bad_request("Team name already exists"),
            }
        }
        _ => ApiError::Database(err),
    }
}

/// Service for team-related business logic
pub struct TeamService;

impl TeamService {
    /// Create a team led by the caller, who becomes its only member.
    /// `name` must come from `normalize_team_name`.
    pub async fn create(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
        name: &str,
    ) -> ApiResult<TeamRow> {
        conn.transaction::<_, ApiError, _>(|conn| {
            async move {
                let user = users::lock_by_id(conn, user_id).await?;
                ensure_not_in_team(&user)?;

                if teams::name_taken(conn, name).await? {
                    return Err(ApiError::bad_request("Team name already exists"));
                }

                let code = Self::unused_join_code(conn).await?;
                let team = teams::create(conn, name, user.id, &code)
                    .await
                    .map_err(map_create_conflict)?;
                users::assign_team(conn, user.id, team.id, Utc::now()).await?;

                tracing::info!("{} created team '{}'", user.email, team.name);
                Ok(team)
            }
            .scope_boxed()
        })
        .await
    }

    async fn unused_join_code(conn: &mut AsyncPgConnection) -> ApiResult<String> {
        for _ in 0..JOIN_CODE_ATTEMPTS {
            let code = generate_join_code();
            if !teams::join_code_taken(conn, &code).await? {
                return Ok(code);
            }
        }
        Err(ApiError::Internal(anyhow::anyhow!(
            "Could not generate an unused join code after {} attempts",
            JOIN_CODE_ATTEMPTS
        )))
    }

    /// `code` must come from `normalize_join_code`.
    pub async fn join(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
        code: &str,
    ) -> ApiResult<TeamRow> {
        conn.transaction::<_, ApiError, _>(|conn| {
            async move {
                let team = teams::lock_by_join_code(conn, code).await?;
                let user = users::lock_by_id(conn, user_id).await?;

                let team = decide_join(&user, team)?;

                users::assign_team(conn, user.id, team.id, Utc::now()).await?;
                teams::touch(conn, team.id).await?;

                tracing::info!("{} joined team '{}'", user.email, team.name);
                Ok(team)
            }
            .scope_boxed()
        })
        .await
    }

    pub async fn leave(conn: &mut AsyncPgConnection, user_id: Uuid) -> ApiResult<TeamRow> {
        conn.transaction::<_, ApiError, _>(|conn| {
            async move {
                let not_in_team = || ApiError::not_found("You are not in a team");

                let current = users::find_by_id(conn, user_id)
                    .await?
                    .and_then(|u| u.team_id)
                    .ok_or_else(not_in_team)?;
                let team = teams::lock_by_id(conn, current)
                    .await?
                    .ok_or_else(not_in_team)?;
                let user = users::lock_by_id(conn, user_id).await?;
                if user.team_id != Some(team.id) {
                    return Err(not_in_team());
                }

                ensure_can_leave(&user, &team)?;

                users::clear_team(conn, user.id).await?;
                teams::touch(conn, team.id).await?;

                tracing::info!("{} left team '{}'", user.email, team.name);
                Ok(team)
            }
            .scope_boxed()
        })
        .await
    }

    /// Delete the team the caller leads; every member is released.
    pub async fn delete(conn: &mut AsyncPgConnection, user_id: Uuid) -> ApiResult<TeamRow> {
        conn.transaction::<_, ApiError, _>(|conn| {
            async move {
                let team = teams::lock_by_lead(conn, user_id)
                    .await?
                    .ok_or_else(|| ApiError::not_found("You are not a team leader"))?;

                ensure_can_delete(&team)?;

                let released = users::clear_team_for_all(conn, team.id).await?;
                teams::delete(conn, team.id).await?;

                tracing::info!("Team '{}' deleted, {} members released", team.name, released);
                Ok(team)
            }
            .scope_boxed()
        })
        .await
    }

    /// The caller's team, or `None` when they are not in one.
    pub async fn for_member(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
    ) -> ApiResult<Option<TeamResponse>> {
        let Some(team_id) = users::find_by_id(conn, user_id)
            .await?
            .and_then(|u| u.team_id)
        else {
            return Ok(None);
        };
        let Some(team) = teams::find_by_id(conn, team_id).await? else {
            return Ok(None);
        };

        let members = users::list_members(conn, &[team.id]).await?;
        let teamlead_name = match lead_name(&members, team.teamlead_id) {
            Some(name) => name,
            None => users::find_by_id(conn, team.teamlead_id)
                .await?
                .map(|u| u.name)
                .unwrap_or_else(|| "Unknown".to_string()),
        };
        let is_lead = team.teamlead_id == user_id;

        Ok(Some(build_team_response(
            team,
            members,
            teamlead_name,
            Some(user_id),
            is_lead,
        )))
    }

    /// All teams, newest first, with members and join codes.
    pub async fn list_all(
        conn: &mut AsyncPgConnection,
        viewer_id: Uuid,
    ) -> ApiResult<Vec<TeamResponse>> {
        let all_teams = teams::list_all(conn).await?;
        let team_ids: Vec<Uuid> = all_teams.iter().map(|t| t.id).collect();

        let mut members_by_team: HashMap<Uuid, Vec<UserRow>> = HashMap::new();
        for member in users::list_members(conn, &team_ids).await? {
            if let Some(team_id) = member.team_id {
                members_by_team.entry(team_id).or_default().push(member);
            }
        }

        let lead_ids: Vec<Uuid> = all_teams.iter().map(|t| t.teamlead_id).collect();
        let lead_names: HashMap<Uuid, String> = users::list_by_ids(conn, &lead_ids)
            .await?
            .into_iter()
            .map(|u| (u.id, u.name))
            .collect();

        Ok(all_teams
            .into_iter()
            .map(|team| {
                let members = members_by_team.remove(&team.id).unwrap_or_default();
                let teamlead_name = lead_names
                    .get(&team.teamlead_id)
                    .cloned()
                    .unwrap_or_else(|| "Unknown".to_string());
                build_team_response(team, members, teamlead_name, Some(viewer_id), true)
            })
            .collect())
    }

    pub async fn set_verification(
        conn: &mut AsyncPgConnection,
        team_id: Uuid,
        is_verified: bool,
    ) -> ApiResult<VerifyTeamResponse> {
        let updated = teams::set_verified(conn, team_id, is_verified).await?;
        if updated == 0 {
            return Err(ApiError::not_found("Team not found"));
        }

        let message = if is_verified {
            "Team verified successfully"
        } else {
            "Team unverified successfully"
        };
        tracing::info!("Team {}: {}", team_id, message);

        Ok(VerifyTeamResponse {
            success: true,
            message: message.to_string(),
        })
    }

    pub async fn adjust_points(
        conn: &mut AsyncPgConnection,
        team_id: Uuid,
        delta: i32,
    ) -> ApiResult<TeamRow> {
        conn.transaction::<_, ApiError, _>(|conn| {
            async move {
                let team = teams::lock_by_id(conn, team_id)
                    .await?
                    .ok_or_else(|| ApiError::not_found("Team not found"))?;
                let points = apply_points_delta(team.points, delta)?;
                Ok(teams::set_points(conn, team.id, points).await?)
            }
            .scope_boxed()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures;
    use axum::http::StatusCode;

    #[test]
    fn test_team_name_is_trimmed() {
        assert_eq!(normalize_team_name("  Rustaceans  ").unwrap(), "Rustaceans");
    }

    #[test]
    fn test_team_name_length_bounds() {
        assert_eq!(
            normalize_team_name("   ").unwrap_err().status(),
            StatusCode::BAD_REQUEST
        );
        assert!(normalize_team_name("ab").is_err());
        assert!(normalize_team_name("abc").is_ok());
        assert!(normalize_team_name(&"x".repeat(50)).is_ok());
        assert!(normalize_team_name(&"x".repeat(51)).is_err());
    }

    #[test]
    fn test_team_name_length_counts_characters() {
        assert!(normalize_team_name("äöü").is_ok());
    }

    #[test]
    fn test_join_code_normalized() {
        assert_eq!(normalize_join_code(" a1b2c3d4 ").unwrap(), "A1B2C3D4");
        assert_eq!(
            normalize_join_code("  ").unwrap_err().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_generated_join_code_shape() {
        for _ in 0..32 {
            let code = generate_join_code();
            assert_eq!(code.len(), 8);
            assert!(code
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
        }
    }

    #[test]
    fn test_member_cannot_create_or_join_again() {
        let mut user = fixtures::user("user");
        assert!(ensure_not_in_team(&user).is_ok());

        user.team_id = Some(Uuid::new_v4());
        assert_eq!(
            ensure_not_in_team(&user).unwrap_err().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_verified_team_cannot_be_joined() {
        let lead = Uuid::new_v4();
        assert!(ensure_can_join(&fixtures::team(lead, false)).is_ok());
        assert_eq!(
            ensure_can_join(&fixtures::team(lead, true)).unwrap_err().status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_join_decision_order() {
        let user = fixtures::user("user");
        let open_team = fixtures::team(Uuid::new_v4(), false);
        let verified_team = fixtures::team(Uuid::new_v4(), true);

        assert_eq!(
            decide_join(&user, None).unwrap_err().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            decide_join(&user, Some(verified_team.clone()))
                .unwrap_err()
                .status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            decide_join(&user, Some(open_team.clone())).unwrap().id,
            open_team.id
        );

        let mut member = fixtures::user("user");
        member.team_id = Some(Uuid::new_v4());
        let err = decide_join(&member, None).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Invalid request: You are already in a team");
        assert_eq!(
            decide_join(&member, Some(verified_team)).unwrap_err().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_lead_cannot_leave() {
        let lead = fixtures::user("user");
        let team = fixtures::team(lead.id, false);
        assert_eq!(
            ensure_can_leave(&lead, &team).unwrap_err().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_verified_team_cannot_be_left() {
        let member = fixtures::user("user");
        let team = fixtures::team(Uuid::new_v4(), true);
        assert_eq!(
            ensure_can_leave(&member, &team).unwrap_err().status(),
            StatusCode::FORBIDDEN
        );

        let open_team = fixtures::team(Uuid::new_v4(), false);
        assert!(ensure_can_leave(&member, &open_team).is_ok());
    }

    #[test]
    fn test_verified_team_cannot_be_deleted() {
        let team = fixtures::team(Uuid::new_v4(), true);
        assert_eq!(
            ensure_can_delete(&team).unwrap_err().status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_join_code_only_shown_to_lead() {
        let lead = fixtures::user("user");
        let member = fixtures::user("user");
        let team = fixtures::team(lead.id, false);

        let as_lead = build_team_response(
            team.clone(),
            vec![lead.clone(), member.clone()],
            lead.name.clone(),
            Some(lead.id),
            true,
        );
        assert!(as_lead.is_team_lead);
        assert_eq!(as_lead.join_code.as_deref(), Some("A1B2C3D4"));
        assert_eq!(as_lead.members.len(), 2);

        let as_member =
            build_team_response(team, vec![lead.clone()], lead.name, Some(member.id), false);
        assert!(!as_member.is_team_lead);
        assert!(as_member.join_code.is_none());
    }

    #[test]
    fn test_lead_name_from_members() {
        let lead = fixtures::user("user");
        assert_eq!(
            lead_name(std::slice::from_ref(&lead), lead.id).as_deref(),
            Some("Grace Hopper")
        );
        assert!(lead_name(&[], lead.id).is_none());
    }
}
