// Database models for Diesel
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared_types::{AdminUserResponse, AuthUserResponse, Role, TeamMember};
use uuid::Uuid;

/// Database representation of users
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub email_verified: bool,
    pub image: Option<String>,
    pub role: String, // "user" | "admin"
    pub points: i32,
    pub banned: bool,
    pub ban_reason: Option<String>,
    pub ban_expires: Option<DateTime<Utc>>,
    pub banned_at: Option<DateTime<Utc>>,
    pub team_id: Option<Uuid>,
    pub team_joined_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    pub fn role(&self) -> Role {
        Role::from_str(&self.role).unwrap_or_default()
    }

    pub fn is_admin(&self) -> bool {
        self.role() == Role::Admin
    }

    /// A ban counts only until its expiry; permanent bans have none.
    pub fn is_banned_at(&self, now: DateTime<Utc>) -> bool {
        self.banned && self.ban_expires.map_or(true, |expires| expires > now)
    }

    /// Banned flag is still set but the expiry has passed.
    pub fn has_lapsed_ban(&self, now: DateTime<Utc>) -> bool {
        self.banned && !self.is_banned_at(now)
    }

    pub fn into_admin_response(self, team_name: Option<String>) -> AdminUserResponse {
        AdminUserResponse {
            role: self.role(),
            id: self.id,
            name: self.name,
            email: self.email,
            email_verified: self.email_verified,
            created_at: self.created_at,
            points: self.points,
            banned: self.banned,
            ban_reason: self.ban_reason,
            ban_expires: self.ban_expires,
            banned_at: self.banned_at,
            team_id: self.team_id,
            team_name,
        }
    }
}

impl From<UserRow> for AuthUserResponse {
    fn from(row: UserRow) -> Self {
        AuthUserResponse {
            role: row.role(),
            id: row.id,
            name: row.name,
            email: row.email,
            email_verified: row.email_verified,
            image: row.image,
            points: row.points,
            team_id: row.team_id,
        }
    }
}

impl From<UserRow> for TeamMember {
    fn from(row: UserRow) -> Self {
        TeamMember {
            id: row.id,
            name: row.name,
            email: row.email,
        }
    }
}

/// Database representation of teams
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::teams)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TeamRow {
    pub id: Uuid,
    pub name: String,
    pub teamlead_id: Uuid,
    pub join_code: String,
    pub points: i32,
    pub logo_url: Option<String>,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database representation of login accounts (credential or OAuth)
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::accounts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AccountRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider_id: String, // "credential", "google", "github"
    pub account_id: String,
    pub password_hash: Option<String>,
    pub access_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database representation of sessions
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::sessions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SessionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub impersonated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SessionRow> for shared_types::SessionResponse {
    fn from(row: SessionRow) -> Self {
        shared_types::SessionResponse {
            id: row.id,
            user_id: row.user_id,
            expires_at: row.expires_at,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            impersonated_by: row.impersonated_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Database representation of single-use tokens
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::verification_tokens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct VerificationTokenRow {
    pub id: Uuid,
    pub purpose: String,
    pub token: String,
    pub user_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// What a verification token may be redeemed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    EmailVerification,
    PasswordReset,
    OAuthState,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &str {
        match self {
            TokenPurpose::EmailVerification => "email_verification",
            TokenPurpose::PasswordReset => "password_reset",
            TokenPurpose::OAuthState => "oauth_state",
        }
    }
}

/// Columns the admin user list may be sorted by. Anything else falls back to creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserSortField {
    #[default]
    CreatedAt,
    Name,
    Email,
    Points,
}

impl UserSortField {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("name") => UserSortField::Name,
            Some("email") => UserSortField::Email,
            Some("points") => UserSortField::Points,
            _ => UserSortField::CreatedAt,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn user(role: &str) -> UserRow {
        let now = Utc::now();
        UserRow {
            id: Uuid::new_v4(),
            name: "Grace Hopper".to_string(),
            email: "grace@example.com".to_string(),
            email_verified: true,
            image: None,
            role: role.to_string(),
            points: 10,
            banned: false,
            ban_reason: None,
            ban_expires: None,
            banned_at: None,
            team_id: None,
            team_joined_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn team(lead: Uuid, verified: bool) -> TeamRow {
        let now = Utc::now();
        TeamRow {
            id: Uuid::new_v4(),
            name: "Compilers".to_string(),
            teamlead_id: lead,
            join_code: "A1B2C3D4".to_string(),
            points: 0,
            logo_url: None,
            is_verified: verified,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_unknown_role_falls_back_to_user() {
        let user = fixtures::user("moderator");
        assert_eq!(user.role(), Role::User);
        assert!(!user.is_admin());
    }

    #[test]
    fn test_permanent_ban_is_active() {
        let mut user = fixtures::user("user");
        user.banned = true;
        assert!(user.is_banned_at(Utc::now()));
        assert!(!user.has_lapsed_ban(Utc::now()));
    }

    #[test]
    fn test_expired_ban_has_lapsed() {
        let now = Utc::now();
        let mut user = fixtures::user("user");
        user.banned = true;
        user.ban_expires = Some(now - Duration::minutes(1));
        assert!(!user.is_banned_at(now));
        assert!(user.has_lapsed_ban(now));
    }

    #[test]
    fn test_sort_field_whitelist() {
        assert_eq!(UserSortField::parse(Some("points")), UserSortField::Points);
        assert_eq!(UserSortField::parse(Some("createdAt")), UserSortField::CreatedAt);
        assert_eq!(UserSortField::parse(Some("password_hash")), UserSortField::CreatedAt);
        assert_eq!(UserSortField::parse(None), UserSortField::CreatedAt);
    }

    #[test]
    fn test_admin_response_carries_team_name() {
        let mut user = fixtures::user("admin");
        let team_id = Uuid::new_v4();
        user.team_id = Some(team_id);
        let response = user.into_admin_response(Some("Compilers".to_string()));
        assert_eq!(response.role, Role::Admin);
        assert_eq!(response.team_id, Some(team_id));
        assert_eq!(response.team_name.as_deref(), Some("Compilers"));
    }
}
