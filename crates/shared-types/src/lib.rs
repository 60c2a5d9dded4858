use chrono::{DateTime, Utc};
use serde::{
    de::{DeserializeOwned, IntoDeserializer},
    Deserialize, Deserializer, Serialize,
};
use uuid::Uuid;
use validator::Validate;

/// Missing and `null` both read as an empty string, so the handler's own
/// "is required" check reports it.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Unrecognized values read as `None` so the caller falls back to its default.
fn unknown_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| {
        let de: serde::de::value::StrDeserializer<'_, serde::de::value::Error> =
            value.trim().into_deserializer();
        T::deserialize(de).ok()
    }))
}

// ============================================================================
// Users & Roles
// ============================================================================

/// Role of a user account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

/// Public view of the signed-in user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub email_verified: bool,
    pub image: Option<String>,
    pub role: Role,
    pub points: i32,
    pub team_id: Option<Uuid>,
}

/// Session record as exposed to its owner and to admins.
/// Field order matches the `sessions` select in the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "diesel", derive(diesel::Queryable))]
pub struct SessionResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub impersonated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Auth API Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SignUpRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,

    #[validate(email)]
    pub email: String,

    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SignInRequest {
    #[validate(email)]
    pub email: String,

    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInResponse {
    pub token: String,
    pub user: AuthUserResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentSessionResponse {
    pub user: AuthUserResponse,
    pub session: SessionResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1))]
    pub token: String,

    #[validate(length(min = 8, max = 128))]
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthStartResponse {
    pub auth_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ============================================================================
// Team API Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTeamRequest {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinTeamRequest {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub join_code: String,
}

/// Minimal team reference returned by create/join
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSummary {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamActionResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<TeamSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamResponse {
    pub id: Uuid,
    pub name: String,
    /// Only present for the team lead and for admins
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_code: Option<String>,
    pub members: Vec<TeamMember>,
    pub teamlead_id: Uuid,
    pub teamlead_name: String,
    pub points: i32,
    pub logo_url: Option<String>,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub is_team_lead: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MyTeamResponse {
    pub team: Option<TeamResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamListResponse {
    pub teams: Vec<TeamResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyTeamRequest {
    pub team_id: Uuid,
    pub is_verified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyTeamResponse {
    pub success: bool,
    pub message: String,
}

/// Signed change applied to a points balance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustPointsRequest {
    pub delta: i32,
}

/// Team balance after an admin adjustment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamPointsResponse {
    pub id: Uuid,
    pub name: String,
    pub points: i32,
}

// ============================================================================
// Leaderboard Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub id: Uuid,
    pub name: String,
    pub points: i32,
}

// ============================================================================
// Admin User Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchField {
    Email,
    Name,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Query parameters for the admin user listing
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub search_value: Option<String>,
    #[serde(default, deserialize_with = "unknown_as_none")]
    pub search_field: Option<SearchField>,
    pub sort_by: Option<String>,
    #[serde(default, deserialize_with = "unknown_as_none")]
    pub sort_direction: Option<SortDirection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminUserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub role: Role,
    pub points: i32,
    pub banned: bool,
    pub ban_reason: Option<String>,
    pub ban_expires: Option<DateTime<Utc>>,
    pub banned_at: Option<DateTime<Utc>>,
    pub team_id: Option<Uuid>,
    pub team_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserListResponse {
    pub users: Vec<AdminUserResponse>,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,

    #[validate(email)]
    pub email: String,

    #[validate(length(min = 8, max = 128))]
    pub password: String,

    #[serde(default)]
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,

    #[validate(email)]
    pub email: Option<String>,

    #[validate(range(min = 0))]
    pub points: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRoleRequest {
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BanUserRequest {
    pub ban_reason: Option<String>,
    /// Ban duration in seconds; permanent when absent
    pub ban_expires_in: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        assert_eq!(Role::from_str(Role::Admin.as_str()), Some(Role::Admin));
        assert_eq!(Role::from_str("superuser"), None);
    }

    #[test]
    fn test_create_user_defaults_to_user_role() {
        let req: CreateUserRequest = serde_json::from_str(
            r#"{"name":"Ada","email":"ada@example.com","password":"correct-horse"}"#,
        )
        .unwrap();
        assert_eq!(req.role, Role::User);
    }

    #[test]
    fn test_sign_up_rejects_short_password() {
        let req = SignUpRequest {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            password: "short".to_string(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_update_user_rejects_negative_points() {
        let req = UpdateUserRequest {
            name: None,
            email: None,
            points: Some(-5),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_missing_or_null_team_fields_read_as_empty() {
        let req: JoinTeamRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.join_code, "");
        let req: JoinTeamRequest = serde_json::from_str(r#"{"join_code":null}"#).unwrap();
        assert_eq!(req.join_code, "");
        let req: CreateTeamRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.name, "");
    }

    #[test]
    fn test_unknown_list_options_fall_back() {
        let query: UserListQuery = serde_json::from_str(
            r#"{"sort_direction":"ascending","search_field":"name"}"#,
        )
        .unwrap();
        assert_eq!(query.sort_direction, None);
        assert_eq!(query.search_field, Some(SearchField::Name));

        let query: UserListQuery = serde_json::from_str(r#"{"sort_direction":"asc"}"#).unwrap();
        assert_eq!(query.sort_direction, Some(SortDirection::Asc));
    }

    #[test]
    fn test_team_summary_omits_missing_join_code() {
        let summary = TeamSummary {
            id: Uuid::nil(),
            name: "Rustaceans".to_string(),
            join_code: None,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("join_code").is_none());
    }
}
