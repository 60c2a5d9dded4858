//! Session issuance shared by sign-in, OAuth, email verification and impersonation.

use axum::http::{header, HeaderMap};
use chrono::{Duration, Utc};
use diesel_async::AsyncPgConnection;
use uuid::Uuid;

use crate::db::sessions::{self, NewSession};
use crate::error::{ApiError, ApiResult};
use crate::models::SessionRow;

use super::jwt;
use super::middleware::build_auth_cookie;
use super::password::generate_token;
use super::types::AuthConfig;

/// Request metadata recorded on new sessions
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    /// Uses the first `X-Forwarded-For` hop, since the server runs behind a proxy.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let ip_address = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        Self {
            ip_address,
            user_agent,
        }
    }
}

pub struct IssuedSession {
    pub session: SessionRow,
    pub jwt: String,
    pub cookie: String,
}

pub async fn issue_session(
    conn: &mut AsyncPgConnection,
    config: &AuthConfig,
    user_id: Uuid,
    client: &ClientInfo,
    lifetime: Duration,
    impersonated_by: Option<Uuid>,
) -> ApiResult<IssuedSession> {
    let token = generate_token();
    let expires_at = Utc::now() + lifetime;

    let session = sessions::create(
        conn,
        NewSession {
            user_id,
            token: &token,
            expires_at,
            ip_address: client.ip_address.as_deref(),
            user_agent: client.user_agent.as_deref(),
            impersonated_by,
        },
    )
    .await?;

    let jwt = jwt::create_token(config, user_id, &session.token, expires_at)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Failed to create token: {}", e)))?;
    let cookie = build_auth_cookie(config, &jwt, lifetime.num_seconds());

    tracing::debug!("Issued session {} for user {}", session.id, user_id);

    Ok(IssuedSession {
        session,
        jwt,
        cookie,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_info_uses_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8.0"));

        let info = ClientInfo::from_headers(&headers);
        assert_eq!(info.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(info.user_agent.as_deref(), Some("curl/8.0"));
    }

    #[test]
    fn test_client_info_without_headers() {
        let info = ClientInfo::from_headers(&HeaderMap::new());
        assert!(info.ip_address.is_none());
        assert!(info.user_agent.is_none());
    }
}
