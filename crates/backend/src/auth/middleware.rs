//! Authentication middleware layer for protecting routes.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};

use crate::db::{sessions, users};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

use super::jwt;
use super::types::{AuthConfig, AuthUser};

/// Caller resolved from a token, plus a replacement cookie when the session was extended.
pub struct Authenticated {
    pub user: AuthUser,
    pub refreshed_cookie: Option<String>,
}

/// Middleware function that requires a live session.
///
/// On success the `AuthUser` is stored in request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let config = &state.config.auth;

    let token = match extract_token(request.headers(), &config.cookie_name) {
        Some(t) => t,
        None => return ApiError::unauthorized("Missing authentication").into_response(),
    };

    let authenticated = match authenticate(&state, &token).await {
        Ok(a) => a,
        Err(e) => return e.into_response(),
    };

    request.extensions_mut().insert(authenticated.user);
    let mut response = next.run(request).await;

    if let Some(cookie) = authenticated.refreshed_cookie {
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }

    response
}

/// Must be layered inside `require_auth`.
pub async fn require_admin(request: Request<Body>, next: Next) -> Response {
    match request.extensions().get::<AuthUser>() {
        Some(user) if user.is_admin() => next.run(request).await,
        Some(user) => {
            tracing::warn!("Non-admin {} attempted an admin action", user.email);
            ApiError::forbidden("Admin access required").into_response()
        }
        None => ApiError::unauthorized("Missing authentication").into_response(),
    }
}

/// Resolve a JWT to a user: signature, then session, then ban state.
pub async fn authenticate(state: &AppState, token: &str) -> ApiResult<Authenticated> {
    let config = &state.config.auth;
    let now = Utc::now();

    let claims = jwt::validate_token(config, token)
        .map_err(|_| ApiError::unauthorized("Invalid or expired token"))?;

    let mut conn = state.pool.get().await?;

    let session = sessions::find_active(&mut conn, &claims.sid, now)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Session expired"))?;

    if session.user_id.to_string() != claims.sub {
        return Err(ApiError::unauthorized("Invalid or expired token"));
    }

    let mut user = users::find_by_id(&mut conn, session.user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User no longer exists"))?;

    if user.is_banned_at(now) {
        return Err(ApiError::forbidden(ban_message(user.ban_reason.as_deref())));
    }
    if user.has_lapsed_ban(now) {
        tracing::info!("Ban for {} expired, lifting it", user.email);
        user = users::unban(&mut conn, user.id).await?;
    }

    let mut refreshed_cookie = None;
    if session.impersonated_by.is_none() && jwt::should_refresh(session.updated_at, now) {
        let expires_at = now + Duration::days(config.session_duration_days);
        sessions::extend(&mut conn, session.id, expires_at).await?;
        match jwt::create_token(config, user.id, &session.token, expires_at) {
            Ok(new_token) => {
                refreshed_cookie = Some(build_auth_cookie(
                    config,
                    &new_token,
                    config.session_duration_days * 24 * 60 * 60,
                ));
            }
            Err(e) => tracing::error!("Failed to re-issue token: {}", e),
        }
    }

    Ok(Authenticated {
        user: AuthUser {
            role: user.role(),
            id: user.id,
            email: user.email,
            session_id: session.id,
            session_token: session.token,
            impersonated_by: session.impersonated_by,
        },
        refreshed_cookie,
    })
}

pub fn ban_message(reason: Option<&str>) -> String {
    match reason {
        Some(r) if !r.trim().is_empty() => format!("Your account has been banned: {}", r),
        _ => "Your account has been banned".to_string(),
    }
}

/// Token from the auth cookie, falling back to a bearer header.
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    extract_token_from_cookie(headers, cookie_name).or_else(|| extract_token_from_header(headers))
}

fn extract_token_from_cookie(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;

    for cookie_str in cookie_header.split(';') {
        if let Ok(cookie) = cookie::Cookie::parse(cookie_str.trim()) {
            if cookie.name() == cookie_name {
                return Some(cookie.value().to_string());
            }
        }
    }

    None
}

fn extract_token_from_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|s| s.to_string())
}

/// Build an auth cookie string.
pub fn build_auth_cookie(config: &AuthConfig, value: &str, max_age_seconds: i64) -> String {
    let secure = if config.secure_cookies { "; Secure" } else { "" };
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
        config.cookie_name, value, max_age_seconds, secure
    )
}

pub fn clear_auth_cookie(config: &AuthConfig) -> String {
    build_auth_cookie(config, "", 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::test_config;

    #[test]
    fn test_cookie_takes_precedence_over_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; auth_token=from-cookie"),
        );
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-header"),
        );
        assert_eq!(
            extract_token(&headers, "auth_token").as_deref(),
            Some("from-cookie")
        );
    }

    #[test]
    fn test_bearer_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-header"),
        );
        assert_eq!(
            extract_token(&headers, "auth_token").as_deref(),
            Some("from-header")
        );
    }

    #[test]
    fn test_no_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(extract_token(&headers, "auth_token").is_none());
    }

    #[test]
    fn test_cookie_flags() {
        let mut config = test_config();
        let cookie = build_auth_cookie(&config, "tok", 60);
        assert_eq!(cookie, "auth_token=tok; Path=/; HttpOnly; SameSite=Lax; Max-Age=60");

        config.secure_cookies = true;
        assert!(clear_auth_cookie(&config).ends_with("Max-Age=0; Secure"));
    }

    #[test]
    fn test_ban_message_includes_reason() {
        assert_eq!(
            ban_message(Some("spam")),
            "Your account has been banned: spam"
        );
        assert_eq!(ban_message(Some(" ")), "Your account has been banned");
        assert_eq!(ban_message(None), "Your account has been banned");
    }
}
