//! Authentication HTTP handlers.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Extension, Json,
};
use chrono::{Duration, Utc};
use diesel_async::{scoped_futures::ScopedFutureExt, AsyncConnection, AsyncPgConnection};
use serde::Deserialize;
use shared_types::{
    AuthUserResponse, CurrentSessionResponse, ForgotPasswordRequest, MessageResponse,
    OAuthStartResponse, ResetPasswordRequest, Role, SessionResponse, SignInRequest,
    SignInResponse, SignUpRequest,
};
use uuid::Uuid;
use validator::Validate;

use crate::db::{accounts, sessions, teams, tokens, users};
use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::mailer;
use crate::models::{TokenPurpose, UserRow};
use crate::AppState;

use super::middleware::{ban_message, clear_auth_cookie, extract_token};
use super::oauth::{self, OAuthProfile};
use super::password::{generate_token, hash_password, verify_password};
use super::session::{issue_session, ClientInfo, IssuedSession};
use super::types::{AuthUser, OAuthProvider};
use super::jwt;

const VERIFICATION_TTL_HOURS: i64 = 24;
const RESET_TTL_HOURS: i64 = 1;
const OAUTH_STATE_TTL_MINUTES: i64 = 10;

fn session_response(issued: IssuedSession, user: UserRow) -> Response {
    (
        [(header::SET_COOKIE, issued.cookie)],
        Json(SignInResponse {
            token: issued.jwt,
            user: user.into(),
        }),
    )
        .into_response()
}

fn redirect_with_cookie(location: &str, cookie: &str) -> Response {
    (
        StatusCode::SEE_OTHER,
        [(header::LOCATION, location), (header::SET_COOKIE, cookie)],
    )
        .into_response()
}

/// Replace any outstanding verification token and mail a fresh link.
async fn send_verification(
    state: &AppState,
    conn: &mut AsyncPgConnection,
    user: &UserRow,
) -> ApiResult<()> {
    tokens::delete_for_user(conn, TokenPurpose::EmailVerification, user.id).await?;

    let token = generate_token();
    tokens::create(
        conn,
        TokenPurpose::EmailVerification,
        &token,
        Some(user.id),
        Utc::now() + Duration::hours(VERIFICATION_TTL_HOURS),
    )
    .await?;

    let link = format!(
        "{}/api/auth/verify-email?token={}",
        state.config.auth.public_base_url,
        urlencoding::encode(&token)
    );
    mailer::send_in_background(
        state.mailer.clone(),
        mailer::verification_email(&user.email, &user.name, &link),
    );

    Ok(())
}

/// Register with email and password. No session is issued until the email is verified.
pub async fn sign_up(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SignUpRequest>,
) -> ApiResult<(StatusCode, Json<MessageResponse>)> {
    body.validate()?;

    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::bad_request("Name is required"));
    }
    let email = body.email.trim().to_lowercase();
    let role = if state.config.auth.is_admin_email(&email) {
        Role::Admin
    } else {
        Role::User
    };
    let password_hash = hash_password(&body.password)?;

    let mut conn = state.pool.get().await?;

    let (email_ref, name_ref, hash_ref) = (&email, &name, &password_hash);
    let user = conn
        .transaction::<_, ApiError, _>(|conn| {
            async move {
                if let Some(existing) = users::find_by_email(conn, email_ref).await? {
                    if existing.email_verified {
                        return Err(ApiError::conflict(
                            "An account with this email already exists",
                        ));
                    }
                    // Unverified registrations can be taken over unless they lead a
                    // team; sessions and accounts cascade.
                    let existing = users::lock_by_id(conn, existing.id).await?;
                    if teams::find_by_lead(conn, existing.id).await?.is_some() {
                        return Err(ApiError::conflict(
                            "An account with this email already exists",
                        ));
                    }
                    tracing::info!("Replacing unverified registration for {}", email_ref);
                    users::delete(conn, existing.id).await?;
                }

                let user = users::create(
                    conn,
                    users::NewUser {
                        name: name_ref,
                        email: email_ref,
                        email_verified: false,
                        image: None,
                        role,
                    },
                )
                .await?;
                accounts::create_credential(conn, user.id, hash_ref).await?;

                Ok(user)
            }
            .scope_boxed()
        })
        .await?;

    send_verification(&state, &mut conn, &user).await?;

    tracing::info!("New registration: {}", user.email);

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new(
            "Account created. Check your email to verify your address.",
        )),
    ))
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailParams {
    pub token: String,
}

/// Confirm an email address, sign the user in and redirect to the app.
pub async fn verify_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiQuery(params): ApiQuery<VerifyEmailParams>,
) -> Response {
    match verify_email_inner(&state, &headers, &params.token).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Email verification error: {:?}", e);
            Redirect::to("/?auth_error=verification_failed").into_response()
        }
    }
}

async fn verify_email_inner(
    state: &AppState,
    headers: &HeaderMap,
    token: &str,
) -> ApiResult<Response> {
    let config = &state.config.auth;
    let mut conn = state.pool.get().await?;

    let consumed = tokens::consume(&mut conn, TokenPurpose::EmailVerification, token, Utc::now())
        .await?;
    let Some(user_id) = consumed.and_then(|t| t.user_id) else {
        return Ok(Redirect::to("/?auth_error=invalid_token").into_response());
    };

    let user = users::mark_email_verified(&mut conn, user_id).await?;
    if user.is_banned_at(Utc::now()) {
        return Ok(Redirect::to("/?auth_error=banned").into_response());
    }

    let issued = issue_session(
        &mut conn,
        config,
        user.id,
        &ClientInfo::from_headers(headers),
        Duration::days(config.session_duration_days),
        None,
    )
    .await?;

    tracing::info!("Email verified for {}", user.email);

    Ok(redirect_with_cookie("/", &issued.cookie))
}

pub async fn sign_in(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<SignInRequest>,
) -> ApiResult<Response> {
    body.validate()?;

    let config = &state.config.auth;
    let email = body.email.trim().to_lowercase();
    let mut conn = state.pool.get().await?;

    let invalid = || ApiError::unauthorized("Invalid email or password");

    let user = users::find_by_email(&mut conn, &email)
        .await?
        .ok_or_else(invalid)?;
    let stored_hash = accounts::find_credential(&mut conn, user.id)
        .await?
        .and_then(|account| account.password_hash)
        .ok_or_else(invalid)?;

    if !verify_password(&body.password, &stored_hash) {
        tracing::warn!("Failed sign-in for {}", email);
        return Err(invalid());
    }

    if !user.email_verified {
        send_verification(&state, &mut conn, &user).await?;
        return Err(ApiError::forbidden(
            "Email not verified. A new verification link has been sent.",
        ));
    }

    let now = Utc::now();
    if user.is_banned_at(now) {
        return Err(ApiError::forbidden(ban_message(user.ban_reason.as_deref())));
    }
    let user = if user.has_lapsed_ban(now) {
        users::unban(&mut conn, user.id).await?
    } else {
        user
    };

    let issued = issue_session(
        &mut conn,
        config,
        user.id,
        &ClientInfo::from_headers(&headers),
        Duration::days(config.session_duration_days),
        None,
    )
    .await?;

    tracing::info!("Successful sign-in for: {}", user.email);

    Ok(session_response(issued, user))
}

/// Delete the current session if there is one and clear the cookie.
pub async fn sign_out(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    let config = &state.config.auth;

    if let Some(token) = extract_token(&headers, &config.cookie_name) {
        if let Ok(claims) = jwt::validate_token(config, &token) {
            let mut conn = state.pool.get().await?;
            sessions::delete_by_token(&mut conn, &claims.sid).await?;
        }
    }

    Ok((
        [(header::SET_COOKIE, clear_auth_cookie(config))],
        Json(MessageResponse::new("Signed out")),
    )
        .into_response())
}

pub async fn get_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<CurrentSessionResponse>> {
    let mut conn = state.pool.get().await?;

    let user = users::find_by_id(&mut conn, auth.id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User no longer exists"))?;
    let session = sessions::find_active(&mut conn, &auth.session_token, Utc::now())
        .await?
        .ok_or_else(|| ApiError::unauthorized("Session expired"))?;

    Ok(Json(CurrentSessionResponse {
        user: AuthUserResponse::from(user),
        session: session.into(),
    }))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<Vec<SessionResponse>>> {
    let mut conn = state.pool.get().await?;
    let list = sessions::list_for_user(&mut conn, auth.id, Utc::now()).await?;
    Ok(Json(list))
}

pub async fn revoke_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiPath(session_id): ApiPath<Uuid>,
) -> ApiResult<Response> {
    let mut conn = state.pool.get().await?;

    let deleted = sessions::delete_for_user(&mut conn, session_id, auth.id).await?;
    if deleted == 0 {
        return Err(ApiError::not_found("Session not found"));
    }

    let body = Json(MessageResponse::new("Session revoked"));
    // Revoking the session in use signs the caller out
    if session_id == auth.session_id {
        let cookie = clear_auth_cookie(&state.config.auth);
        return Ok(([(header::SET_COOKIE, cookie)], body).into_response());
    }
    Ok(body.into_response())
}

/// Always succeeds so the response does not reveal which emails are registered.
pub async fn forgot_password(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ForgotPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    body.validate()?;

    let email = body.email.trim().to_lowercase();
    let mut conn = state.pool.get().await?;

    if let Some(user) = users::find_by_email(&mut conn, &email).await? {
        tokens::delete_for_user(&mut conn, TokenPurpose::PasswordReset, user.id).await?;

        let token = generate_token();
        tokens::create(
            &mut conn,
            TokenPurpose::PasswordReset,
            &token,
            Some(user.id),
            Utc::now() + Duration::hours(RESET_TTL_HOURS),
        )
        .await?;

        let link = format!(
            "{}/reset-password?token={}",
            state.config.auth.public_base_url,
            urlencoding::encode(&token)
        );
        mailer::send_in_background(
            state.mailer.clone(),
            mailer::password_reset_email(&user.email, &user.name, &link),
        );
        tracing::info!("Password reset requested for {}", user.email);
    }

    Ok(Json(MessageResponse::new(
        "If an account exists for that email, a reset link has been sent.",
    )))
}

pub async fn reset_password(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ResetPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    body.validate()?;

    let password_hash = hash_password(&body.new_password)?;
    let mut conn = state.pool.get().await?;

    let (token_ref, hash_ref) = (&body.token, &password_hash);
    conn.transaction::<_, ApiError, _>(|conn| {
        async move {
            let user_id = tokens::consume(conn, TokenPurpose::PasswordReset, token_ref, Utc::now())
                .await?
                .and_then(|t| t.user_id)
                .ok_or_else(|| ApiError::bad_request("Invalid or expired reset token"))?;

            match accounts::find_credential(conn, user_id).await? {
                Some(account) => {
                    accounts::update_password(conn, account.id, hash_ref).await?;
                }
                None => {
                    accounts::create_credential(conn, user_id, hash_ref).await?;
                }
            }

            let revoked = sessions::delete_all_for_user(conn, user_id).await?;
            tracing::info!(
                "Password reset for user {}, revoked {} sessions",
                user_id,
                revoked
            );

            Ok(())
        }
        .scope_boxed()
    })
    .await?;

    Ok(Json(MessageResponse::new("Password has been reset")))
}

fn parse_provider(state: &AppState, raw: &str) -> ApiResult<OAuthProvider> {
    let provider = OAuthProvider::from_str(raw)
        .ok_or_else(|| ApiError::not_found(format!("Unknown provider: {}", raw)))?;
    if state.config.auth.oauth_client(provider).is_none() {
        return Err(ApiError::not_found(format!(
            "Provider not configured: {}",
            raw
        )));
    }
    Ok(provider)
}

/// Start an OAuth login flow.
///
/// Returns a URL that the frontend should redirect the user to.
pub async fn oauth_start(
    State(state): State<AppState>,
    ApiPath(provider): ApiPath<String>,
) -> ApiResult<Json<OAuthStartResponse>> {
    let provider = parse_provider(&state, &provider)?;
    let config = &state.config.auth;
    let client = config
        .oauth_client(provider)
        .ok_or_else(|| ApiError::not_found("Provider not configured"))?;

    let csrf_state = generate_token();
    let mut conn = state.pool.get().await?;
    tokens::create(
        &mut conn,
        TokenPurpose::OAuthState,
        &csrf_state,
        None,
        Utc::now() + Duration::minutes(OAUTH_STATE_TTL_MINUTES),
    )
    .await?;

    let auth_url = oauth::authorization_url(config, provider, client, &csrf_state);

    Ok(Json(OAuthStartResponse { auth_url }))
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Handle the provider redirect.
///
/// Exchanges the code, resolves or creates the user and sets an auth cookie on success.
pub async fn oauth_callback(
    State(state): State<AppState>,
    ApiPath(provider): ApiPath<String>,
    headers: HeaderMap,
    ApiQuery(params): ApiQuery<OAuthCallbackParams>,
) -> Response {
    match oauth_callback_inner(&state, &provider, &headers, params).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("OAuth callback error: {:?}", e);
            Redirect::to("/?auth_error=auth_failed").into_response()
        }
    }
}

async fn oauth_callback_inner(
    state: &AppState,
    provider: &str,
    headers: &HeaderMap,
    params: OAuthCallbackParams,
) -> ApiResult<Response> {
    let provider = parse_provider(state, provider)?;
    let config = &state.config.auth;
    let client = config
        .oauth_client(provider)
        .ok_or_else(|| ApiError::not_found("Provider not configured"))?;

    if let Some(error) = params.error {
        tracing::warn!("{} returned an OAuth error: {}", provider.as_str(), error);
        return Ok(Redirect::to("/?auth_error=access_denied").into_response());
    }
    let (Some(code), Some(csrf_state)) = (params.code, params.state) else {
        return Ok(Redirect::to("/?auth_error=invalid_request").into_response());
    };

    let mut conn = state.pool.get().await?;

    if tokens::consume(&mut conn, TokenPurpose::OAuthState, &csrf_state, Utc::now())
        .await?
        .is_none()
    {
        tracing::warn!("OAuth callback with unknown or expired state");
        return Ok(Redirect::to("/?auth_error=invalid_state").into_response());
    }

    let access_token = match oauth::exchange_code(&state.http, config, provider, client, &code).await
    {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("{:?}", e);
            return Ok(Redirect::to("/?auth_error=token_exchange_failed").into_response());
        }
    };
    let profile = oauth::fetch_profile(&state.http, provider, &access_token).await?;

    tracing::info!("OAuth login attempt from: {}", profile.email);

    if !profile.email_verified {
        return Ok(Redirect::to("/?auth_error=email_not_verified").into_response());
    }

    let user = link_oauth_user(state, &mut conn, provider, &profile, &access_token).await?;

    let now = Utc::now();
    if user.is_banned_at(now) {
        return Ok(Redirect::to("/?auth_error=banned").into_response());
    }
    if user.has_lapsed_ban(now) {
        users::unban(&mut conn, user.id).await?;
    }

    let issued = issue_session(
        &mut conn,
        config,
        user.id,
        &ClientInfo::from_headers(headers),
        Duration::days(config.session_duration_days),
        None,
    )
    .await?;

    tracing::info!("Successful login for: {}", user.email);

    Ok(redirect_with_cookie("/", &issued.cookie))
}

/// How an OAuth login relates to a user found by email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmailMatch {
    /// A verified user owns the address; link to it.
    Verified,
    /// An unverified registration holds the address. Its password and
    /// sessions are dropped before the login claims it.
    Unclaimed,
    NoUser,
}

fn classify_email_match(existing: Option<&UserRow>) -> EmailMatch {
    match existing {
        Some(user) if user.email_verified => EmailMatch::Verified,
        Some(_) => EmailMatch::Unclaimed,
        None => EmailMatch::NoUser,
    }
}

/// Find the user behind an OAuth profile: an already linked account, then a
/// user with the same email, then a newly created one.
async fn link_oauth_user(
    state: &AppState,
    conn: &mut AsyncPgConnection,
    provider: OAuthProvider,
    profile: &OAuthProfile,
    access_token: &str,
) -> ApiResult<UserRow> {
    let is_admin_email = state.config.auth.is_admin_email(&profile.email);

    conn.transaction::<_, ApiError, _>(|conn| {
        async move {
            if let Some(account) =
                accounts::find_by_provider(conn, provider.as_str(), &profile.account_id).await?
            {
                accounts::update_access_token(conn, account.id, access_token).await?;
                return Ok(users::lock_by_id(conn, account.user_id).await?);
            }

            let existing = users::find_by_email(conn, &profile.email).await?;
            let user = match (classify_email_match(existing.as_ref()), existing) {
                (EmailMatch::Verified, Some(existing)) => existing,
                (EmailMatch::Unclaimed, Some(existing)) => {
                    let existing = users::lock_by_id(conn, existing.id).await?;
                    let dropped = accounts::delete_credential(conn, existing.id).await?;
                    sessions::delete_all_for_user(conn, existing.id).await?;
                    tracing::info!(
                        "{} claimed pending registration via {} ({} credentials dropped)",
                        existing.email,
                        provider.as_str(),
                        dropped
                    );
                    users::mark_email_verified(conn, existing.id).await?
                }
                _ => {
                    tracing::info!("Creating user for {} via {}", profile.email, provider.as_str());
                    users::create(
                        conn,
                        users::NewUser {
                            name: &profile.name,
                            email: &profile.email,
                            email_verified: true,
                            image: profile.image.as_deref(),
                            role: if is_admin_email { Role::Admin } else { Role::User },
                        },
                    )
                    .await?
                }
            };

            accounts::create_oauth(
                conn,
                user.id,
                provider.as_str(),
                &profile.account_id,
                access_token,
            )
            .await?;

            Ok(user)
        }
        .scope_boxed()
    })
    .await
}

/// End an impersonation session and sign the original admin back in.
pub async fn stop_impersonating(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let admin_id = auth
        .impersonated_by
        .ok_or_else(|| ApiError::bad_request("Not impersonating a user"))?;

    let config = &state.config.auth;
    let mut conn = state.pool.get().await?;

    sessions::delete_by_token(&mut conn, &auth.session_token).await?;

    let admin = users::find_by_id(&mut conn, admin_id)
        .await?
        .filter(|u| u.is_admin())
        .ok_or_else(|| ApiError::forbidden("Original admin account is no longer available"))?;

    let issued = issue_session(
        &mut conn,
        config,
        admin.id,
        &ClientInfo::from_headers(&headers),
        Duration::days(config.session_duration_days),
        None,
    )
    .await?;

    tracing::info!("{} stopped impersonating {}", admin.email, auth.email);

    Ok(session_response(issued, admin))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures;

    #[test]
    fn test_oauth_email_match() {
        let verified = fixtures::user("user");
        assert_eq!(classify_email_match(Some(&verified)), EmailMatch::Verified);

        let mut pending = fixtures::user("user");
        pending.email_verified = false;
        assert_eq!(classify_email_match(Some(&pending)), EmailMatch::Unclaimed);

        assert_eq!(classify_email_match(None), EmailMatch::NoUser);
    }
}
