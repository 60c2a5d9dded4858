use axum::{
    http::{header, Method, StatusCode},
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::{self, require_admin, require_auth};
use crate::handlers::{admin, leaderboard, teams};
use crate::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
        .with_state(state)
}

fn api_routes(state: AppState) -> Router<AppState> {
    let public = Router::new()
        // Leaderboards
        .route("/leaderboard", get(leaderboard::team_leaderboard))
        .route("/leaderboard/users", get(leaderboard::user_leaderboard))
        // Account flows
        .route("/auth/sign-up", post(auth::handlers::sign_up))
        .route("/auth/sign-in", post(auth::handlers::sign_in))
        .route("/auth/sign-out", post(auth::handlers::sign_out))
        .route("/auth/verify-email", get(auth::handlers::verify_email))
        .route("/auth/forgot-password", post(auth::handlers::forgot_password))
        .route("/auth/reset-password", post(auth::handlers::reset_password))
        .route("/auth/oauth/:provider", get(auth::handlers::oauth_start))
        .route(
            "/auth/oauth/:provider/callback",
            get(auth::handlers::oauth_callback),
        );

    let protected = Router::new()
        // Session routes
        .route("/auth/session", get(auth::handlers::get_session))
        .route("/auth/sessions", get(auth::handlers::list_sessions))
        .route("/auth/sessions/:id", delete(auth::handlers::revoke_session))
        .route(
            "/auth/stop-impersonating",
            post(auth::handlers::stop_impersonating),
        )
        // Team routes
        .route("/teams/create", post(teams::create_team))
        .route("/teams/join", post(teams::join_team))
        .route("/teams/leave", post(teams::leave_team))
        .route("/teams/delete", post(teams::delete_team))
        .route("/teams/my-team", get(teams::my_team))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let admin = Router::new()
        // Admin team routes
        .route("/admin/teams", get(teams::list_teams))
        .route("/admin/teams/verify", post(teams::verify_team))
        .route("/admin/teams/:id/points", post(teams::adjust_team_points))
        // Admin user routes
        .route("/admin/users", get(admin::list_users).post(admin::create_user))
        .route(
            "/admin/users/:id",
            put(admin::update_user).delete(admin::delete_user),
        )
        .route("/admin/users/:id/role", post(admin::set_role))
        .route("/admin/users/:id/points", post(admin::adjust_points))
        .route("/admin/users/:id/ban", post(admin::ban_user))
        .route("/admin/users/:id/unban", post(admin::unban_user))
        .route("/admin/users/:id/impersonate", post(admin::impersonate_user))
        .route(
            "/admin/users/:id/sessions",
            get(admin::list_user_sessions).delete(admin::revoke_user_sessions),
        )
        .route(
            "/admin/users/:id/sessions/:session_id",
            delete(admin::revoke_user_session),
        )
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn_with_state(state, require_auth));

    public.merge(protected).merge(admin)
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

/// Build CORS layer based on environment configuration.
///
/// If CORS_ALLOWED_ORIGINS is set, only those origins are allowed.
/// If not set, defaults to permissive CORS (for development only).
fn build_cors_layer() -> CorsLayer {
    let allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS").ok();

    match allowed_origins {
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();

            if origins.is_empty() {
                tracing::warn!(
                    "CORS_ALLOWED_ORIGINS is set but empty, using permissive CORS (not recommended for production)"
                );
                CorsLayer::permissive()
            } else {
                tracing::info!("CORS configured for origins: {:?}", origins);
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods([
                        Method::GET,
                        Method::POST,
                        Method::PUT,
                        Method::DELETE,
                        Method::OPTIONS,
                    ])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                    .allow_credentials(true)
            }
        }
        None => {
            tracing::warn!(
                "CORS_ALLOWED_ORIGINS not set, using permissive CORS (not recommended for production)"
            );
            CorsLayer::permissive()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::Request,
        Extension,
    };
    use shared_types::Role;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::auth::types::{test_config, AuthUser};
    use crate::config::{AppConfig, MailConfig};
    use crate::db::establish_connection_pool;
    use crate::mailer::LogMailer;

    /// State whose pool never connects; only paths that fail before touching
    /// the database can be exercised.
    fn test_state() -> AppState {
        let config = AppConfig {
            database_url: "postgres://nobody@127.0.0.1:1/none".to_string(),
            database_tls: false,
            port: 0,
            auth: test_config(),
            mail: MailConfig {
                api_url: None,
                api_key: None,
                from: "Teamboard <no-reply@localhost>".to_string(),
            },
        };
        let pool = establish_connection_pool(&config.database_url, false).unwrap();

        AppState {
            pool,
            config: Arc::new(config),
            mailer: Arc::new(LogMailer),
            http: reqwest::Client::new(),
        }
    }

    async fn send(request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = build_router(test_state()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    fn json_post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_team_routes_require_session() {
        let request = Request::get("/api/teams/my-team").body(Body::empty()).unwrap();
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Missing authentication");

        let (status, _) = send(json_post(
            "/api/teams/join",
            serde_json::json!({ "join_code": "ABCD1234" }),
        ))
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_forged_token_rejected() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/teams/leave")
            .header(header::AUTHORIZATION, "Bearer not-a-jwt")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid or expired token");
    }

    #[tokio::test]
    async fn test_admin_routes_require_session() {
        let request = Request::get("/api/admin/users").body(Body::empty()).unwrap();
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(json_post(
            "/api/admin/teams/verify",
            serde_json::json!({ "team_id": Uuid::new_v4(), "is_verified": true }),
        ))
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_leaderboards_are_public() {
        // The pool cannot connect, so anything but 401/404 means the route is public.
        let request = Request::get("/api/leaderboard").body(Body::empty()).unwrap();
        let (status, _) = send(request).await;
        assert_ne!(status, StatusCode::UNAUTHORIZED);
        assert_ne!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sign_up_validates_before_storage() {
        let (status, _) = send(json_post(
            "/api/auth/sign-up",
            serde_json::json!({ "name": "Ada", "email": "not-an-email", "password": "longenough" }),
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(json_post(
            "/api/auth/sign-up",
            serde_json::json!({ "name": "Ada", "email": "ada@example.com", "password": "short" }),
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_sign_out_without_session_clears_cookie() {
        let response = build_router(test_state())
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/auth/sign-out")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(cookie.starts_with("auth_token=;"));
        assert!(cookie.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_unknown_or_unconfigured_oauth_provider() {
        let request = Request::get("/api/auth/oauth/myspace")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let request = Request::get("/api/auth/oauth/github")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Provider not configured: github");
    }

    fn caller(role: Role) -> AuthUser {
        AuthUser {
            id: Uuid::new_v4(),
            email: "caller@example.com".to_string(),
            role,
            session_id: Uuid::new_v4(),
            session_token: "session".to_string(),
            impersonated_by: None,
        }
    }

    fn member_app() -> Router {
        Router::new()
            .route("/teams/create", post(teams::create_team))
            .route("/teams/join", post(teams::join_team))
            .layer(Extension(caller(Role::User)))
            .with_state(test_state())
    }

    async fn send_as_member(request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = member_app().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_missing_team_fields_get_required_messages() {
        let (status, body) = send_as_member(json_post("/teams/join", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Join code is required");

        let (status, body) = send_as_member(json_post(
            "/teams/join",
            serde_json::json!({ "join_code": null }),
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Join code is required");

        let (status, body) =
            send_as_member(json_post("/teams/create", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Team name is required");
    }

    #[tokio::test]
    async fn test_malformed_bodies_use_error_body() {
        let (status, body) = send_as_member(json_post(
            "/teams/join",
            serde_json::json!({ "join_code": 1234 }),
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/teams/create")
            .body(Body::from("name=Rustaceans"))
            .unwrap();
        let (status, body) = send_as_member(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    fn admin_only_app(user: Option<AuthUser>) -> Router {
        let app = Router::new()
            .route("/guarded", get(|| async { "ok" }))
            .route_layer(middleware::from_fn(require_admin));
        match user {
            Some(user) => app.layer(Extension(user)),
            None => app,
        }
    }

    #[tokio::test]
    async fn test_require_admin_rejects_regular_users() {
        let request = Request::get("/guarded").body(Body::empty()).unwrap();
        let response = admin_only_app(Some(caller(Role::User)))
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_require_admin_allows_admins() {
        let request = Request::get("/guarded").body(Body::empty()).unwrap();
        let response = admin_only_app(Some(caller(Role::Admin)))
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_require_admin_without_session() {
        let request = Request::get("/guarded").body(Body::empty()).unwrap();
        let response = admin_only_app(None).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
