//! Auth-related types and configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared_types::Role;
use std::fmt;
use uuid::Uuid;

use crate::config::{non_empty_var, parse_list};

/// JWT Claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    /// Session token the JWT was issued for
    pub sid: String,
    /// Issued at timestamp
    pub iat: i64,
    /// Expiration timestamp
    pub exp: i64,
}

/// Authenticated caller, resolved from a live session
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub session_id: Uuid,
    pub session_token: String,
    pub impersonated_by: Option<Uuid>,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Supported social login providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
    Github,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Github => "github",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "google" => Some(OAuthProvider::Google),
            "github" => Some(OAuthProvider::Github),
            _ => None,
        }
    }

    pub fn authorize_endpoint(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "https://accounts.google.com/o/oauth2/v2/auth",
            OAuthProvider::Github => "https://github.com/login/oauth/authorize",
        }
    }

    pub fn token_endpoint(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "https://oauth2.googleapis.com/token",
            OAuthProvider::Github => "https://github.com/login/oauth/access_token",
        }
    }

    pub fn scopes(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "openid email profile",
            OAuthProvider::Github => "read:user user:email",
        }
    }
}

#[derive(Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
}

/// Auth configuration loaded from environment
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub session_duration_days: i64,
    pub cookie_name: String,
    pub public_base_url: String,
    pub admin_emails: Vec<String>,
    pub secure_cookies: bool,
    pub google: Option<OAuthClient>,
    pub github: Option<OAuthClient>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("session_duration_days", &self.session_duration_days)
            .field("cookie_name", &self.cookie_name)
            .field("public_base_url", &self.public_base_url)
            .field("admin_emails", &self.admin_emails)
            .field("secure_cookies", &self.secure_cookies)
            .field("google", &self.google.is_some())
            .field("github", &self.github.is_some())
            .finish_non_exhaustive()
    }
}

impl AuthConfig {
    /// Load auth configuration from environment variables.
    ///
    /// Required env vars:
    /// - `JWT_SECRET`: Secret key for signing JWTs
    ///
    /// Optional:
    /// - `PUBLIC_BASE_URL`: externally visible origin used in links and OAuth callbacks
    /// - `SESSION_DURATION_DAYS`: session lifetime (default 7)
    /// - `ADMIN_EMAILS`: comma-separated emails that receive the admin role on sign-up
    /// - `GOOGLE_CLIENT_ID` / `GOOGLE_CLIENT_SECRET`, `GITHUB_CLIENT_ID` / `GITHUB_CLIENT_SECRET`
    pub fn from_env() -> Result<Self> {
        let jwt_secret = non_empty_var("JWT_SECRET").context("JWT_SECRET must be set")?;

        let session_duration_days = match non_empty_var("SESSION_DURATION_DAYS") {
            Some(v) => v
                .parse()
                .context("SESSION_DURATION_DAYS must be a whole number of days")?,
            None => 7,
        };

        Ok(Self {
            jwt_secret,
            session_duration_days,
            cookie_name: "auth_token".to_string(),
            public_base_url: non_empty_var("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
            admin_emails: non_empty_var("ADMIN_EMAILS")
                .map(|raw| parse_list(&raw))
                .unwrap_or_default(),
            secure_cookies: std::env::var("RUST_ENV").unwrap_or_default() == "production",
            google: oauth_client_from_env("GOOGLE"),
            github: oauth_client_from_env("GITHUB"),
        })
    }

    /// Check if an email address should be granted the admin role.
    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin_emails.contains(&email.to_lowercase())
    }

    pub fn oauth_client(&self, provider: OAuthProvider) -> Option<&OAuthClient> {
        match provider {
            OAuthProvider::Google => self.google.as_ref(),
            OAuthProvider::Github => self.github.as_ref(),
        }
    }

    pub fn oauth_redirect_uri(&self, provider: OAuthProvider) -> String {
        format!(
            "{}/api/auth/oauth/{}/callback",
            self.public_base_url,
            provider.as_str()
        )
    }
}

fn oauth_client_from_env(prefix: &str) -> Option<OAuthClient> {
    let client_id = non_empty_var(&format!("{}_CLIENT_ID", prefix))?;
    let client_secret = non_empty_var(&format!("{}_CLIENT_SECRET", prefix))?;
    Some(OAuthClient {
        client_id,
        client_secret,
    })
}

#[cfg(test)]
pub(crate) fn test_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: "test-secret-key-for-testing-only".to_string(),
        session_duration_days: 7,
        cookie_name: "auth_token".to_string(),
        public_base_url: "http://localhost:3000".to_string(),
        admin_emails: vec!["admin@example.com".to_string()],
        secure_cookies: false,
        google: Some(OAuthClient {
            client_id: "google-client".to_string(),
            client_secret: "google-secret".to_string(),
        }),
        github: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_email_match_is_case_insensitive() {
        let config = test_config();
        assert!(config.is_admin_email("Admin@Example.com"));
        assert!(!config.is_admin_email("someone@example.com"));
    }

    #[test]
    fn test_redirect_uri_includes_provider() {
        let config = test_config();
        assert_eq!(
            config.oauth_redirect_uri(OAuthProvider::Github),
            "http://localhost:3000/api/auth/oauth/github/callback"
        );
    }

    #[test]
    fn test_unconfigured_provider_has_no_client() {
        let config = test_config();
        assert!(config.oauth_client(OAuthProvider::Google).is_some());
        assert!(config.oauth_client(OAuthProvider::Github).is_none());
    }

    #[test]
    fn test_debug_output_hides_secret() {
        let rendered = format!("{:?}", test_config());
        assert!(!rendered.contains("test-secret-key"));
    }
}
