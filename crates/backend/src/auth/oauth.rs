//! Google and GitHub authorization-code flow.

use anyhow::{Context, Result};
use serde::Deserialize;

use super::types::{AuthConfig, OAuthClient, OAuthProvider};

/// Provider profile normalized across providers
#[derive(Debug, Clone)]
pub struct OAuthProfile {
    pub account_id: String,
    pub email: String,
    pub email_verified: bool,
    pub name: String,
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    id: String,
    email: String,
    #[serde(default)]
    verified_email: bool,
    name: Option<String>,
    picture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: i64,
    login: String,
    name: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

pub fn authorization_url(
    config: &AuthConfig,
    provider: OAuthProvider,
    client: &OAuthClient,
    state: &str,
) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
        provider.authorize_endpoint(),
        urlencoding::encode(&client.client_id),
        urlencoding::encode(&config.oauth_redirect_uri(provider)),
        urlencoding::encode(provider.scopes()),
        urlencoding::encode(state),
    )
}

/// Exchange an authorization code for an access token.
pub async fn exchange_code(
    http: &reqwest::Client,
    config: &AuthConfig,
    provider: OAuthProvider,
    client: &OAuthClient,
    code: &str,
) -> Result<String> {
    let redirect_uri = config.oauth_redirect_uri(provider);
    let params = [
        ("code", code),
        ("client_id", client.client_id.as_str()),
        ("client_secret", client.client_secret.as_str()),
        ("redirect_uri", redirect_uri.as_str()),
        ("grant_type", "authorization_code"),
    ];

    let response = http
        .post(provider.token_endpoint())
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&params)
        .send()
        .await
        .context("Token exchange request failed")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Token exchange failed: {} - {}", status, body);
    }

    let tokens: TokenResponse = response
        .json()
        .await
        .context("Invalid token response")?;

    Ok(tokens.access_token)
}

pub async fn fetch_profile(
    http: &reqwest::Client,
    provider: OAuthProvider,
    access_token: &str,
) -> Result<OAuthProfile> {
    match provider {
        OAuthProvider::Google => {
            let info: GoogleUserInfo = http
                .get("https://www.googleapis.com/oauth2/v2/userinfo")
                .bearer_auth(access_token)
                .send()
                .await
                .context("Failed to get user info")?
                .error_for_status()?
                .json()
                .await
                .context("Invalid user info response")?;

            Ok(OAuthProfile {
                name: info.name.unwrap_or_else(|| local_part(&info.email)),
                account_id: info.id,
                email: info.email.to_lowercase(),
                email_verified: info.verified_email,
                image: info.picture,
            })
        }
        OAuthProvider::Github => {
            let user: GithubUser = http
                .get("https://api.github.com/user")
                .bearer_auth(access_token)
                .header(reqwest::header::USER_AGENT, "teamboard")
                .send()
                .await
                .context("Failed to get GitHub user")?
                .error_for_status()?
                .json()
                .await
                .context("Invalid GitHub user response")?;

            let emails: Vec<GithubEmail> = http
                .get("https://api.github.com/user/emails")
                .bearer_auth(access_token)
                .header(reqwest::header::USER_AGENT, "teamboard")
                .send()
                .await
                .context("Failed to get GitHub emails")?
                .error_for_status()?
                .json()
                .await
                .context("Invalid GitHub emails response")?;

            let primary = pick_github_email(&emails)
                .context("GitHub account has no verified email")?;

            Ok(OAuthProfile {
                account_id: user.id.to_string(),
                email: primary.email.to_lowercase(),
                email_verified: primary.verified,
                name: user.name.unwrap_or(user.login),
                image: user.avatar_url,
            })
        }
    }
}

/// Primary verified address, else any verified one.
fn pick_github_email(emails: &[GithubEmail]) -> Option<&GithubEmail> {
    emails
        .iter()
        .find(|e| e.primary && e.verified)
        .or_else(|| emails.iter().find(|e| e.verified))
}

fn local_part(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::test_config;

    #[test]
    fn test_authorization_url_encodes_params() {
        let config = test_config();
        let client = config.oauth_client(OAuthProvider::Google).unwrap().clone();
        let url = authorization_url(&config, OAuthProvider::Google, &client, "st ate");

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("client_id=google-client"));
        assert!(url.contains(
            "redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fapi%2Fauth%2Foauth%2Fgoogle%2Fcallback"
        ));
        assert!(url.contains("scope=openid%20email%20profile"));
        assert!(url.contains("state=st%20ate"));
    }

    #[test]
    fn test_github_email_prefers_primary_verified() {
        let emails = vec![
            GithubEmail {
                email: "old@example.com".to_string(),
                primary: false,
                verified: true,
            },
            GithubEmail {
                email: "main@example.com".to_string(),
                primary: true,
                verified: true,
            },
        ];
        assert_eq!(pick_github_email(&emails).unwrap().email, "main@example.com");
    }

    #[test]
    fn test_github_email_ignores_unverified() {
        let emails = vec![GithubEmail {
            email: "main@example.com".to_string(),
            primary: true,
            verified: false,
        }];
        assert!(pick_github_email(&emails).is_none());
    }

    #[test]
    fn test_local_part() {
        assert_eq!(local_part("ada@example.com"), "ada");
    }
}
