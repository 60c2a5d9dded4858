use anyhow::{Context, Result};
use std::env;

use crate::auth::types::AuthConfig;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_tls: bool,
    pub port: u16,
    pub auth: AuthConfig,
    pub mail: MailConfig,
}

/// Outbound mail settings. Without an API URL, messages are only logged.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub from: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_tls: parse_bool_var("DATABASE_TLS", true)?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            auth: AuthConfig::from_env()?,
            mail: MailConfig::from_env(),
        })
    }
}

impl MailConfig {
    pub fn from_env() -> Self {
        Self {
            api_url: non_empty_var("MAIL_API_URL"),
            api_key: non_empty_var("MAIL_API_KEY"),
            from: env::var("MAIL_FROM").unwrap_or_else(|_| "Teamboard <no-reply@localhost>".to_string()),
        }
    }
}

pub(crate) fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool_var(name: &str, default: bool) -> Result<bool> {
    match non_empty_var(name) {
        None => Ok(default),
        Some(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => anyhow::bail!("{} must be a boolean, got {:?}", name, v),
        },
    }
}

/// Split a comma-separated list, trimming and lowercasing entries.
pub(crate) fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_normalizes_entries() {
        assert_eq!(
            parse_list(" Admin@Example.com, ,ops@example.com "),
            vec!["admin@example.com".to_string(), "ops@example.com".to_string()]
        );
    }

    #[test]
    fn test_parse_list_empty() {
        assert!(parse_list("").is_empty());
    }
}
