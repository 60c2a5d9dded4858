//! JWT token creation and validation.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use super::types::{AuthConfig, Claims};

/// Create a JWT for a session. The token expires together with the session.
pub fn create_token(
    config: &AuthConfig,
    user_id: Uuid,
    session_token: &str,
    expires_at: DateTime<Utc>,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: user_id.to_string(),
        sid: session_token.to_string(),
        iat: Utc::now().timestamp(),
        exp: expires_at.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
}

/// Validate a JWT token and return claims.
pub fn validate_token(
    config: &AuthConfig,
    token: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

/// Check if a session should be extended (last refreshed more than 1 day ago).
pub fn should_refresh(last_refreshed: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let age_seconds = now.timestamp() - last_refreshed.timestamp();
    let one_day_seconds = 86400;
    age_seconds > one_day_seconds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::test_config;
    use chrono::Duration;

    #[test]
    fn test_create_and_validate_token() {
        let config = test_config();
        let user_id = Uuid::new_v4();
        let token = create_token(&config, user_id, "session-abc", Utc::now() + Duration::days(7))
            .expect("should create token");

        let claims = validate_token(&config, &token).expect("should validate token");
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.sid, "session-abc");
    }

    #[test]
    fn test_invalid_token_rejected() {
        let config = test_config();
        let result = validate_token(&config, "invalid-token");
        assert!(result.is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let config = test_config();
        let token = create_token(&config, Uuid::new_v4(), "sid", Utc::now() + Duration::days(1))
            .expect("should create token");

        let mut wrong_config = config;
        wrong_config.jwt_secret = "wrong-secret".to_string();

        let result = validate_token(&wrong_config, &token);
        assert!(result.is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let config = test_config();
        let token = create_token(&config, Uuid::new_v4(), "sid", Utc::now() - Duration::hours(2))
            .expect("should create token");

        assert!(validate_token(&config, &token).is_err());
    }

    #[test]
    fn test_should_refresh_after_a_day() {
        let now = Utc::now();
        assert!(!should_refresh(now - Duration::hours(23), now));
        assert!(should_refresh(now - Duration::hours(25), now));
    }
}
