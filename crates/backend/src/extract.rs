//! Request extractors whose rejections use the API error body.

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// JSON body. Missing fields, wrong types and bad content types are 400s.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// JSON body that may be left out entirely. An empty body gives `None`;
/// anything else must parse.
pub struct OptionalJson<T>(pub Option<T>);

#[async_trait]
impl<T, S> FromRequest<S> for OptionalJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self(None));
        }

        let Json(value) = Json::<T>::from_bytes(&bytes)?;
        Ok(Self(Some(value)))
    }
}

pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

pub struct ApiPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        routing::post,
        Router,
    };
    use shared_types::BanUserRequest;
    use tower::ServiceExt;

    async fn echo_ban(OptionalJson(body): OptionalJson<BanUserRequest>) -> String {
        let body = body.unwrap_or_default();
        format!("{:?}|{:?}", body.ban_reason, body.ban_expires_in)
    }

    async fn post_ban(body: &'static str) -> (StatusCode, String) {
        let app = Router::new().route("/ban", post(echo_ban));
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/ban")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_empty_optional_body_uses_defaults() {
        let (status, body) = post_ban("").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "None|None");
    }

    #[tokio::test]
    async fn test_optional_body_is_parsed() {
        let (status, body) = post_ban(r#"{"ban_reason":"spam","ban_expires_in":3600}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Some(\"spam\")|Some(3600)");
    }

    #[tokio::test]
    async fn test_malformed_optional_body_is_rejected() {
        let (status, body) = post_ban(r#"{"ban_reason":"spam","ban_expires_in":"3600"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn test_path_rejection_uses_error_body() {
        async fn show(ApiPath(id): ApiPath<uuid::Uuid>) -> String {
            id.to_string()
        }
        let app = Router::new().route("/users/:id", axum::routing::get(show));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/users/not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json["error"].is_string());
    }
}
