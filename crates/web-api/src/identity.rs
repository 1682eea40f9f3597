//! 调用方身份
//!
//! 身份由外部的验证流程给出，这里只读取不透明的用户 id：
//! 优先 `x-user-id` 请求头，其次 `user_id` 查询参数。

use axum::{
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use domain::UserId;
use serde::Deserialize;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub UserId);

#[derive(Debug, Deserialize)]
struct IdentityQuery {
    user_id: Option<String>,
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let raw = match from_header {
            Some(raw) => raw,
            None => Query::<IdentityQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(query)| query.user_id)
                .ok_or_else(|| ApiError::unauthorized("missing caller identity"))?,
        };

        raw.trim()
            .parse::<UserId>()
            .map(Caller)
            .map_err(|_| ApiError::bad_request("caller identity must be a uuid"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    async fn extract(request: Request<()>) -> Result<Caller, ApiError> {
        let (mut parts, _) = request.into_parts();
        Caller::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn header_takes_priority_over_query() {
        let header_id = UserId::generate();
        let query_id = UserId::generate();
        let request = Request::builder()
            .uri(format!("/api/chats?user_id={query_id}"))
            .header(USER_ID_HEADER, header_id.to_string())
            .body(())
            .unwrap();
        assert_eq!(extract(request).await.unwrap(), Caller(header_id));

        let request = Request::builder()
            .uri(format!("/api/chats?limit=5&user_id={query_id}"))
            .body(())
            .unwrap();
        assert_eq!(extract(request).await.unwrap(), Caller(query_id));
    }

    #[tokio::test]
    async fn missing_or_malformed_identity_is_rejected() {
        let missing = extract(Request::builder().uri("/api/chats").body(()).unwrap()).await;
        assert_eq!(missing.unwrap_err().status(), StatusCode::UNAUTHORIZED);

        let malformed = Request::builder()
            .uri("/api/chats")
            .header(USER_ID_HEADER, "not-a-uuid")
            .body(())
            .unwrap();
        assert_eq!(extract(malformed).await.unwrap_err().status(), StatusCode::BAD_REQUEST);
    }
}
