//! Session token extraction for user-facing routes.

use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Uri};
use serde::Deserialize;

use growbot_core::ids::UserId;

use crate::api::ApiError;
use crate::server::AppState;

/// The authenticated caller. Browsers cannot set headers on a WebSocket
/// handshake, so `?token=` is accepted alongside `Authorization: Bearer`.
#[derive(Clone, Copy, Debug)]
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .or_else(|| query_token(&parts.uri))
            .ok_or(ApiError::Unauthorized)?;
        state
            .sessions
            .resolve(&token)
            .await?
            .map(AuthUser)
            .ok_or(ApiError::Unauthorized)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn query_token(uri: &Uri) -> Option<String> {
    let Query(q) = Query::<TokenQuery>::try_from_uri(uri).ok()?;
    q.token.filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_header_is_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn other_schemes_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert!(bearer_token(&headers).is_none());
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(bearer_token(&headers).is_none());
    }

    #[test]
    fn token_from_query() {
        let uri: Uri = "/stream?token=t0k".parse().unwrap();
        assert_eq!(query_token(&uri).as_deref(), Some("t0k"));
        let uri: Uri = "/stream".parse().unwrap();
        assert!(query_token(&uri).is_none());
        let uri: Uri = "/stream?token=".parse().unwrap();
        assert!(query_token(&uri).is_none());
    }
}
