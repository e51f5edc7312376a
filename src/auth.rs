use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{error::ApiError, server::Emulator};

fn bearer_token<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Rejects requests without a live access token in `Authorization: Bearer`.
pub async fn require_bearer<B>(State(emulator): State<Arc<Emulator>>, req: Request<B>, next: Next<B>) -> Response {
    let token = match bearer_token(&req) {
        Some(token) => token,
        None => {
            return ApiError::Unauthorized(
                "missing access token. Provide Authorization: Bearer <token>".to_string(),
            )
            .into_response()
        }
    };

    match emulator.tokens.validate(token) {
        Ok(true) => next.run(req).await,
        Ok(false) => {
            tracing::warn!(path = %req.uri().path(), "Invalid or expired access token presented");
            ApiError::Unauthorized("invalid or expired access token".to_string()).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_bearer_token_extraction() {
        let req = Request::builder()
            .header(header::AUTHORIZATION, "Bearer abc123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req), Some("abc123"));

        let req = Request::builder()
            .header(header::AUTHORIZATION, "Basic abc123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req), None);

        let req = Request::builder()
            .header(header::AUTHORIZATION, "Bearer   ")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req), None);
    }
}
