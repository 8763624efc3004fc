use axum::{
    extract::FromRequestParts,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};

use crate::{AppState, service};

// Axum extractor guarding the admin routes
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = match parts.headers.get(AUTHORIZATION) {
            Some(header) => {
                let value = header.to_str().map_err(|_| {
                    (StatusCode::UNAUTHORIZED, "Invalid Authorization header").into_response()
                })?;
                // Check if it's a Bearer token
                let token = value.strip_prefix("Bearer ").ok_or_else(|| {
                    (
                        StatusCode::UNAUTHORIZED,
                        "Invalid Authorization header format",
                    )
                        .into_response()
                })?;
                Some(token)
            }
            None => None,
        };

        // no configured token means the admin surface is open
        service::authorize_admin(state, token)
            .map(|_| AdminAuth)
            .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid admin token").into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::Database;
    use axum::http::Request;

    fn state_with_token(token: Option<&str>) -> AppState {
        let config = Config {
            admin_token: token.map(str::to_string),
            ..Config::default()
        };
        AppState::new(config, Database::open_in_memory().unwrap())
    }

    async fn extract(state: &AppState, header: Option<&str>) -> Result<AdminAuth, StatusCode> {
        let mut builder = Request::builder().uri("/admin/pending");
        if let Some(header) = header {
            builder = builder.header(AUTHORIZATION, header);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        AdminAuth::from_request_parts(&mut parts, state)
            .await
            .map_err(|response| response.status())
    }

    #[tokio::test]
    async fn test_admin_token_required_when_configured() {
        let state = state_with_token(Some("s3cret"));
        assert!(extract(&state, Some("Bearer s3cret")).await.is_ok());
        assert_eq!(
            extract(&state, Some("Bearer wrong")).await.unwrap_err(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            extract(&state, Some("s3cret")).await.unwrap_err(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            extract(&state, None).await.unwrap_err(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_admin_open_without_token() {
        let state = state_with_token(None);
        assert!(extract(&state, None).await.is_ok());
        assert!(extract(&state, Some("Bearer anything")).await.is_ok());
    }
}
