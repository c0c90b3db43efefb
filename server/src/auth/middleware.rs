//! Authentication extractor.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Authenticated user extracted from request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The `sub` claim of the verified token
    pub user_id: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let token = match auth_header {
            Some(header) => header
                .strip_prefix("Bearer ")
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .ok_or_else(|| {
                    AppError::Unauthorized("Invalid authorization header format".to_string())
                })?,
            None => {
                return Err(AppError::Unauthorized(
                    "Missing authorization header".to_string(),
                ))
            }
        };

        let claims = super::verify_token(&state.config.auth_secret, token)
            .map_err(|e| AppError::Unauthorized(format!("Invalid token: {e}")))?;

        if claims.sub.is_empty() {
            return Err(AppError::Unauthorized("Token has no subject".to_string()));
        }

        Ok(AuthUser {
            user_id: claims.sub,
        })
    }
}
