use alumnet_core::auth::AuthError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Handshake failures. Returned before the upgrade, so the client never
/// sees a socket.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("missing bearer token")]
    MissingToken,
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            GatewayError::MissingToken | GatewayError::Auth(AuthError::MissingCredentials) => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Authentication token required".to_string(),
            ),
            GatewayError::Auth(AuthError::TokenExpired) => (
                StatusCode::UNAUTHORIZED,
                "token_expired",
                "Authentication token expired".to_string(),
            ),
            GatewayError::Auth(AuthError::InvalidToken) => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Authentication token invalid".to_string(),
            ),
            GatewayError::Auth(AuthError::Internal(e)) => {
                tracing::error!("gateway auth internal error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}
