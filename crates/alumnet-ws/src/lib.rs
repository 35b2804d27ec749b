mod dispatch;
mod error;
mod handler;
mod session;

pub use error::GatewayError;
pub use session::Session;

use alumnet_core::{auth, AppState};
use axum::{
    extract::{ws::WebSocketUpgrade, FromRequestParts, Query, State},
    http::{header, request::Parts},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;

pub fn gateway_router() -> Router<AppState> {
    Router::new().route("/socket", get(ws_upgrade))
}

/// The identity a gateway handshake authenticated as.
#[derive(Debug, Clone)]
pub struct GatewayIdentity(pub String);

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Bearer token from the `Authorization` header, falling back to the
/// `token` query parameter for browser clients that cannot set headers on
/// a WebSocket handshake.
fn bearer_token(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    if from_header.is_some() {
        return from_header;
    }
    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|t| !t.trim().is_empty())
}

impl FromRequestParts<AppState> for GatewayIdentity {
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(GatewayError::MissingToken)?;
        let user_id = auth::verify_bearer(&token, &state.config.jwt_secret).map_err(|e| {
            tracing::debug!("gateway handshake rejected: {e}");
            GatewayError::Auth(e)
        })?;
        Ok(GatewayIdentity(user_id))
    }
}

async fn ws_upgrade(
    GatewayIdentity(user_id): GatewayIdentity,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handler::handle_connection(socket, state, user_id))
}
