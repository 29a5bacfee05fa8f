//! WebSocket entry point: `GET /v1/ws?org_id=<uuid>&token=<jwt>`.
//!
//! Identity, tenant and membership are all settled before the upgrade is
//! accepted, so a socket only ever exists for an admitted member.

mod handler;
pub mod protocol;

use std::sync::Arc;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    auth::{jwt::AccessTokenVerifier, middleware::bearer_token_from_headers},
    error::{request_id_from_headers_or_generate, with_request_id_scope, ErrorCode, RelayError},
    hub::{BoardHub, HubError},
    validation::MAX_WS_FRAME_BYTES,
};

pub const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;

#[derive(Clone)]
pub struct WsState {
    verifier: Arc<AccessTokenVerifier>,
    hub: Arc<BoardHub>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    org_id: Option<String>,
    token: Option<String>,
}

pub fn router(verifier: Arc<AccessTokenVerifier>, hub: Arc<BoardHub>) -> Router {
    Router::new().route("/v1/ws", get(ws_upgrade)).with_state(WsState { verifier, hub })
}

async fn ws_upgrade(
    State(state): State<WsState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let token = bearer_token_from_headers(&headers)
        .or_else(|| params.token.as_deref().map(str::trim).filter(|token| !token.is_empty()));
    let Some(actor) = token.and_then(|token| state.verifier.verify(token).ok()) else {
        return RelayError::from_code(ErrorCode::AuthInvalidToken).into_response();
    };

    let Some(org_id) = params.org_id.as_deref().and_then(|raw| Uuid::parse_str(raw.trim()).ok())
    else {
        return RelayError::from_code(ErrorCode::InvalidTenant).into_response();
    };

    match state.hub.admit(&actor, org_id).await {
        Ok(()) => {}
        Err(HubError::NotAMember { .. }) => {
            info!(user_id = %actor.user_id, org_id = %org_id, "rejected websocket for non-member");
            return RelayError::from_code(ErrorCode::NotAMember).into_response();
        }
        Err(HubError::Authz(error)) => {
            error!(error = ?error, user_id = %actor.user_id, org_id = %org_id, "failed to check membership");
            return RelayError::from_code(ErrorCode::InternalError).into_response();
        }
    }

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let request_id = request_id_from_headers_or_generate(&headers);
    let hub = Arc::clone(&state.hub);
    upgrade
        .max_frame_size(MAX_WS_FRAME_BYTES)
        .max_message_size(MAX_WS_FRAME_BYTES)
        .on_upgrade(move |socket| async move {
            with_request_id_scope(request_id, handler::handle_socket(hub, actor, org_id, socket))
                .await;
        })
}
