use std::{sync::Arc, time::Duration};

use axum::extract::ws::{Message, WebSocket};
use taskman_common::types::Actor;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    protocol::{
        close_frame_too_large, close_membership_revoked, is_frame_size_violation, send_envelope,
    },
    HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS,
};
use crate::{
    error::{current_request_id, ErrorCode},
    hub::{BoardHub, FrameOutcome},
    validation::{check_ws_frame_size, MAX_WS_FRAME_BYTES},
};

/// Drive one admitted connection from registration to close.
///
/// The socket task is the single writer for its connection: envelopes routed
/// by the hub arrive on the outbound queue and are written here in order.
pub(super) async fn handle_socket(hub: Arc<BoardHub>, actor: Actor, org_id: Uuid, mut socket: WebSocket) {
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_string());
    let (mut session, mut outbound) = hub.register(actor, org_id).await;
    session.activate();

    // Ping every interval; a ping left unanswered past the timeout closes
    // the connection.
    let mut heartbeat = tokio::time::interval(Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    heartbeat.reset();
    let heartbeat_timeout = Duration::from_millis(HEARTBEAT_TIMEOUT_MS);
    let mut awaiting_pong_since: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if awaiting_pong_since.is_some_and(|sent| sent.elapsed() > heartbeat_timeout) {
                    warn!(
                        connection_id = %session.id(),
                        org_id = %org_id,
                        request_id = %request_id,
                        "heartbeat timeout, disconnecting"
                    );
                    break;
                }
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong_since.get_or_insert_with(Instant::now);
            }
            () = session.revoked() => {
                debug!(connection_id = %session.id(), org_id = %org_id, "membership revoked, disconnecting");
                // Flush what was queued before the eviction, the notice included.
                while let Ok(envelope) = outbound.try_recv() {
                    if send_envelope(&mut socket, &envelope).await.is_err() {
                        break;
                    }
                }
                close_membership_revoked(&mut socket).await;
                break;
            }
            maybe_envelope = outbound.recv() => {
                let Some(envelope) = maybe_envelope else {
                    break;
                };
                if let Err(error) = send_envelope(&mut socket, &envelope).await {
                    warn!(
                        connection_id = %session.id(),
                        code = ErrorCode::TransportError.as_str(),
                        error = %error,
                        "failed to write envelope"
                    );
                    break;
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw)) => {
                        if let Err(reason) = check_ws_frame_size(raw.len()) {
                            close_frame_too_large(&mut socket, reason).await;
                            break;
                        }
                        log_outcome(&session.id(), hub.handle_client_frame(&session, raw.as_str()).await);
                    }
                    Ok(Message::Binary(payload)) => {
                        if let Err(reason) = check_ws_frame_size(payload.len()) {
                            close_frame_too_large(&mut socket, reason).await;
                            break;
                        }
                        let raw = String::from_utf8_lossy(&payload);
                        log_outcome(&session.id(), hub.handle_client_frame(&session, &raw).await);
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        awaiting_pong_since = None;
                    }
                    Ok(Message::Close(_)) => break,
                    Err(error) => {
                        if is_frame_size_violation(&error) {
                            close_frame_too_large(
                                &mut socket,
                                format!("frame exceeds limit of {MAX_WS_FRAME_BYTES} bytes"),
                            )
                            .await;
                        } else {
                            warn!(
                                connection_id = %session.id(),
                                code = ErrorCode::TransportError.as_str(),
                                error = %error,
                                "websocket transport failed"
                            );
                        }
                        break;
                    }
                }
            }
        }
    }

    hub.close(&mut session).await;
}

fn log_outcome(connection_id: &Uuid, outcome: FrameOutcome) {
    match outcome {
        FrameOutcome::Routed(report) => debug!(
            connection_id = %connection_id,
            delivered = report.delivered,
            pruned = report.pruned,
            "client frame routed"
        ),
        FrameOutcome::Ignored => debug!(connection_id = %connection_id, "client frame ignored"),
        FrameOutcome::Rejected(code) => {
            debug!(connection_id = %connection_id, code, "client frame rejected")
        }
    }
}
