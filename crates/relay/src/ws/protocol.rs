use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use taskman_common::protocol::ws::{encode_envelope, EventEnvelope};

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("websocket send failed: {0}")]
    Transport(#[from] axum::Error),
}

pub async fn send_envelope(socket: &mut WebSocket, envelope: &EventEnvelope) -> Result<(), SendError> {
    let encoded = encode_envelope(envelope)?;
    socket.send(Message::Text(encoded.into())).await?;
    Ok(())
}

pub async fn close_frame_too_large(socket: &mut WebSocket, reason: String) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame { code: close_code::SIZE, reason: reason.into() })))
        .await;
}

pub async fn close_membership_revoked(socket: &mut WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: "membership revoked".into(),
        })))
        .await;
}

pub fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
}
