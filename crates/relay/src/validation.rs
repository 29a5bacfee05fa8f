// Input validation helpers.
//
// - `ValidatedJson<T>` extractor: content-type check + serde, rejected as
//   VALIDATION_FAILED instead of axum's plain-text rejections.
// - Field rules for board names and descriptions.
// - Id lists of bulk moves.
// - WebSocket frame size limit.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use uuid::Uuid;

use crate::error::{ErrorCode, RelayError};

/// Maximum WebSocket frame payload in bytes (256 KiB).
pub const MAX_WS_FRAME_BYTES: usize = 256 * 1024;

/// Maximum REST request body in bytes (1 MiB).
pub const MAX_REST_BODY_BYTES: usize = 1024 * 1024;

pub const NAME_MIN_CHARS: usize = 2;
pub const NAME_MAX_CHARS: usize = 100;
pub const DESCRIPTION_MAX_CHARS: usize = 500;
pub const MAX_BULK_ITEMS: usize = 100;

pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidatedJson(value)),
            Err(rejection) => {
                let (message, details) = classify_json_rejection(&rejection);
                Err(RelayError::new(ErrorCode::ValidationFailed, message)
                    .with_details(details)
                    .into_response())
            }
        }
    }
}

fn classify_json_rejection(rejection: &JsonRejection) -> (String, serde_json::Value) {
    match rejection {
        JsonRejection::JsonDataError(e) => {
            (format!("invalid JSON payload: {e}"), json!({ "kind": "data_error" }))
        }
        JsonRejection::JsonSyntaxError(e) => {
            (format!("malformed JSON: {e}"), json!({ "kind": "syntax_error" }))
        }
        JsonRejection::MissingJsonContentType(_) => (
            "expected Content-Type: application/json".to_string(),
            json!({ "kind": "missing_content_type" }),
        ),
        JsonRejection::BytesRejection(e) => {
            (format!("request body error: {e}"), json!({ "kind": "body_error" }))
        }
        other => (format!("request body error: {other}"), json!({ "kind": "unknown" })),
    }
}

/// Names are trimmed before counting and must hold 2 to 100 characters.
pub fn validate_name(field: &'static str, value: &str) -> Result<String, RelayError> {
    let trimmed = value.trim();
    let chars = trimmed.chars().count();
    if !(NAME_MIN_CHARS..=NAME_MAX_CHARS).contains(&chars) {
        return Err(field_error(
            field,
            format!("{field} must be between {NAME_MIN_CHARS} and {NAME_MAX_CHARS} characters"),
        ));
    }
    Ok(trimmed.to_owned())
}

pub fn validate_description(value: &str) -> Result<String, RelayError> {
    if value.chars().count() > DESCRIPTION_MAX_CHARS {
        return Err(field_error(
            "description",
            format!("description must be at most {DESCRIPTION_MAX_CHARS} characters"),
        ));
    }
    Ok(value.to_owned())
}

fn field_error(field: &'static str, message: String) -> RelayError {
    RelayError::new(ErrorCode::ValidationFailed, message)
        .with_details(json!({ "kind": "field", "field": field }))
}

/// Returns a close reason when a frame exceeds the limit.
pub fn check_ws_frame_size(len: usize) -> Result<(), String> {
    if len > MAX_WS_FRAME_BYTES {
        Err(format!("frame size {len} bytes exceeds limit of {MAX_WS_FRAME_BYTES} bytes"))
    } else {
        Ok(())
    }
}

/// Bulk id lists must be non-empty and bounded. Repeated ids collapse to
/// their first occurrence.
pub fn validate_bulk_ids(field: &'static str, ids: Vec<Uuid>) -> Result<Vec<Uuid>, RelayError> {
    if ids.is_empty() {
        return Err(RelayError::new(ErrorCode::ValidationFailed, format!("{field} must not be empty")));
    }

    let mut unique = Vec::with_capacity(ids.len());
    for id in ids {
        if !unique.contains(&id) {
            unique.push(id);
        }
    }
    if unique.len() > MAX_BULK_ITEMS {
        return Err(RelayError::new(
            ErrorCode::ValidationFailed,
            format!("{field} accepts at most {MAX_BULK_ITEMS} ids"),
        ));
    }
    Ok(unique)
}
