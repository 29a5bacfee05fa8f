use crate::{
    auth::jwt::AccessTokenVerifier,
    error::{ErrorCode, RelayError},
};
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use taskman_common::types::Actor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: uuid::Uuid,
    pub email: String,
}

impl AuthenticatedUser {
    pub fn actor(&self) -> Actor {
        Actor::new(self.user_id, self.email.clone())
    }
}

impl From<Actor> for AuthenticatedUser {
    fn from(actor: Actor) -> Self {
        Self { user_id: actor.user_id, email: actor.email }
    }
}

pub async fn require_bearer_auth(
    State(verifier): State<Arc<AccessTokenVerifier>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token_from_headers(request.headers()) else {
        return unauthorized_response("missing bearer token");
    };

    let actor = match verifier.verify(token) {
        Ok(actor) => actor,
        Err(_) => return unauthorized_response("invalid bearer token"),
    };

    request.extensions_mut().insert(AuthenticatedUser::from(actor));

    next.run(request).await
}

pub fn bearer_token_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()).and_then(extract_bearer_token)
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}

fn unauthorized_response(message: &'static str) -> Response {
    RelayError::new(ErrorCode::AuthInvalidToken, message).into_response()
}
