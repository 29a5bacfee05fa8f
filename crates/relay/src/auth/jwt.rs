//! Verification of the HS256 access tokens minted by the account service.
//! The relay never issues tokens of its own.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use taskman_common::types::Actor;
use uuid::Uuid;

pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("jwt secret must be at least {MIN_SECRET_LEN} characters long")]
    SecretTooShort,
    #[error("access token rejected: {0}")]
    Rejected(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Uuid,
    email: String,
}

#[derive(Clone)]
pub struct AccessTokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl AccessTokenVerifier {
    pub fn new(secret: &str) -> Result<Self, TokenError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(TokenError::SecretTooShort);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self { key: DecodingKey::from_secret(secret.as_bytes()), validation })
    }

    /// The actor a valid token speaks for. A subject that is not a UUID is
    /// rejected along with bad signatures and expired tokens.
    pub fn verify(&self, token: &str) -> Result<Actor, TokenError> {
        let claims = decode::<Claims>(token, &self.key, &self.validation)?.claims;
        Ok(Actor::new(claims.sub, claims.email))
    }
}
