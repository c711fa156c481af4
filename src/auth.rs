//! Token extraction and validation for presence sessions
//!
//! Tokens are signed JWTs (HS256) carrying the user id in a `userId` claim.
//! Only validation lives here; issuance belongs to the auth server.

use crate::{Error, Result};
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;

const BEARER_PREFIX: &str = "Bearer ";
const TOKEN_COOKIE: &str = "token";

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(rename = "userId")]
    user_id: String,
}

/// Validates session tokens against the shared HS256 secret.
pub struct TokenValidator {
    key: DecodingKey,
    validation: Validation,
}

impl TokenValidator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is enforced when present; tokens are not required to carry
        // registered claims beyond the userId payload.
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Validate a token and return the user id it carries.
    pub fn validate(&self, token: &str) -> Result<String> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)?;
        if data.claims.user_id.is_empty() {
            return Err(Error::Auth("token carries an empty userId".to_string()));
        }
        Ok(data.claims.user_id)
    }
}

/// Extract the bearer token from a connection request.
///
/// Precedence: `Authorization: Bearer` header, then the `token` query
/// parameter, then the `token` cookie.
pub fn extract_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix(BEARER_PREFIX) {
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    if let Some(token) = query_token.filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    cookie_token(headers)
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        if parts.next() == Some(TOKEN_COOKIE) {
            let value = parts.next().unwrap_or("");
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}
