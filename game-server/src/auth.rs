//! The auth boundary: extracts a [`UserId`] from a bearer JWT. Token
//! issuance itself is out of scope (spec.md §1) — this module only
//! validates and decodes tokens minted elsewhere.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use protocol::UserId;

use crate::state::AppState;

/// Shape of the HS256 JWT described in spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Successful extraction of an authenticated caller, usable both by the
/// JSON-RPC handlers and the SSE stream endpoint.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

#[derive(Debug)]
pub struct AuthRejected;

impl IntoResponse for AuthRejected {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, "authentication required").into_response()
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthRejected;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthRejected)?;

        let token = header.strip_prefix("Bearer ").ok_or(AuthRejected)?;

        let claims = decode_claims(token, &state.config.jwt_secret).map_err(|_| AuthRejected)?;
        Ok(AuthUser(UserId::from(claims.sub)))
    }
}

fn decode_claims(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_for(user_id: &str, secret: &str, exp_offset_secs: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            user_id: user_id.to_owned(),
            email: format!("{user_id}@example.com"),
            name: user_id.to_owned(),
            iss: "game-server".to_owned(),
            sub: user_id.to_owned(),
            iat: now,
            exp: now + exp_offset_secs,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn decodes_a_well_formed_token() {
        let token = token_for("alice", "secret", 3600);
        let claims = decode_claims(&token, "secret").unwrap();
        assert_eq!(claims.sub, "alice");
    }

    #[test]
    fn rejects_expired_token() {
        let token = token_for("alice", "secret", -3600);
        assert!(decode_claims(&token, "secret").is_err());
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = token_for("alice", "secret", 3600);
        assert!(decode_claims(&token, "other-secret").is_err());
    }
}
