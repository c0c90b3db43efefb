//! Bearer-token authentication.
//!
//! Callers present `Authorization: Bearer <jwt>`. Tokens are HS256-signed
//! with `AUTH_SECRET`; the `sub` claim is the user id that owns every row
//! the request reads or writes.

mod middleware;

pub use middleware::AuthUser;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// JWT claims accepted by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Expiry, seconds since the Unix epoch
    pub exp: u64,
}

/// Verify `token` and return its claims.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )?;
    Ok(data.claims)
}

/// Sign a token for `user_id` that expires at `exp` (seconds).
pub fn issue_token(
    secret: &str,
    user_id: &str,
    exp: u64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}
