//! HS256 access tokens issued by the identity provider.
//!
//! The token carries the caller's id, roles and channel. Ban status is not
//! in the token; it is read from the database on every request.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use gatehouse_core::job::CallerChannel;
use gatehouse_core::types::DbId;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// The user's database id.
    pub sub: DbId,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Tokens without a channel are treated as web UI sessions.
    #[serde(default = "default_channel")]
    pub channel: CallerChannel,
    pub exp: i64,
    pub iat: i64,
}

fn default_channel() -> CallerChannel {
    CallerChannel::WebUi
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    /// Lifetime of tokens minted by [`generate_token`].
    pub expiry_mins: i64,
}

/// Mint a token for `user_id`. Used by tooling and tests; production
/// tokens come from the identity provider.
pub fn generate_token(
    user_id: DbId,
    roles: &[String],
    channel: CallerChannel,
    config: &JwtConfig,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id,
        roles: roles.to_vec(),
        channel,
        exp: now + config.expiry_mins * 60,
        iat: now,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
}

/// Check signature and expiry and return the claims.
pub fn validate_token(token: &str, config: &JwtConfig) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}
