//! Room join tokens

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    pub room: String,
    pub room_join: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinClaims {
    pub iss: String, // API key
    pub sub: String, // Participant identity
    pub nbf: i64,
    pub exp: i64,
    pub video: VideoGrant,
}

impl JoinClaims {
    /// Claims for joining `room` as `identity`, valid from now for `ttl`
    pub fn new(api_key: &str, room: &str, identity: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            iss: api_key.to_string(),
            sub: identity.to_string(),
            nbf: now.timestamp(),
            exp: (now + ttl).timestamp(),
            video: VideoGrant {
                room: room.to_string(),
                room_join: true,
            },
        }
    }
}

/// Mint an HS256 token granting `identity` access to `room`
pub fn mint_join_token(
    api_key: &str,
    api_secret: &str,
    room: &str,
    identity: &str,
    ttl: Duration,
) -> Result<String> {
    let claims = JoinClaims::new(api_key, room, identity, ttl);

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(api_secret.as_bytes()),
    )?;

    Ok(token)
}

/// Verify a join token and return its claims
pub fn decode_join_token(token: &str, api_secret: &str) -> Result<JoinClaims> {
    let mut validation = Validation::default();
    validation.validate_nbf = true;

    let token_data = decode::<JoinClaims>(
        token,
        &DecodingKey::from_secret(api_secret.as_bytes()),
        &validation,
    )?;

    Ok(token_data.claims)
}
