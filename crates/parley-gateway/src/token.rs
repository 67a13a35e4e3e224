use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};

use parley_types::api::Claims;
use parley_types::models::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("token is malformed")]
    Malformed,
    #[error("token has expired")]
    Expired,
    #[error("token signature does not verify")]
    BadSignature,
}

impl AuthError {
    /// Short machine-readable reason sent to rejected clients.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::Expired => "expired",
            Self::BadSignature => "bad_signature",
        }
    }
}

/// Verify `token` against `secret` and return the identity it carries.
///
/// Expiry is checked against `now` rather than the system clock, so this is a
/// pure function of its inputs.
pub fn validate(token: &str, secret: &str, now: DateTime<Utc>) -> Result<Identity, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => AuthError::BadSignature,
        _ => AuthError::Malformed,
    })?;

    if now.timestamp() >= data.claims.exp {
        return Err(AuthError::Expired);
    }

    Ok(Identity {
        id: data.claims.sub,
        username: data.claims.username,
    })
}

/// Sign a token for `identity`, valid from `now` for `ttl`.
pub fn issue(
    secret: &str,
    identity: &Identity,
    now: DateTime<Utc>,
    ttl: Duration,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: identity.id,
        username: identity.username.clone(),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
