use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Identity, Role};

/// How long an issued session stays valid.
pub const SESSION_TTL_HOURS: i64 = 24;

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Claims
///
/// The signed payload of every session token. This is the single identity type
/// handed to the role gate and to handlers once the access middleware has verified it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the numeric user id.
    pub sub: i64,
    pub username: String,
    /// Display name.
    pub name: String,
    /// Avatar URL.
    pub avatar: String,
    pub role: Role,
    /// Issued At, Unix seconds.
    pub iat: i64,
    /// Expiration Time, Unix seconds. The token is rejected once `now >= exp`.
    pub exp: i64,
}

impl Claims {
    pub fn subject_id(&self) -> i64 {
        self.sub
    }
}

/// Why a bearer string was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,

    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenError::InvalidSignature,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Malformed,
        }
    }
}

/// Failure to produce a token. Only reachable if claim serialization fails.
#[derive(Debug, Error)]
#[error("failed to sign session token: {0}")]
pub struct IssueError(#[from] jsonwebtoken::errors::Error);

/// TokenCodec
///
/// Issues and verifies HS256 session tokens with a key fixed at construction.
/// Cloning is cheap (shared keys) and a clone can never observe a different key.
#[derive(Clone)]
pub struct TokenCodec {
    keys: Arc<Keys>,
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenCodec {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        // Expiry is checked by `decode_at` against an explicit clock, with no leeway.
        validation.validate_exp = false;
        validation.leeway = 0;
        // `sub` is numeric here, so its presence is enforced by deserializing `Claims`.
        validation.set_required_spec_claims(&["exp"]);

        Self {
            keys: Arc::new(Keys {
                encoding: EncodingKey::from_secret(secret),
                decoding: DecodingKey::from_secret(secret),
                validation,
            }),
        }
    }

    /// Signs a session for `identity` valid for the next 24 hours.
    pub fn issue(&self, identity: &Identity) -> Result<String, IssueError> {
        self.issue_at(identity, Utc::now())
    }

    pub fn issue_at(&self, identity: &Identity, now: DateTime<Utc>) -> Result<String, IssueError> {
        let issued_at = now.timestamp();
        let claims = Claims {
            sub: identity.id,
            username: identity.username.clone(),
            name: identity.name.clone(),
            avatar: identity.photo.clone(),
            role: identity.role,
            iat: issued_at,
            exp: issued_at + Duration::hours(SESSION_TTL_HOURS).num_seconds(),
        };
        self.sign(&claims)
    }

    /// Signs a caller-built claim set as-is, with no lifetime applied.
    pub fn sign(&self, claims: &Claims) -> Result<String, IssueError> {
        Ok(encode(&Header::new(ALGORITHM), claims, &self.keys.encoding)?)
    }

    /// Verifies `token` against the current time.
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        self.decode_at(token, Utc::now())
    }

    /// Verifies signature first, then expiry against `now`.
    pub fn decode_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.keys.decoding, &self.keys.validation)?;
        if now.timestamp() >= data.claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(data.claims)
    }
}
