use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use thiserror::Error;

use crate::{
    errors::ApiError,
    models::{Identity, NewUser, RegisterRequest, Role, User},
    password::{MIN_PASSWORD_LENGTH, PasswordHashError, PasswordHasher},
    repository::{RepoError, RepositoryState},
    token::{Claims, TokenCodec, TokenError},
};

/// AuthError
///
/// Everything that can stop a caller from being identified or authorized.
/// `NotFound` and `InvalidCredential` are kept apart for logging but render the
/// same response, so a client cannot tell which usernames exist.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization token")]
    MissingToken,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("unknown username")]
    NotFound,

    #[error("invalid credentials")]
    InvalidCredential,

    #[error("access denied")]
    Forbidden,

    #[error("authentication backend failure: {0}")]
    Internal(String),
}

impl From<RepoError> for AuthError {
    fn from(err: RepoError) -> Self {
        AuthError::Internal(err.to_string())
    }
}

/// Reasons a registration is refused.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("Username cannot be empty")]
    EmptyUsername,

    #[error("Password must be at least {} characters long", MIN_PASSWORD_LENGTH)]
    PasswordTooShort,

    #[error("Username already exists")]
    UsernameTaken,

    #[error("registration failed: {0}")]
    Internal(String),
}

impl From<PasswordHashError> for RegisterError {
    fn from(err: PasswordHashError) -> Self {
        RegisterError::Internal(err.to_string())
    }
}

/// Authenticator
///
/// Turns (username, password) into a verified `Identity` using the credential
/// store and the password hasher. Also owns registration, since both sides of
/// the credential lifecycle must agree on the hashing parameters.
#[derive(Clone)]
pub struct Authenticator {
    repo: RepositoryState,
    hasher: PasswordHasher,
    // Verified against when the username is unknown, so both failure paths pay
    // for one full Argon2 run.
    dummy_hash: Arc<str>,
}

impl Authenticator {
    pub fn new(repo: RepositoryState, hasher: PasswordHasher) -> Result<Self, PasswordHashError> {
        let dummy_hash = hasher.hash("placeholder-password-for-unknown-users")?;
        Ok(Self {
            repo,
            hasher,
            dummy_hash: dummy_hash.into(),
        })
    }

    /// authenticate
    ///
    /// Read-only. Password verification runs on the blocking pool so a burst of
    /// logins cannot starve the async workers.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Identity, AuthError> {
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidCredential);
        }

        let user = self.repo.get_user_by_username(username).await?;

        let stored_hash: Arc<str> = match &user {
            Some(user) => user.password_hash.as_str().into(),
            None => self.dummy_hash.clone(),
        };
        let hasher = self.hasher.clone();
        let password = password.to_owned();
        let verified = tokio::task::spawn_blocking(move || hasher.verify(&password, &stored_hash))
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;

        match user {
            None => {
                tracing::debug!(%username, "login for unknown username");
                Err(AuthError::NotFound)
            }
            Some(_) if !verified => {
                tracing::debug!(%username, "login with wrong password");
                Err(AuthError::InvalidCredential)
            }
            Some(user) => Ok(Identity::from(&user)),
        }
    }

    /// register
    ///
    /// Validates the request, hashes the password and stores a new `user`-role
    /// account. Uniqueness is enforced by the store, not by a prior lookup.
    pub async fn register(&self, request: RegisterRequest) -> Result<User, RegisterError> {
        let username = request.username.trim().to_string();
        if username.is_empty() {
            return Err(RegisterError::EmptyUsername);
        }
        if request.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(RegisterError::PasswordTooShort);
        }

        let hasher = self.hasher.clone();
        let password = request.password;
        let password_hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| RegisterError::Internal(e.to_string()))??;

        let new_user = NewUser {
            name: request.name,
            username,
            password_hash,
            photo: request.photo.unwrap_or_default(),
            role: Role::User,
        };

        match self.repo.create_user(new_user).await {
            Ok(user) => {
                tracing::info!(user_id = user.id, username = %user.username, "user registered");
                Ok(user)
            }
            Err(RepoError::Duplicate) => Err(RegisterError::UsernameTaken),
            Err(e) => Err(RegisterError::Internal(e.to_string())),
        }
    }
}

/// bearer_token
///
/// Reads the `Authorization` header and strips an optional `Bearer ` prefix.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

/// auth_middleware
///
/// The single point where a request's identity is established. Decodes the
/// bearer token once and stores the typed `Claims` in the request extensions;
/// any failure short-circuits with a 401 before the handler runs.
pub async fn auth_middleware(
    State(tokens): State<TokenCodec>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = bearer_token(request.headers())
        .and_then(|token| tokens.decode(token).map_err(AuthError::from))
        .inspect_err(|e| tracing::debug!(error = %e, "request rejected by access middleware"))?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// authorize
///
/// The role gate: passes only when an identity is present and holds `required`.
pub fn authorize(identity: Option<&Claims>, required: Role) -> Result<(), AuthError> {
    match identity {
        Some(claims) if claims.role == required => Ok(()),
        Some(claims) => {
            tracing::warn!(user_id = claims.sub, role = %claims.role, required = %required, "role gate denied access");
            Err(AuthError::Forbidden)
        }
        None => Err(AuthError::Forbidden),
    }
}

/// require_admin
///
/// Route layer for admin-only endpoints. Must sit inside `auth_middleware`.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    authorize(request.extensions().get::<Claims>(), Role::Admin)?;
    Ok(next.run(request).await)
}

/// AuthUser
///
/// Extractor handing the verified session claim to a handler. It only reads
/// what `auth_middleware` stored; on a route without that layer it rejects
/// with `MissingToken` rather than trusting anything from the request itself.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Claims>()
            .cloned()
            .map(AuthUser)
            .ok_or_else(|| AuthError::MissingToken.into())
    }
}
