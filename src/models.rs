use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;

// --- Identity & Roles ---

/// Role
///
/// The RBAC label carried by every user record and every session token.
/// Serialized lowercase ("user" / "admin") both in JSON and in the `users.role` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a role label is neither "user" nor "admin".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid role value: {0:?}")]
pub struct InvalidRole(pub String);

impl FromStr for Role {
    type Err = InvalidRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(InvalidRole(other.to_string())),
        }
    }
}

/// User
///
/// The canonical user record as held by the credential store.
/// Deliberately not `Serialize`: responses go through `UserResponse`, which has no hash field.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub username: String,
    // PHC-formatted Argon2id hash.
    pub password_hash: String,
    pub photo: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// NewUser
///
/// Insert payload for the credential store. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub username: String,
    pub password_hash: String,
    pub photo: String,
    pub role: Role,
}

/// Identity
///
/// A verified caller, as produced by the authenticator and consumed by the session issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub photo: String,
    pub role: Role,
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Identity {
            id: user.id,
            username: user.username.clone(),
            name: user.name.clone(),
            photo: user.photo.clone(),
            role: user.role,
        }
    }
}

// --- Posts & Claps ---

/// Post
///
/// A blog post as seen by the core: only the fields needed to render it and
/// the aggregate applause counter `claps_total`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Post {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub content: String,
    pub image: String,
    pub pinned: bool,
    // Invariant: equals the sum of `claps.count` for this post.
    pub claps_total: i64,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// Clap
///
/// One engagement record per (user, post) pair. `count` only grows.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, PartialEq, Eq)]
#[ts(export)]
pub struct Clap {
    pub user_id: i64,
    pub post_id: i64,
    pub count: i64,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// ClapTally
///
/// Both counters as committed by a single applaud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClapTally {
    pub user_claps: i64,
    pub claps_total: i64,
}

// --- Request Payloads (Input Schemas) ---

/// LoginRequest
///
/// Input payload for `POST /login`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    #[schema(example = "alice")]
    pub username: String,
    pub password: String,
}

/// RegisterRequest
///
/// Input payload for `POST /register`. The password is hashed before it touches storage
/// and is never echoed back.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RegisterRequest {
    pub name: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub photo: Option<String>,
}

/// UpdateRoleRequest
///
/// Input payload for `PUT /users/{id}/role`. Kept as a raw string so an unknown
/// value can be reported as a 400 with a clear message instead of a generic body rejection.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateRoleRequest {
    #[schema(example = "admin")]
    pub role: String,
}

// --- Responses (Output Schemas) ---

/// UserResponse
///
/// Public projection of a user record.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserResponse {
    pub id: i64,
    pub name: String,
    pub username: String,
    pub photo: String,
    pub role: Role,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id,
            name: user.name,
            username: user.username,
            photo: user.photo,
            role: user.role,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// LoginUser
///
/// The user summary returned alongside a fresh token.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginUser {
    pub id: i64,
    pub name: String,
    pub username: String,
    pub photo: String,
}

/// LoginResponse
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginResponse {
    pub token: String,
    pub user: LoginUser,
}

/// ClapResponse
///
/// Output of `POST /posts/{id}/clap`: the post total plus the caller's own count.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ClapResponse {
    pub claps: i64,
    pub user_claps: i64,
}

impl From<ClapTally> for ClapResponse {
    fn from(tally: ClapTally) -> Self {
        ClapResponse {
            claps: tally.claps_total,
            user_claps: tally.user_claps,
        }
    }
}

/// ClapTotalResponse
///
/// Output of `GET /posts/{id}/claps`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ClapTotalResponse {
    pub claps: i64,
}

/// SessionProfile
///
/// Output of `GET /me`, read straight from the verified session claim (no storage round trip).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SessionProfile {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub avatar: String,
    pub role: Role,
    /// Unix seconds after which the current token is rejected.
    pub expires_at: i64,
}

/// Pagination
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq, Eq)]
#[ts(export)]
pub struct Pagination {
    pub count: i64,
    pub page: i64,
    pub pages: i64,
    pub per_page: i64,
}

impl Pagination {
    pub fn new(count: i64, page: i64, per_page: i64) -> Self {
        // Ceiling division; per_page is validated >= 1 by the caller.
        let pages = (count + per_page - 1) / per_page;
        Pagination {
            count,
            page,
            pages,
            per_page,
        }
    }
}

/// UserPage
///
/// Output of the admin user listing (`GET /users`).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserPage {
    pub data: Vec<UserResponse>,
    pub pagination: Pagination,
}
