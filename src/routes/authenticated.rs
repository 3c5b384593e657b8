use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Authenticated Router Module
///
/// Routes for any caller holding a valid session token. `create_router` wraps
/// this router in `auth::auth_middleware`, so every handler here can take the
/// `AuthUser` extractor and trust what it yields.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /me
        // The caller's profile as recorded in their token.
        .route("/me", get(handlers::get_me))
        // POST /posts/{id}/clap
        // One clap from the caller. Per-user and post-wide counters move together.
        .route("/posts/{id}/clap", post(handlers::clap_post))
}
