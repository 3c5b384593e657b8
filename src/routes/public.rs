use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without a session: the credential gateway (register,
/// login) and read-only post data.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for load balancers; answers "ok" without touching storage.
        .route("/health", get(|| async { "ok" }))
        // POST /register
        // Creates a `user`-role account from a username and an 8+ character password.
        .route("/register", post(handlers::register_user))
        // POST /login
        // Verifies credentials and issues a 24-hour bearer token.
        .route("/login", post(handlers::login))
        // GET /posts/{id}
        .route("/posts/{id}", get(handlers::get_post))
        // GET /posts/{id}/claps
        // The post-wide applause total.
        .route("/posts/{id}/claps", get(handlers::get_post_claps))
}
