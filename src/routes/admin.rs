use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, put},
};

/// Admin Router Module
///
/// Routes restricted to the `admin` role. `create_router` layers
/// `auth::require_admin` inside `auth::auth_middleware` here: the token is
/// verified first (401 on failure), then the role is checked (403 on failure).
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /users?page=&per_page=
        // Paginated listing of all accounts.
        .route("/users", get(handlers::list_users))
        // PUT /users/{id}/role
        // Promotes or demotes a user; body is {"role": "admin" | "user"}.
        .route("/users/{id}/role", put(handlers::update_user_role))
}
