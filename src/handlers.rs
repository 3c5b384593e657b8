use crate::{
    AppState,
    auth::AuthUser,
    claps::ClapService,
    errors::ApiError,
    models::{
        ClapResponse, ClapTotalResponse, LoginRequest, LoginResponse, LoginUser, Pagination, Post,
        RegisterRequest, Role, SessionProfile, UpdateRoleRequest, UserPage, UserResponse,
    },
    repository::RepositoryState,
};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
};
use serde::Deserialize;

/// Upper bound on `per_page` for listings.
pub const MAX_PER_PAGE: i64 = 100;
const DEFAULT_PER_PAGE: i64 = 10;

// --- Filter Structs ---

/// PageParams
///
/// Query parameters for paginated listings. Both default when omitted.
#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageParams {
    /// 1-based page number.
    pub page: Option<i64>,
    /// Page size, capped at 100.
    pub per_page: Option<i64>,
}

// --- Handlers ---

/// register_user
///
/// [Public Route] Creates a `user`-role account. The response never carries the password hash.
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Registered", body = UserResponse),
        (status = 400, description = "Empty username, short password, duplicate username or malformed body")
    )
)]
pub async fn register_user(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let Json(request) = payload?;
    let user = state.authenticator.register(request).await?;
    Ok(Json(UserResponse::from(user)))
}

/// login
///
/// [Public Route] Exchanges a username and password for a 24-hour bearer token.
/// Unknown usernames and wrong passwords get the same 401.
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 400, description = "Malformed body or empty fields"),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(request) = payload?;
    if request.username.is_empty() || request.password.is_empty() {
        return Err(ApiError::BadRequest(
            "username and password are required".to_string(),
        ));
    }

    let identity = state
        .authenticator
        .authenticate(&request.username, &request.password)
        .await?;

    let token = state
        .tokens
        .issue(&identity)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    tracing::info!(user_id = identity.id, "session issued");

    Ok(Json(LoginResponse {
        token,
        user: LoginUser {
            id: identity.id,
            name: identity.name,
            username: identity.username,
            photo: identity.photo,
        },
    }))
}

/// clap_post
///
/// [Authenticated Route] Adds one clap from the caller to the post.
/// Takes no body; the increment is always one.
#[utoipa::path(
    post,
    path = "/posts/{id}/clap",
    params(("id" = i64, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Clapped", body = ClapResponse),
        (status = 400, description = "Post ID is not an integer"),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "Post not found"),
        (status = 503, description = "Counter contention, retry later")
    ),
    security(("bearer" = []))
)]
pub async fn clap_post(
    AuthUser(claims): AuthUser,
    State(claps): State<ClapService>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<ClapResponse>, ApiError> {
    let Path(post_id) = path?;
    let tally = claps.applaud(claims.subject_id(), post_id, 1).await?;
    Ok(Json(ClapResponse::from(tally)))
}

/// get_post_claps
///
/// [Public Route] The post's total applause.
#[utoipa::path(
    get,
    path = "/posts/{id}/claps",
    params(("id" = i64, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Total claps", body = ClapTotalResponse),
        (status = 400, description = "Post ID is not an integer"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn get_post_claps(
    State(claps): State<ClapService>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<ClapTotalResponse>, ApiError> {
    let Path(post_id) = path?;
    let total = claps.get_claps(post_id).await?;
    Ok(Json(ClapTotalResponse { claps: total }))
}

/// get_post
///
/// [Public Route] A single post, including its current `claps_total`.
#[utoipa::path(
    get,
    path = "/posts/{id}",
    params(("id" = i64, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Found", body = Post),
        (status = 400, description = "Post ID is not an integer"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn get_post(
    State(repo): State<RepositoryState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<Post>, ApiError> {
    let Path(id) = path?;
    repo.get_post(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Post"))
}

/// get_me
///
/// [Authenticated Route] The caller's session profile, straight from the verified token.
#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Profile", body = SessionProfile),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer" = []))
)]
pub async fn get_me(AuthUser(claims): AuthUser) -> Json<SessionProfile> {
    Json(SessionProfile {
        id: claims.sub,
        username: claims.username,
        name: claims.name,
        avatar: claims.avatar,
        role: claims.role,
        expires_at: claims.exp,
    })
}

/// update_user_role
///
/// [Admin Route] Promotes or demotes a user. Takes effect at the user's next login,
/// since existing tokens carry the role they were issued with.
#[utoipa::path(
    put,
    path = "/users/{id}/role",
    params(("id" = i64, Path, description = "User ID")),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = UserResponse),
        (status = 400, description = "Invalid role value or non-integer user ID"),
        (status = 403, description = "Caller is not an admin"),
        (status = 404, description = "User not found")
    ),
    security(("bearer" = []))
)]
pub async fn update_user_role(
    AuthUser(admin): AuthUser,
    State(repo): State<RepositoryState>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<UpdateRoleRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let Path(user_id) = path?;
    let Json(request) = payload?;
    let role: Role = request
        .role
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid role value".to_string()))?;

    let user = repo
        .set_user_role(user_id, role)
        .await?
        .ok_or(ApiError::NotFound("User"))?;

    tracing::info!(admin_id = admin.sub, user_id, %role, "user role updated");
    Ok(Json(UserResponse::from(user)))
}

/// list_users
///
/// [Admin Route] Paginated user listing, newest first.
#[utoipa::path(
    get,
    path = "/users",
    params(PageParams),
    responses(
        (status = 200, description = "Users", body = UserPage),
        (status = 400, description = "Invalid page or per_page"),
        (status = 403, description = "Caller is not an admin")
    ),
    security(("bearer" = []))
)]
pub async fn list_users(
    State(repo): State<RepositoryState>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<UserPage>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let page = params.page.unwrap_or(1);
    if page < 1 {
        return Err(ApiError::BadRequest("Invalid page number".to_string()));
    }
    let per_page = params.per_page.unwrap_or(DEFAULT_PER_PAGE);
    if per_page < 1 {
        return Err(ApiError::BadRequest("Invalid per_page number".to_string()));
    }
    let per_page = per_page.min(MAX_PER_PAGE);

    let count = repo.count_users().await?;
    let users = repo
        .list_users(per_page, (page - 1).saturating_mul(per_page))
        .await?;

    Ok(Json(UserPage {
        data: users.into_iter().map(UserResponse::from).collect(),
        pagination: Pagination::new(count, page, per_page),
    }))
}
