use axum::{
    Json, Router,
    body::{Body, to_bytes},
    extract::FromRequestParts,
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode, Uri, header, request::Parts},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{Duration, Utc};
use clap_blog::{
    Authenticator, InMemoryRepository, PasswordHasher, TokenCodec,
    auth::{AuthError, AuthUser, RegisterError, auth_middleware, authorize, bearer_token, require_admin},
    errors::ApiError,
    models::{Identity, RegisterRequest, Role},
    repository::{Repository, RepositoryState},
    token::Claims,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

// --- Helper Functions ---

const TEST_JWT_SECRET: &[u8] = b"auth-test-secret-0123456789abcdef";

// Minimum Argon2 cost keeps the suite fast.
fn cheap_hasher() -> PasswordHasher {
    PasswordHasher::new(8, 1).unwrap()
}

fn authenticator() -> (Authenticator, Arc<InMemoryRepository>) {
    let repo = Arc::new(InMemoryRepository::new());
    let state: RepositoryState = repo.clone();
    (Authenticator::new(state, cheap_hasher()).unwrap(), repo)
}

fn register_request(username: &str, password: &str) -> RegisterRequest {
    RegisterRequest {
        name: "Test User".to_string(),
        username: username.to_string(),
        password: password.to_string(),
        photo: None,
    }
}

fn identity(role: Role) -> Identity {
    Identity {
        id: 11,
        username: "bob".to_string(),
        name: "Bob".to_string(),
        photo: String::new(),
        role,
    }
}

fn claims(role: Role) -> Claims {
    let now = Utc::now().timestamp();
    Claims {
        sub: 11,
        username: "bob".to_string(),
        name: "Bob".to_string(),
        avatar: String::new(),
        role,
        iat: now,
        exp: now + 3600,
    }
}

/// Helper to get the mutable Parts struct from a generated Request
fn get_request_parts(method: Method, uri: Uri) -> Parts {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let (parts, _) = request.into_parts();
    parts
}

async fn whoami(AuthUser(claims): AuthUser) -> Json<Value> {
    Json(serde_json::json!({ "sub": claims.sub, "role": claims.role }))
}

/// A minimal router: `/whoami` behind the access middleware, `/admin` behind
/// the access middleware plus the role gate.
fn protected_router(codec: TokenCodec) -> Router {
    let admin = Router::new()
        .route("/admin", get(whoami))
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn_with_state(codec.clone(), auth_middleware));

    Router::new()
        .route("/whoami", get(whoami))
        .route_layer(middleware::from_fn_with_state(codec, auth_middleware))
        .merge(admin)
}

async fn call(router: Router, path: &str, authorization: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().uri(path);
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    let response = router
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    read_json(response).await
}

async fn read_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

// --- bearer_token ---

#[test]
fn test_bearer_prefix_is_optional() {
    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
    assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");

    headers.insert(header::AUTHORIZATION, HeaderValue::from_static("abc.def.ghi"));
    assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");
}

#[test]
fn test_missing_or_empty_header_is_missing_token() {
    assert!(matches!(bearer_token(&HeaderMap::new()), Err(AuthError::MissingToken)));

    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
    assert!(matches!(bearer_token(&headers), Err(AuthError::MissingToken)));
}

// --- Access Middleware ---

#[tokio::test]
async fn test_middleware_passes_claims_to_handler() {
    let codec = TokenCodec::new(TEST_JWT_SECRET);
    let token = codec.issue(&identity(Role::User)).unwrap();

    let (status, body) = call(
        protected_router(codec),
        "/whoami",
        Some(&format!("Bearer {token}")),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sub"], 11);
    assert_eq!(body["role"], "user");
}

#[tokio::test]
async fn test_middleware_rejects_missing_header() {
    let codec = TokenCodec::new(TEST_JWT_SECRET);
    let (status, body) = call(protected_router(codec), "/whoami", None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "missing_token");
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_middleware_rejects_garbage_token() {
    let codec = TokenCodec::new(TEST_JWT_SECRET);
    let (status, body) = call(protected_router(codec), "/whoami", Some("Bearer garbage")).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "malformed_token");
}

#[tokio::test]
async fn test_middleware_rejects_expired_token() {
    let codec = TokenCodec::new(TEST_JWT_SECRET);
    let token = codec
        .issue_at(&identity(Role::User), Utc::now() - Duration::hours(30))
        .unwrap();

    let (status, body) = call(
        protected_router(codec),
        "/whoami",
        Some(&format!("Bearer {token}")),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "token_expired");
}

#[tokio::test]
async fn test_middleware_rejects_foreign_signature() {
    let foreign = TokenCodec::new(b"a-completely-different-signing-key");
    let token = foreign.issue(&identity(Role::Admin)).unwrap();

    let codec = TokenCodec::new(TEST_JWT_SECRET);
    let (status, body) = call(
        protected_router(codec),
        "/admin",
        Some(&format!("Bearer {token}")),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_signature");
}

// --- Role Gate ---

#[test]
fn test_authorize_predicate() {
    assert!(authorize(Some(&claims(Role::Admin)), Role::Admin).is_ok());
    assert!(authorize(Some(&claims(Role::User)), Role::User).is_ok());
    assert!(matches!(
        authorize(Some(&claims(Role::User)), Role::Admin),
        Err(AuthError::Forbidden)
    ));
    assert!(matches!(authorize(None, Role::Admin), Err(AuthError::Forbidden)));
    assert!(matches!(authorize(None, Role::User), Err(AuthError::Forbidden)));
}

#[tokio::test]
async fn test_admin_route_forbids_user_and_admits_admin() {
    let codec = TokenCodec::new(TEST_JWT_SECRET);
    let user_token = codec.issue(&identity(Role::User)).unwrap();
    let admin_token = codec.issue(&identity(Role::Admin)).unwrap();
    let router = protected_router(codec);

    let (status, body) = call(router.clone(), "/admin", Some(&format!("Bearer {user_token}"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, body) = call(router.clone(), "/admin", Some(&format!("Bearer {admin_token}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "admin");

    // No token at all is an authentication failure, not an authorization one.
    let (status, _) = call(router, "/admin", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// --- AuthUser Extractor ---

#[tokio::test]
async fn test_extractor_reads_claims_from_extensions() {
    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    parts.extensions.insert(claims(Role::User));

    let AuthUser(found) = AuthUser::from_request_parts(&mut parts, &()).await.unwrap();
    assert_eq!(found.sub, 11);
}

#[tokio::test]
async fn test_extractor_ignores_raw_header_without_middleware() {
    let codec = TokenCodec::new(TEST_JWT_SECRET);
    let token = codec.issue(&identity(Role::Admin)).unwrap();

    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    parts.headers.insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    );

    let rejection = AuthUser::from_request_parts(&mut parts, &()).await.unwrap_err();
    assert_eq!(rejection.into_response().status(), StatusCode::UNAUTHORIZED);
}

// --- Authenticator ---

#[tokio::test]
async fn test_register_then_authenticate() {
    let (auth, repo) = authenticator();
    let user = auth
        .register(register_request("alice", "correct-horse"))
        .await
        .unwrap();

    assert_eq!(user.role, Role::User);
    assert_ne!(user.password_hash, "correct-horse");
    assert!(user.password_hash.starts_with("$argon2id$"));

    let identity = auth.authenticate("alice", "correct-horse").await.unwrap();
    assert_eq!(identity.id, user.id);
    assert_eq!(identity.role, Role::User);

    // Authentication is read-only.
    let stored = repo.get_user(user.id).await.unwrap().unwrap();
    assert_eq!(stored.updated_at, user.updated_at);
}

#[tokio::test]
async fn test_wrong_password_and_unknown_user_look_the_same() {
    let (auth, _repo) = authenticator();
    auth.register(register_request("alice", "correct-horse"))
        .await
        .unwrap();

    let wrong_password = auth.authenticate("alice", "wrongpass").await.unwrap_err();
    assert!(matches!(wrong_password, AuthError::InvalidCredential));

    let unknown_user = auth.authenticate("mallory", "wrongpass").await.unwrap_err();
    assert!(matches!(unknown_user, AuthError::NotFound));

    let (status_a, body_a) = read_json(ApiError::from(wrong_password).into_response()).await;
    let (status_b, body_b) = read_json(ApiError::from(unknown_user).into_response()).await;
    assert_eq!(status_a, StatusCode::UNAUTHORIZED);
    assert_eq!(status_a, status_b);
    assert_eq!(body_a, body_b);
}

#[tokio::test]
async fn test_authenticate_is_case_sensitive_and_rejects_empty_input() {
    let (auth, _repo) = authenticator();
    auth.register(register_request("alice", "correct-horse"))
        .await
        .unwrap();

    assert!(matches!(
        auth.authenticate("Alice", "correct-horse").await,
        Err(AuthError::NotFound)
    ));
    assert!(matches!(
        auth.authenticate("", "correct-horse").await,
        Err(AuthError::InvalidCredential)
    ));
    assert!(matches!(
        auth.authenticate("alice", "").await,
        Err(AuthError::InvalidCredential)
    ));
}

#[tokio::test]
async fn test_register_validation() {
    let (auth, repo) = authenticator();

    assert!(matches!(
        auth.register(register_request("   ", "long-enough-pw")).await,
        Err(RegisterError::EmptyUsername)
    ));
    assert!(matches!(
        auth.register(register_request("carol", "short")).await,
        Err(RegisterError::PasswordTooShort)
    ));
    // Length is counted in characters, not bytes.
    assert!(matches!(
        auth.register(register_request("dave", "пароль1")).await,
        Err(RegisterError::PasswordTooShort)
    ));
    assert!(auth.register(register_request("dave", "пароль12")).await.is_ok());

    assert!(matches!(
        auth.register(register_request("dave", "another-password")).await,
        Err(RegisterError::UsernameTaken)
    ));
    assert_eq!(repo.count_users().await.unwrap(), 1);
}

#[tokio::test]
async fn test_register_trims_username() {
    let (auth, _repo) = authenticator();
    let user = auth
        .register(register_request("  erin ", "long-enough-pw"))
        .await
        .unwrap();
    assert_eq!(user.username, "erin");
    assert!(auth.authenticate("erin", "long-enough-pw").await.is_ok());
}

#[test]
fn test_password_hasher_rejects_garbage_hash() {
    let hasher = cheap_hasher();
    let hash = hasher.hash("s3cret-pass").unwrap();
    assert!(hasher.verify("s3cret-pass", &hash));
    assert!(!hasher.verify("s3cret-pasS", &hash));
    assert!(!hasher.verify("s3cret-pass", "not-a-phc-string"));

    // Same input, fresh salt.
    assert_ne!(hash, hasher.hash("s3cret-pass").unwrap());
}
