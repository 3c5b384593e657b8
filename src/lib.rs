use axum::{
    Router,
    extract::FromRef,
    http::HeaderName,
    middleware,
};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Identity and engagement core.
pub mod auth;
pub mod claps;
pub mod password;
pub mod token;

// Application plumbing.
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod repository;

// Module for routing segregation (Public, Authenticated, Admin).
pub mod routes;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use auth::Authenticator;
pub use claps::ClapService;
pub use config::AppConfig;
pub use password::PasswordHasher;
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};
pub use token::TokenCodec;

/// ApiDoc
///
/// Auto-generated OpenAPI document, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::register_user, handlers::login, handlers::clap_post,
        handlers::get_post_claps, handlers::get_post, handlers::get_me,
        handlers::update_user_role, handlers::list_users
    ),
    components(
        schemas(
            models::Role, models::Post, models::Clap, models::LoginRequest,
            models::RegisterRequest, models::UpdateRoleRequest, models::UserResponse,
            models::LoginUser, models::LoginResponse, models::ClapResponse,
            models::ClapTotalResponse, models::SessionProfile, models::Pagination,
            models::UserPage,
        )
    ),
    modifiers(&BearerSecurity),
    tags(
        (name = "clap-blog", description = "Blog identity and applause API")
    )
)]
struct ApiDoc;

/// Registers the `bearer` security scheme referenced by protected paths.
struct BearerSecurity;

impl Modify for BearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// AppState
///
/// The single, immutable container of shared services, cloned into every
/// request. Nothing in it is mutated after startup; the only shared mutable
/// state lives behind the repository.
#[derive(Clone)]
pub struct AppState {
    /// Credential store and post/clap storage.
    pub repo: RepositoryState,
    /// Session token issuer/verifier holding the signing key.
    pub tokens: TokenCodec,
    pub authenticator: Authenticator,
    /// The engagement counter.
    pub claps: ClapService,
    /// The loaded environment configuration.
    pub config: AppConfig,
}

impl AppState {
    /// new
    ///
    /// Wires every service from the repository and configuration. Fails only if
    /// the configured Argon2 parameters are rejected.
    pub fn new(
        repo: RepositoryState,
        config: AppConfig,
    ) -> Result<Self, password::PasswordHashError> {
        let hasher = PasswordHasher::new(
            config.password_hash_memory_kib,
            config.password_hash_iterations,
        )?;
        Ok(Self {
            tokens: TokenCodec::new(config.jwt_secret.as_bytes()),
            authenticator: Authenticator::new(repo.clone(), hasher)?,
            claps: ClapService::new(repo.clone()),
            repo,
            config,
        })
    }
}

// --- Axum FromRef Extractor Implementations ---

// Let handlers and middleware pull only the piece of state they need.

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for TokenCodec {
    fn from_ref(app_state: &AppState) -> TokenCodec {
        app_state.tokens.clone()
    }
}

impl FromRef<AppState> for ClapService {
    fn from_ref(app_state: &AppState) -> ClapService {
        app_state.claps.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles the routing structure, applies scoped auth layers and the global
/// observability stack, and registers the application state.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Base Router Assembly
    let base_router = Router::new()
        // Documentation: Serve the auto-generated Swagger UI.
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Public Routes: No middleware applied.
        .merge(public::public_routes())
        // Authenticated Routes: token verified once, claims stored in extensions.
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth::auth_middleware,
            )),
        )
        // Admin Routes: the later `route_layer` is the outer one, so the token
        // is checked before the role.
        .merge(
            admin::admin_routes()
                .route_layer(middleware::from_fn(auth::require_admin))
                .route_layer(middleware::from_fn_with_state(
                    state.clone(),
                    auth::auth_middleware,
                )),
        )
        .with_state(state);

    // 3. Observability and Correlation Layers
    base_router
        .layer(
            ServiceBuilder::new()
                // 3a. Request ID Generation.
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                // 3b. Request Tracing: one span per request, tagged with the request id.
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                // 3c. Request ID Propagation back to the client.
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        // 4. CORS Layer
        .layer(cors)
}

/// trace_span_logger
///
/// Builds the per-request span so every log line of one request shares its
/// `x-request-id`. The `Authorization` header is never recorded.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
