use std::env;

use thiserror::Error;

/// Default listen address, matching the port the blog frontend expects.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8386";

/// Minimum signing key length accepted in production (256 bits for HS256).
pub const MIN_PRODUCTION_SECRET_LEN: usize = 32;

/// AppConfig
///
/// Holds the application's entire configuration state. Loaded once at startup
/// and never mutated afterwards; it is pulled into handlers and middleware via
/// `FromRef` as part of the shared `AppState`.
#[derive(Clone)]
pub struct AppConfig {
    // Database connection string (Postgres).
    pub db_url: String,
    // Runtime environment marker. Selects log format and secret policy.
    pub env: Env,
    // Symmetric key used to sign and verify session tokens.
    pub jwt_secret: String,
    // Socket address the HTTP server binds to.
    pub bind_addr: String,
    // Argon2 memory cost in KiB.
    pub password_hash_memory_kib: u32,
    // Argon2 iteration count.
    pub password_hash_iterations: u32,
}

/// Env
///
/// Defines the runtime context: pretty logs and relaxed secret length for
/// local development, JSON logs and a strict secret policy in production.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Env {
    Local,
    Production,
}

/// Reasons the process refuses to start.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} must be a positive integer (got {value:?})")]
    InvalidNumber { name: &'static str, value: String },

    #[error("JWT_SECRET must be at least {min} bytes in production")]
    WeakSecret { min: usize },
}

// Manual impl so the signing key never lands in a log line.
impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("jwt_secret", &"[REDACTED]")
            .field("password_hash_memory_kib", &self.password_hash_memory_kib)
            .field("password_hash_iterations", &self.password_hash_iterations)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    /// new
    ///
    /// Builds a local-mode configuration from explicit values, with the
    /// default bind address and hashing cost. Used by tests and tooling that
    /// do not read the process environment.
    pub fn new(db_url: impl Into<String>, jwt_secret: impl Into<String>) -> Self {
        Self {
            db_url: db_url.into(),
            env: Env::Local,
            jwt_secret: jwt_secret.into(),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            password_hash_memory_kib: argon2::Params::DEFAULT_M_COST,
            password_hash_iterations: argon2::Params::DEFAULT_T_COST,
        }
    }

    /// load
    ///
    /// Reads every parameter from environment variables. The signing key is
    /// mandatory in every environment; it is never compiled into the binary.
    ///
    /// # Errors
    /// Returns a `ConfigError` when a required variable is missing, a numeric
    /// variable does not parse, or the production secret is too short.
    pub fn load() -> Result<Self, ConfigError> {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };

        let db_url = required("DATABASE_URL")?;
        let jwt_secret = required("JWT_SECRET")?;

        if env == Env::Production && jwt_secret.len() < MIN_PRODUCTION_SECRET_LEN {
            return Err(ConfigError::WeakSecret {
                min: MIN_PRODUCTION_SECRET_LEN,
            });
        }

        Ok(Self {
            db_url,
            env,
            jwt_secret,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            password_hash_memory_kib: positive_number(
                "PASSWORD_HASH_MEMORY_KIB",
                argon2::Params::DEFAULT_M_COST,
            )?,
            password_hash_iterations: positive_number(
                "PASSWORD_HASH_ITERATIONS",
                argon2::Params::DEFAULT_T_COST,
            )?,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn positive_number(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => match value.trim().parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ConfigError::InvalidNumber { name, value }),
        },
    }
}
