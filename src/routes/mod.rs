//! Router Module Index
//!
//! Routing is split by access level so the middleware applied to each group
//! is visible in one place (`create_router`).

/// Routes open to anonymous callers.
pub mod public;

/// Routes behind the access middleware.
pub mod authenticated;

/// Routes behind the access middleware and the admin role gate.
pub mod admin;
