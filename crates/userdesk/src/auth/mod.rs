//! Authentication module.
//!
//! Resolves the caller's identity from an HS256 JWT (bearer header or
//! `auth_token` cookie), with a dev bypass through the `X-Dev-User` header.

mod claims;
mod config;
mod error;
mod middleware;

pub use claims::{ADMIN_ROLE, Claims};
pub use config::{AuthConfig, ConfigValidationError, DevUser};
pub use error::AuthError;
pub(crate) use middleware::cookie_value;
pub use middleware::{AuthState, CurrentUser, RequireAdmin, auth_middleware};
