//! HTTP API module.
//!
//! Routes, extractors and handlers for user management and the own-profile
//! pages.

mod error;
mod handlers;
mod routes;
mod state;
mod validation;
mod web;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
pub use validation::{Validate, ValidatedForm};
pub use web::{FLASH_COOKIE, FieldErrors, Flash, PreviousUrl, RequestMode};
