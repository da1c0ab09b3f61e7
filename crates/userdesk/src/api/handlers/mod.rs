//! HTTP handlers.

pub mod profile;
pub mod users;

use axum::{
    Json,
    extract::{FromRequestParts, Path},
    http::request::Parts,
    response::Response,
};
use minijinja::{Value, context};
use serde::Serialize;
use serde_json::Map;
use tracing::warn;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use super::web::{self, FieldErrors, Flash, redirect_with_flash};
use crate::role::RolesList;
use crate::user::{User, UserError};

pub(crate) const USER_SAVED: &str = "User saved successfully.";
pub(crate) const USER_UPDATED: &str = "User updated successfully.";
pub(crate) const USER_DELETED: &str = "User deleted successfully.";
pub(crate) const PROFILE_UPDATED: &str = "Profile updated successfully.";
pub(crate) const USER_NOT_FOUND: &str = "User not found";

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// User resolved from the `{id}` path segment. Unknown ids are a 404.
#[derive(Debug, Clone)]
pub struct BoundUser(pub User);

impl FromRequestParts<AppState> for BoundUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;

        state
            .users
            .find(&id)
            .await?
            .map(BoundUser)
            .ok_or_else(|| ApiError::not_found(USER_NOT_FOUND))
    }
}

/// A role as offered by the role pickers.
#[derive(Debug, Serialize)]
struct RoleOption<'a> {
    id: i64,
    label: &'a str,
}

fn role_options(roles: &RolesList) -> Vec<RoleOption<'_>> {
    roles
        .iter()
        .map(|(id, label)| RoleOption { id: *id, label })
        .collect()
}

/// Render `template` with the flash-derived variables merged into `ctx`.
fn render(state: &AppState, template: &str, ctx: Value, flash: &Flash) -> ApiResult<Response> {
    let ctx = context! {
        flash => flash,
        errors => &flash.errors,
        old => &flash.old,
        ..ctx
    };

    let html = state.views.render(template, ctx)?;

    Ok(web::page(html, flash))
}

/// Redirect back to the form with `err` as a form error and `old` as input.
fn back_with_error(back: &str, err: &UserError, old: Map<String, serde_json::Value>) -> Response {
    warn!(kind = err.kind.as_str(), error = %err, "Operation failed");

    let mut errors = FieldErrors::new();
    errors.insert("error".to_string(), vec![err.message().to_string()]);
    redirect_with_flash(back, Flash::form_errors(errors, old))
}

fn not_found_redirect() -> Response {
    redirect_with_flash("/users", Flash::error(USER_NOT_FOUND))
}
