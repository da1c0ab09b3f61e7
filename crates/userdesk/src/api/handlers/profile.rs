//! Own-profile handlers for any authenticated user.

use axum::{extract::State, response::Response};
use minijinja::context;
use serde_json::Map;
use tracing::{info, instrument};

use super::{PROFILE_UPDATED, back_with_error, not_found_redirect, render};
use crate::api::state::AppState;
use crate::api::validation::{Validate, ValidatedForm};
use crate::api::web::{Flash, PreviousUrl, redirect_with_flash};
use crate::auth::CurrentUser;
use crate::user::{UpdateProfileInput, UserError};

/// Show the profile form for the caller. Renders an empty form when the
/// identity has no matching user row.
#[instrument(skip(state, current, flash), fields(user_id = %current.id()))]
pub async fn edit(
    State(state): State<AppState>,
    current: CurrentUser,
    back: PreviousUrl,
    flash: Flash,
) -> Response {
    let user = state.users.find_without_fail(current.id()).await;

    match render(&state, "profile/edit.html", context! { user => user }, &flash) {
        Ok(response) => response,
        Err(err) => back_with_error(
            &back.or("/users"),
            &UserError::storage(err.to_string()),
            Map::new(),
        ),
    }
}

/// Update the caller's own profile. The target is always the caller.
#[instrument(skip(state, current, input), fields(user_id = %current.id()))]
pub async fn update(
    State(state): State<AppState>,
    current: CurrentUser,
    back: PreviousUrl,
    ValidatedForm(input): ValidatedForm<UpdateProfileInput>,
) -> Response {
    let Some(user) = state.users.find_without_fail(current.id()).await else {
        return not_found_redirect();
    };

    let old = input.old_input();

    match state.users.update_profile(&user.id, input).await {
        Ok(updated) => {
            info!(user_id = %updated.id, "Profile updated");
            redirect_with_flash("/users", Flash::success(PROFILE_UPDATED))
        }
        Err(err) => back_with_error(&back.or("/profile/edit"), &err, old),
    }
}
