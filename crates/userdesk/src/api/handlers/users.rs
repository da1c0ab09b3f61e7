//! User management handlers (admin only).

use axum::{
    Json,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use minijinja::context;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

use super::{
    BoundUser, USER_DELETED, USER_SAVED, USER_UPDATED, back_with_error, not_found_redirect,
    render, role_options,
};
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::api::validation::{Validate, ValidatedForm};
use crate::api::web::{Flash, PreviousUrl, RequestMode, redirect_with_flash};
use crate::auth::RequireAdmin;
use crate::user::{CreateUserInput, UpdateUserInput, User, UserListQuery, UserRow};

const DEFAULT_PAGE_LENGTH: i64 = 10;
const MAX_PAGE_LENGTH: i64 = 100;

/// Tabular listing parameters. Empty strings count as absent so the plain
/// filter form can submit "All roles".
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListParams {
    pub draw: i64,
    pub start: i64,
    pub length: Option<String>,
    pub search: Option<String>,
    pub role: Option<String>,
}

impl ListParams {
    fn length(&self) -> i64 {
        parse_opt(&self.length)
            .unwrap_or(DEFAULT_PAGE_LENGTH)
            .clamp(1, MAX_PAGE_LENGTH)
    }

    fn search(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn role(&self) -> Option<i64> {
        parse_opt(&self.role)
    }

    fn to_query(&self) -> UserListQuery {
        UserListQuery {
            search: self.search(),
            role: self.role(),
            limit: Some(self.length()),
            offset: Some(self.start.max(0)),
        }
    }
}

fn parse_opt(value: &Option<String>) -> Option<i64> {
    value.as_deref().map(str::trim).and_then(|v| v.parse().ok())
}

/// Attach role labels to a page of users.
async fn user_rows(state: &AppState, users: Vec<User>) -> ApiResult<Vec<UserRow>> {
    let ids: Vec<String> = users.iter().map(|u| u.id.clone()).collect();
    let mut labels = state.roles.labels_for_users(&ids).await?;

    Ok(users
        .into_iter()
        .map(|user| UserRow {
            roles: labels.remove(&user.id).unwrap_or_default(),
            id: user.id,
            name: user.name,
            email: user.email,
            created_at: user.created_at,
        })
        .collect())
}

/// List users: JSON rows for AJAX tables, the index page otherwise.
#[instrument(skip(state, flash))]
pub async fn index(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    mode: RequestMode,
    flash: Flash,
    Query(params): Query<ListParams>,
) -> ApiResult<Response> {
    let roles = state.roles.get_roles_list().await?;
    let query = params.to_query();

    let total = state.users.count(&UserListQuery::default()).await?;
    let filtered = state.users.count(&query).await?;
    let rows = user_rows(&state, state.users.list(&query).await?).await?;

    match mode {
        RequestMode::Ajax => Ok(Json(json!({
            "draw": params.draw,
            "recordsTotal": total,
            "recordsFiltered": filtered,
            "data": rows,
        }))
        .into_response()),
        RequestMode::Page => render(
            &state,
            "users/index.html",
            context! {
                roles => role_options(&roles),
                rows => rows,
                total => filtered,
                search => params.search(),
                role_filter => params.role(),
            },
            &flash,
        ),
    }
}

/// Show the create form.
pub async fn create(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    flash: Flash,
) -> ApiResult<Response> {
    let roles = state.roles.get_roles_list().await?;
    render(
        &state,
        "users/create.html",
        context! { roles => role_options(&roles) },
        &flash,
    )
}

/// Persist a new user.
#[instrument(skip(state, input), fields(email = %input.email))]
pub async fn store(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    back: PreviousUrl,
    ValidatedForm(input): ValidatedForm<CreateUserInput>,
) -> Response {
    let old = input.old_input();

    match state.users.store(input).await {
        Ok(user) => {
            info!(user_id = %user.id, by = %admin.display_name(), "User saved");
            redirect_with_flash("/users", Flash::success(USER_SAVED))
        }
        Err(err) => back_with_error(&back.or("/users/create"), &err, old),
    }
}

/// Show a single user.
#[instrument(skip(state, flash))]
pub async fn show(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<String>,
    flash: Flash,
) -> ApiResult<Response> {
    let Some(user) = state.users.find(&id).await? else {
        return Ok(not_found_redirect());
    };

    let role_labels = state
        .roles
        .labels_for_users(std::slice::from_ref(&user.id))
        .await?
        .remove(&user.id)
        .unwrap_or_default();

    render(
        &state,
        "users/show.html",
        context! { user => user, role_labels => role_labels },
        &flash,
    )
}

/// Show the edit form, or the user as JSON for AJAX callers.
///
/// AJAX callers always get `{success: true, data, message}`, with `data`
/// null for an unknown id. Page callers are redirected to the list instead.
#[instrument(skip(state, flash))]
pub async fn edit(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<String>,
    mode: RequestMode,
    flash: Flash,
) -> ApiResult<Response> {
    let user = state.users.find(&id).await?;

    if mode.is_ajax() {
        return Ok(Json(json!({
            "success": true,
            "data": user,
            "message": "",
        }))
        .into_response());
    }

    let Some(user) = user else {
        return Ok(not_found_redirect());
    };

    let roles = state.roles.get_roles_list().await?;
    let selected_roles = state.roles.role_ids_for_user(&user.id).await?;

    render(
        &state,
        "users/edit.html",
        context! {
            user => user,
            roles => role_options(&roles),
            selected_roles => selected_roles,
        },
        &flash,
    )
}

/// Update a user and replace its roles.
#[instrument(skip(state, user, input), fields(user_id = %user.id))]
pub async fn update(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    BoundUser(user): BoundUser,
    back: PreviousUrl,
    ValidatedForm(input): ValidatedForm<UpdateUserInput>,
) -> Response {
    let old = input.old_input();

    match state.users.update(&user.id, input).await {
        Ok(updated) => {
            info!(user_id = %updated.id, by = %admin.display_name(), "User updated");
            redirect_with_flash("/users", Flash::success(USER_UPDATED))
        }
        Err(err) => back_with_error(&back.or(&format!("/users/{}/edit", user.id)), &err, old),
    }
}

/// Delete a user.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn destroy(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    BoundUser(user): BoundUser,
) -> ApiResult<Json<serde_json::Value>> {
    state.users.delete(&user.id).await?;
    info!(user_id = %user.id, by = %admin.display_name(), "User deleted");

    Ok(Json(json!({
        "success": true,
        "message": USER_DELETED,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_params_defaults() {
        let query = ListParams::default().to_query();
        assert_eq!(query.limit, Some(DEFAULT_PAGE_LENGTH));
        assert_eq!(query.offset, Some(0));
        assert!(query.search.is_none());
        assert!(query.role.is_none());
    }

    #[test]
    fn test_list_params_clamp_and_blank_filters() {
        let params = ListParams {
            draw: 3,
            start: -5,
            length: Some("500".to_string()),
            search: Some("  ".to_string()),
            role: Some(String::new()),
        };
        let query = params.to_query();
        assert_eq!(query.limit, Some(MAX_PAGE_LENGTH));
        assert_eq!(query.offset, Some(0));
        assert!(query.search.is_none());
        assert!(query.role.is_none());

        let params = ListParams {
            length: Some("0".to_string()),
            search: Some(" ali ".to_string()),
            role: Some("2".to_string()),
            ..ListParams::default()
        };
        let query = params.to_query();
        assert_eq!(query.limit, Some(1));
        assert_eq!(query.search.as_deref(), Some("ali"));
        assert_eq!(query.role, Some(2));
    }
}
