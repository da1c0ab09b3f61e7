//! User data models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User entity from database.
///
/// `role_ids` is not a column; the repository fills it from `role_user`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: String,
    pub updated_at: String,
    #[sqlx(skip)]
    #[serde(default)]
    pub role_ids: Vec<i64>,
}

/// Row shown in the user listing.
#[derive(Debug, Clone, Serialize)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub roles: Vec<String>,
    pub created_at: String,
}

/// Submitted body of the create-user form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateUserInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_confirmation: String,
    #[serde(default)]
    pub roles: Vec<i64>,
}

/// Submitted body of the edit-user form. An empty password keeps the current one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUserInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_confirmation: Option<String>,
    #[serde(default)]
    pub roles: Vec<i64>,
}

/// Submitted body of the own-profile form.
///
/// Has no roles field, so role reassignment cannot come through this form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProfileInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_confirmation: Option<String>,
}

/// Returns the password only when one was actually typed.
pub(crate) fn provided_password(password: &Option<String>) -> Option<&str> {
    password.as_deref().filter(|p| !p.is_empty())
}

/// User list query parameters.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UserListQuery {
    /// Matches name or email.
    pub search: Option<String>,
    /// Only users holding this role.
    pub role: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Values written by an insert.
#[derive(Debug, Clone)]
pub(crate) struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role_ids: Vec<i64>,
}

/// Column changes for an update. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub(crate) struct UserChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
}
