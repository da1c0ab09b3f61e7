//! Role data models.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Role id to display label, ordered by id.
pub type RolesList = BTreeMap<i64, String>;

/// Role entity from database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub created_at: String,
}

/// Request to create a new role.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    pub display_name: Option<String>,
}

impl CreateRoleRequest {
    /// Label shown in forms; falls back to the role name.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.name)
    }
}
