//! Role repository for database operations.

use std::collections::HashMap;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use super::models::{CreateRoleRequest, Role, RolesList};

/// Repository for role database operations.
#[derive(Debug, Clone)]
pub struct RoleRepository {
    pool: SqlitePool,
}

impl RoleRepository {
    /// Create a new role repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Role id to display label for every role, for filters and form selects.
    #[instrument(skip(self))]
    pub async fn get_roles_list(&self) -> Result<RolesList> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, display_name FROM roles ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch roles list")?;

        Ok(rows.into_iter().collect())
    }

    /// List all roles.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>(
            "SELECT id, name, display_name, created_at FROM roles ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list roles")?;

        Ok(roles)
    }

    /// Get a role by ID.
    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(
            "SELECT id, name, display_name, created_at FROM roles WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch role")?;

        Ok(role)
    }

    /// Create a new role.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create(&self, request: CreateRoleRequest) -> Result<Role> {
        debug!("Creating role: {}", request.name);

        let result = sqlx::query("INSERT INTO roles (name, display_name) VALUES (?, ?)")
            .bind(&request.name)
            .bind(request.label())
            .execute(&self.pool)
            .await
            .with_context(|| format!("Role '{}' already exists or could not be inserted", request.name))?;

        self.get(result.last_insert_rowid())
            .await?
            .ok_or_else(|| anyhow::anyhow!("Role not found after creation"))
    }

    /// Role ids currently assigned to a user, ascending and without duplicates.
    #[instrument(skip(self))]
    pub async fn role_ids_for_user(&self, user_id: &str) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT DISTINCT role_id FROM role_user WHERE user_id = ? ORDER BY role_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch user roles")?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Role names assigned to a user. These go into issued tokens.
    #[instrument(skip(self))]
    pub async fn names_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT r.name
            FROM role_user ru
            JOIN roles r ON r.id = ru.role_id
            WHERE ru.user_id = ?
            ORDER BY r.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch role names")?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Role labels per user for a page of users.
    #[instrument(skip(self, user_ids), fields(count = user_ids.len()))]
    pub async fn labels_for_users(&self, user_ids: &[String]) -> Result<HashMap<String, Vec<String>>> {
        let mut labels: HashMap<String, Vec<String>> = HashMap::new();
        if user_ids.is_empty() {
            return Ok(labels);
        }

        let placeholders = vec!["?"; user_ids.len()].join(", ");
        let sql = format!(
            r#"
            SELECT ru.user_id, r.display_name
            FROM role_user ru
            JOIN roles r ON r.id = ru.role_id
            WHERE ru.user_id IN ({})
            ORDER BY r.id
            "#,
            placeholders
        );

        let mut query_builder = sqlx::query_as::<_, (String, String)>(&sql);
        for id in user_ids {
            query_builder = query_builder.bind(id);
        }

        let rows = query_builder
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch role labels")?;

        for (user_id, label) in rows {
            labels.entry(user_id).or_default().push(label);
        }

        Ok(labels)
    }
}
