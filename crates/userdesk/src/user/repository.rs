//! User repository for database operations.

use anyhow::{Context, Result};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, instrument};

use super::models::{NewUser, User, UserChanges, UserListQuery};

const USER_COLUMNS: &str = "id, name, email, password_hash, created_at, updated_at";

/// Repository for user database operations.
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    /// Create a new user repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Generate a new user ID.
    fn generate_id() -> String {
        format!("usr_{}", nanoid::nanoid!(12))
    }

    /// Insert a user and its role assignments in one transaction.
    #[instrument(skip(self, user), fields(email = %user.email))]
    pub(crate) async fn create(&self, user: NewUser) -> Result<User> {
        let id = Self::generate_id();
        debug!("Creating user: {} ({})", user.email, id);

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query("INSERT INTO users (id, name, email, password_hash) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .execute(&mut *tx)
            .await
            .context("Failed to insert user")?;

        sync_roles(&mut tx, &id, &user.role_ids).await?;

        tx.commit().await.context("Failed to commit user insert")?;

        self.get(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("User not found after creation"))
    }

    /// Get a user by ID, with its role ids.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user")?;

        match user {
            Some(user) => Ok(Some(self.with_role_ids(user).await?)),
            None => Ok(None),
        }
    }

    /// Get a user by email, ignoring letter case.
    #[instrument(skip(self))]
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ? COLLATE NOCASE");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user by email")?;

        Ok(user)
    }

    async fn with_role_ids(&self, mut user: User) -> Result<User> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT DISTINCT role_id FROM role_user WHERE user_id = ? ORDER BY role_id",
        )
        .bind(&user.id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch user roles")?;

        user.role_ids = rows.into_iter().map(|(id,)| id).collect();
        Ok(user)
    }

    /// List users with optional filters, newest first.
    ///
    /// Role ids are not loaded here; the listing shows role labels instead.
    #[instrument(skip(self))]
    pub async fn list(&self, query: &UserListQuery) -> Result<Vec<User>> {
        let limit = query.limit.unwrap_or(100);
        let offset = query.offset.unwrap_or(0);

        let (filter, bind_values) = filter_clause(query);
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE 1=1{filter} ORDER BY created_at DESC, id LIMIT ? OFFSET ?"
        );

        let mut query_builder = sqlx::query_as::<_, User>(&sql);
        for value in &bind_values {
            query_builder = query_builder.bind(value);
        }
        query_builder = query_builder.bind(limit).bind(offset);

        let users = query_builder
            .fetch_all(&self.pool)
            .await
            .context("Failed to list users")?;

        Ok(users)
    }

    /// Count users matching the filters of `query` (paging is ignored).
    #[instrument(skip(self))]
    pub async fn count(&self, query: &UserListQuery) -> Result<i64> {
        let (filter, bind_values) = filter_clause(query);
        let sql = format!("SELECT COUNT(*) FROM users WHERE 1=1{filter}");

        let mut query_builder = sqlx::query_as::<_, (i64,)>(&sql);
        for value in &bind_values {
            query_builder = query_builder.bind(value);
        }

        let count = query_builder
            .fetch_one(&self.pool)
            .await
            .context("Failed to count users")?;

        Ok(count.0)
    }

    /// Update columns and, when `role_ids` is given, replace the role assignments.
    #[instrument(skip(self, changes, role_ids))]
    pub(crate) async fn update(
        &self,
        id: &str,
        changes: UserChanges,
        role_ids: Option<&[i64]>,
    ) -> Result<User> {
        let mut updates = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(name) = changes.name {
            updates.push("name = ?");
            values.push(name);
        }

        if let Some(email) = changes.email {
            updates.push("email = ?");
            values.push(email);
        }

        if let Some(password_hash) = changes.password_hash {
            updates.push("password_hash = ?");
            values.push(password_hash);
        }

        updates.push("updated_at = datetime('now')");

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let sql = format!("UPDATE users SET {} WHERE id = ?", updates.join(", "));
        let mut query_builder = sqlx::query(&sql);
        for value in &values {
            query_builder = query_builder.bind(value);
        }
        let result = query_builder
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("Failed to update user")?;

        if result.rows_affected() == 0 {
            return Err(anyhow::anyhow!("User not found: {}", id));
        }

        if let Some(role_ids) = role_ids {
            sync_roles(&mut tx, id, role_ids).await?;
        }

        tx.commit().await.context("Failed to commit user update")?;

        self.get(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("User not found after update"))
    }

    /// Delete a user. Role assignments go with it.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete user")?;

        if result.rows_affected() == 0 {
            return Err(anyhow::anyhow!("User not found: {}", id));
        }

        Ok(())
    }

    /// Check if an email is available. `Bob@x.org` and `bob@x.org` are the same address.
    #[instrument(skip(self))]
    pub async fn is_email_available(&self, email: &str) -> Result<bool> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = ? COLLATE NOCASE")
            .bind(email)
            .fetch_one(&self.pool)
            .await
            .context("Failed to check email availability")?;

        Ok(count.0 == 0)
    }

    /// Role ids from `role_ids` that have no row in `roles`.
    #[instrument(skip(self))]
    pub async fn missing_role_ids(&self, role_ids: &[i64]) -> Result<Vec<i64>> {
        let mut missing = Vec::new();
        for &role_id in role_ids {
            let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM roles WHERE id = ?")
                .bind(role_id)
                .fetch_one(&self.pool)
                .await
                .context("Failed to check role")?;
            if count.0 == 0 {
                missing.push(role_id);
            }
        }
        Ok(missing)
    }
}

/// Replace the role rows of a user.
async fn sync_roles(tx: &mut Transaction<'_, Sqlite>, user_id: &str, role_ids: &[i64]) -> Result<()> {
    sqlx::query("DELETE FROM role_user WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut **tx)
        .await
        .context("Failed to clear user roles")?;

    for role_id in role_ids {
        sqlx::query("INSERT OR IGNORE INTO role_user (user_id, role_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(role_id)
            .execute(&mut **tx)
            .await
            .context("Failed to assign role")?;
    }

    Ok(())
}

/// WHERE fragment (prefixed with AND) plus its bind values.
fn filter_clause(query: &UserListQuery) -> (String, Vec<String>) {
    let mut sql = String::new();
    let mut bind_values: Vec<String> = Vec::new();

    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        sql.push_str(" AND (name LIKE ? ESCAPE '\\' OR email LIKE ? ESCAPE '\\')");
        let pattern = format!("%{}%", escape_like(search));
        bind_values.push(pattern.clone());
        bind_values.push(pattern);
    }

    if let Some(role) = query.role {
        sql.push_str(" AND id IN (SELECT user_id FROM role_user WHERE role_id = ?)");
        bind_values.push(role.to_string());
    }

    (sql, bind_values)
}

/// Make `%`, `_` and `\` match themselves in a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup_repo() -> UserRepository {
        let db = Database::in_memory().await.unwrap();
        UserRepository::new(db.pool().clone())
    }

    fn new_user(name: &str, email: &str, role_ids: Vec<i64>) -> NewUser {
        NewUser {
            name: name.to_string(),
            email: email.to_string(),
            password_hash: "hashed".to_string(),
            role_ids,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let repo = setup_repo().await;

        let user = repo
            .create(new_user("Test User", "test@example.com", vec![2, 1]))
            .await
            .unwrap();
        assert!(user.id.starts_with("usr_"));
        assert_eq!(user.name, "Test User");
        assert_eq!(user.role_ids, vec![1, 2]);

        let fetched = repo.get(&user.id).await.unwrap().unwrap();
        assert_eq!(fetched, user);

        let by_email = repo.get_by_email("test@example.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
    }

    #[tokio::test]
    async fn test_duplicate_role_ids_are_stored_once() {
        let repo = setup_repo().await;

        let user = repo
            .create(new_user("Dup", "dup@example.com", vec![1, 1, 1]))
            .await
            .unwrap();
        assert_eq!(user.role_ids, vec![1]);
    }

    #[tokio::test]
    async fn test_update_user_and_roles() {
        let repo = setup_repo().await;
        let user = repo
            .create(new_user("Before", "before@example.com", vec![1]))
            .await
            .unwrap();

        let changes = UserChanges {
            name: Some("After".to_string()),
            ..Default::default()
        };
        let updated = repo.update(&user.id, changes, Some(&[2])).await.unwrap();
        assert_eq!(updated.name, "After");
        assert_eq!(updated.email, "before@example.com");
        assert_eq!(updated.role_ids, vec![2]);

        // Roles untouched when not given
        let updated = repo
            .update(&user.id, UserChanges::default(), None)
            .await
            .unwrap();
        assert_eq!(updated.role_ids, vec![2]);
    }

    #[tokio::test]
    async fn test_update_missing_user() {
        let repo = setup_repo().await;
        let err = repo
            .update("usr_missing", UserChanges::default(), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_delete_user_removes_role_rows() {
        let repo = setup_repo().await;
        let user = repo
            .create(new_user("Gone", "gone@example.com", vec![1, 2]))
            .await
            .unwrap();

        repo.delete(&user.id).await.unwrap();
        assert!(repo.get(&user.id).await.unwrap().is_none());

        let rows: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM role_user WHERE user_id = ?")
            .bind(&user.id)
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        assert_eq!(rows.0, 0);

        assert!(repo.delete(&user.id).await.is_err());
    }

    #[tokio::test]
    async fn test_list_and_count_users() {
        let repo = setup_repo().await;

        for i in 0..5 {
            let roles = if i == 0 { vec![1] } else { vec![2] };
            repo.create(new_user(
                &format!("user{}", i),
                &format!("user{}@example.com", i),
                roles,
            ))
            .await
            .unwrap();
        }

        let all = repo.list(&UserListQuery::default()).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(repo.count(&UserListQuery::default()).await.unwrap(), 5);

        let admins = UserListQuery {
            role: Some(1),
            ..Default::default()
        };
        assert_eq!(repo.list(&admins).await.unwrap().len(), 1);
        assert_eq!(repo.count(&admins).await.unwrap(), 1);

        let search = UserListQuery {
            search: Some("user2".to_string()),
            ..Default::default()
        };
        assert_eq!(repo.list(&search).await.unwrap().len(), 1);

        let page = UserListQuery {
            limit: Some(2),
            offset: Some(4),
            ..Default::default()
        };
        assert_eq!(repo.list(&page).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_wildcards_match_literally() {
        let repo = setup_repo().await;
        for (name, email) in [
            ("snake_case", "snake@example.com"),
            ("plain", "plain@example.com"),
            ("100% sure", "sure@example.com"),
        ] {
            repo.create(new_user(name, email, vec![])).await.unwrap();
        }

        let count = |term: &str| {
            let query = UserListQuery {
                search: Some(term.to_string()),
                ..Default::default()
            };
            let repo = repo.clone();
            async move { repo.count(&query).await.unwrap() }
        };

        assert_eq!(count("_").await, 1);
        assert_eq!(count("%").await, 1);
        assert_eq!(count("e_c").await, 1);
        assert_eq!(count("\\").await, 0);

        assert_eq!(escape_like(r"a%b_c\d"), r"a\%b\_c\\d");
    }

    #[tokio::test]
    async fn test_email_availability_and_missing_roles() {
        let repo = setup_repo().await;
        repo.create(new_user("Taken", "taken@example.com", vec![]))
            .await
            .unwrap();

        assert!(!repo.is_email_available("taken@example.com").await.unwrap());
        assert!(!repo.is_email_available("Taken@Example.COM").await.unwrap());
        assert!(repo.is_email_available("free@example.com").await.unwrap());

        let found = repo.get_by_email("TAKEN@example.com").await.unwrap();
        assert_eq!(found.unwrap().email, "taken@example.com");

        assert!(
            repo.create(new_user("Shouty", "TAKEN@EXAMPLE.COM", vec![]))
                .await
                .is_err()
        );

        assert_eq!(repo.missing_role_ids(&[1, 2, 42]).await.unwrap(), vec![42]);
    }
}
