//! User service: the store the handlers talk to.

use std::collections::BTreeSet;

use anyhow::Context;
use tracing::{info, instrument, warn};

use super::error::UserError;
use super::models::{
    CreateUserInput, NewUser, UpdateProfileInput, UpdateUserInput, User, UserChanges,
    UserListQuery, provided_password,
};
use super::repository::UserRepository;

/// Service for user management operations.
#[derive(Debug, Clone)]
pub struct UserService {
    repo: UserRepository,
}

impl UserService {
    /// Create a new user service.
    pub fn new(repo: UserRepository) -> Self {
        Self { repo }
    }

    /// Persist a new user with its roles.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn store(&self, input: CreateUserInput) -> Result<User, UserError> {
        let email = input.email.trim().to_string();
        if !self.repo.is_email_available(&email).await? {
            return Err(UserError::conflict(format!(
                "Email '{}' is already registered.",
                email
            )));
        }

        let role_ids = self.checked_role_ids(&input.roles).await?;

        let user = self
            .repo
            .create(NewUser {
                name: input.name.trim().to_string(),
                email,
                password_hash: hash_password(&input.password)?,
                role_ids,
            })
            .await?;

        info!(user_id = %user.id, "Created new user");
        Ok(user)
    }

    /// Look up a user. `Ok(None)` when the id is unknown.
    #[instrument(skip(self))]
    pub async fn find(&self, id: &str) -> Result<Option<User>, UserError> {
        Ok(self.repo.get(id).await?)
    }

    /// Look up a user, treating any failure as absence.
    #[instrument(skip(self))]
    pub async fn find_without_fail(&self, id: &str) -> Option<User> {
        match self.repo.get(id).await {
            Ok(user) => user,
            Err(err) => {
                warn!(user_id = %id, error = %format!("{err:#}"), "User lookup failed");
                None
            }
        }
    }

    /// Update a user's fields and replace its roles.
    #[instrument(skip(self, input))]
    pub async fn update(&self, id: &str, input: UpdateUserInput) -> Result<User, UserError> {
        let email = input.email.trim().to_string();
        self.ensure_email_free_for(id, &email).await?;

        let role_ids = self.checked_role_ids(&input.roles).await?;

        let changes = UserChanges {
            name: Some(input.name.trim().to_string()),
            email: Some(email),
            password_hash: provided_password(&input.password)
                .map(hash_password)
                .transpose()?,
        };

        let user = self.repo.update(id, changes, Some(&role_ids)).await?;
        info!(user_id = %user.id, "Updated user");

        Ok(user)
    }

    /// Update the profile of the user `id`. Roles are never touched.
    #[instrument(skip(self, input))]
    pub async fn update_profile(
        &self,
        id: &str,
        input: UpdateProfileInput,
    ) -> Result<User, UserError> {
        let email = input.email.trim().to_string();
        self.ensure_email_free_for(id, &email).await?;

        let changes = UserChanges {
            name: Some(input.name.trim().to_string()),
            email: Some(email),
            password_hash: provided_password(&input.password)
                .map(hash_password)
                .transpose()?,
        };

        let user = self.repo.update(id, changes, None).await?;
        info!(user_id = %user.id, "Updated own profile");

        Ok(user)
    }

    /// Delete a user.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<(), UserError> {
        self.repo.delete(id).await?;
        info!(user_id = %id, "Deleted user");
        Ok(())
    }

    /// List users with optional filters.
    #[instrument(skip(self))]
    pub async fn list(&self, query: &UserListQuery) -> Result<Vec<User>, UserError> {
        Ok(self.repo.list(query).await?)
    }

    /// Count users matching the filters of `query`.
    #[instrument(skip(self))]
    pub async fn count(&self, query: &UserListQuery) -> Result<i64, UserError> {
        Ok(self.repo.count(query).await?)
    }

    async fn ensure_email_free_for(&self, id: &str, email: &str) -> Result<(), UserError> {
        if let Some(existing) = self.repo.get_by_email(email).await? {
            if existing.id != id {
                return Err(UserError::conflict(format!(
                    "Email '{}' is already registered.",
                    email
                )));
            }
        }
        Ok(())
    }

    /// Deduplicate role ids and reject unknown ones.
    async fn checked_role_ids(&self, roles: &[i64]) -> Result<Vec<i64>, UserError> {
        let role_ids: Vec<i64> = roles.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();

        if let Some(missing) = self.repo.missing_role_ids(&role_ids).await?.first() {
            return Err(UserError::invalid(format!("Role {} does not exist.", missing)));
        }

        Ok(role_ids)
    }
}

/// Hash a password using bcrypt.
fn hash_password(password: &str) -> Result<String, UserError> {
    // Lower cost factor for development speed
    let cost = if cfg!(debug_assertions) { 4 } else { 10 };
    Ok(bcrypt::hash(password, cost).context("Failed to hash password")?)
}

/// Verify a password against a bcrypt hash.
pub fn verify_password(password: &str, hash: &str) -> anyhow::Result<bool> {
    bcrypt::verify(password, hash).context("Failed to verify password")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::user::UserErrorKind;

    async fn setup_service() -> UserService {
        let db = Database::in_memory().await.unwrap();
        UserService::new(UserRepository::new(db.pool().clone()))
    }

    fn create_input(name: &str, email: &str) -> CreateUserInput {
        CreateUserInput {
            name: name.to_string(),
            email: email.to_string(),
            password: "secret123".to_string(),
            password_confirmation: "secret123".to_string(),
            roles: vec![2, 1, 2],
        }
    }

    #[tokio::test]
    async fn test_store_hashes_password_and_dedupes_roles() {
        let service = setup_service().await;

        let user = service
            .store(create_input(" Alice ", "alice@example.com"))
            .await
            .unwrap();
        assert_eq!(user.name, "Alice");
        assert_eq!(user.role_ids, vec![1, 2]);
        assert_ne!(user.password_hash, "secret123");
        assert!(verify_password("secret123", &user.password_hash).unwrap());
    }

    #[tokio::test]
    async fn test_store_rejects_duplicate_email() {
        let service = setup_service().await;
        service
            .store(create_input("Alice", "alice@example.com"))
            .await
            .unwrap();

        let err = service
            .store(create_input("Other", "alice@example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, UserErrorKind::Conflict);
        assert_eq!(err.message(), "Email 'alice@example.com' is already registered.");
    }

    #[tokio::test]
    async fn test_email_uniqueness_ignores_case() {
        let service = setup_service().await;
        let alice = service
            .store(create_input("Alice", "alice@example.com"))
            .await
            .unwrap();

        let err = service
            .store(create_input("Shouty", "ALICE@Example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, UserErrorKind::Conflict);
        assert_eq!(service.count(&UserListQuery::default()).await.unwrap(), 1);

        // Re-casing your own address is not a conflict.
        let updated = service
            .update(
                &alice.id,
                UpdateUserInput {
                    name: "Alice".to_string(),
                    email: "Alice@Example.com".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.email, "Alice@Example.com");
    }

    #[tokio::test]
    async fn test_store_rejects_unknown_role() {
        let service = setup_service().await;
        let mut input = create_input("Alice", "alice@example.com");
        input.roles = vec![1, 99];

        let err = service.store(input).await.unwrap_err();
        assert_eq!(err.kind, UserErrorKind::Invalid);
        assert_eq!(err.message(), "Role 99 does not exist.");
        assert_eq!(service.count(&UserListQuery::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_find_and_find_without_fail() {
        let service = setup_service().await;
        assert!(service.find("usr_missing").await.unwrap().is_none());
        assert!(service.find_without_fail("usr_missing").await.is_none());

        let user = service
            .store(create_input("Alice", "alice@example.com"))
            .await
            .unwrap();
        assert_eq!(service.find_without_fail(&user.id).await.unwrap().id, user.id);
    }

    #[tokio::test]
    async fn test_update_keeps_password_when_blank() {
        let service = setup_service().await;
        let user = service
            .store(create_input("Alice", "alice@example.com"))
            .await
            .unwrap();

        let updated = service
            .update(
                &user.id,
                UpdateUserInput {
                    name: "Alice B".to_string(),
                    email: "alice@example.com".to_string(),
                    password: Some(String::new()),
                    password_confirmation: Some(String::new()),
                    roles: vec![1],
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Alice B");
        assert_eq!(updated.role_ids, vec![1]);
        assert_eq!(updated.password_hash, user.password_hash);
    }

    #[tokio::test]
    async fn test_update_rejects_email_of_other_user() {
        let service = setup_service().await;
        service
            .store(create_input("Alice", "alice@example.com"))
            .await
            .unwrap();
        let bob = service
            .store(create_input("Bob", "bob@example.com"))
            .await
            .unwrap();

        let err = service
            .update(
                &bob.id,
                UpdateUserInput {
                    name: "Bob".to_string(),
                    email: "alice@example.com".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, UserErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_update_profile_leaves_roles() {
        let service = setup_service().await;
        let user = service
            .store(create_input("Alice", "alice@example.com"))
            .await
            .unwrap();

        let updated = service
            .update_profile(
                &user.id,
                UpdateProfileInput {
                    name: "Alice Profile".to_string(),
                    email: "alice@example.com".to_string(),
                    password: Some("newsecret".to_string()),
                    password_confirmation: Some("newsecret".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Alice Profile");
        assert_eq!(updated.role_ids, vec![1, 2]);
        assert!(verify_password("newsecret", &updated.password_hash).unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_user_is_not_found() {
        let service = setup_service().await;
        let err = service.delete("usr_missing").await.unwrap_err();
        assert_eq!(err.kind, UserErrorKind::NotFound);
    }
}
