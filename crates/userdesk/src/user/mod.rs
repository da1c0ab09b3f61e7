//! User management module.
//!
//! Provides user CRUD operations, own-profile updates and role assignment.

mod error;
mod models;
mod repository;
mod service;

pub use error::{UserError, UserErrorKind};
pub use models::{
    CreateUserInput, UpdateProfileInput, UpdateUserInput, User, UserListQuery, UserRow,
};
pub use repository::UserRepository;
pub use service::{UserService, verify_password};
