//! Role management module.
//!
//! Roles are plain labels assigned to users through the `role_user` table.

mod models;
mod repository;

pub use models::{CreateRoleRequest, Role, RolesList};
pub use repository::RoleRepository;
