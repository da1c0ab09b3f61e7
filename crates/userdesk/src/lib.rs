//! userdesk: server-rendered user and role administration.
//!
//! The binary in `main.rs` wires configuration and logging around
//! [`api::create_router`]; everything it serves lives here.

pub mod api;
pub mod auth;
pub mod db;
pub mod role;
pub mod settings;
pub mod templates;
pub mod user;

use api::AppState;
use auth::{AuthConfig, AuthState};
use db::Database;
use role::RoleRepository;
use templates::Views;
use user::{UserRepository, UserService};

/// Build the shared handler state over an open database.
pub fn build_state(db: &Database, auth: AuthConfig) -> anyhow::Result<AppState> {
    let pool = db.pool().clone();

    Ok(AppState::new(
        UserService::new(UserRepository::new(pool.clone())),
        RoleRepository::new(pool),
        Views::new()?,
        AuthState::new(auth),
    ))
}
