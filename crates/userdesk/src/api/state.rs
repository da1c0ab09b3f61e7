//! Application state shared across handlers.

use std::sync::Arc;

use crate::auth::AuthState;
use crate::role::RoleRepository;
use crate::templates::Views;
use crate::user::UserService;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// User store.
    pub users: Arc<UserService>,
    /// Role store.
    pub roles: Arc<RoleRepository>,
    /// View renderer.
    pub views: Arc<Views>,
    /// Authentication state.
    pub auth: AuthState,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        users: UserService,
        roles: RoleRepository,
        views: Views,
        auth: AuthState,
    ) -> Self {
        Self {
            users: Arc::new(users),
            roles: Arc::new(roles),
            views: Arc::new(views),
            auth,
        }
    }
}
