//! Test utilities and common setup.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, Response, header},
};
use serde_json::Value;
use tower::ServiceExt;
use userdesk::api::{self, FLASH_COOKIE, Flash};
use userdesk::auth::{ADMIN_ROLE as ADMIN_NAME, AuthConfig, AuthState};
use userdesk::db::Database;
use userdesk::user::{CreateUserInput, User, UserService};

pub const ADMIN_ROLE: i64 = 1;
pub const USER_ROLE: i64 = 2;
pub const FORM: &str = "application/x-www-form-urlencoded";

/// Create a test AuthConfig with a JWT secret for testing.
fn test_auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: Some("test-secret-for-integration-tests-minimum-32-chars".to_string()),
        ..AuthConfig::default()
    }
}

/// Router plus direct handles on the stores it serves.
pub struct TestApp {
    pub router: Router,
    pub users: Arc<UserService>,
    pub auth: AuthState,
    pub admin: User,
    pub admin_token: String,
}

/// Create a test application over an in-memory database with one admin.
pub async fn test_app() -> TestApp {
    let db = Database::in_memory().await.unwrap();
    let state = userdesk::build_state(&db, test_auth_config()).unwrap();

    let users = state.users.clone();
    let auth = state.auth.clone();

    let admin = users
        .store(new_user("Admin", "admin@example.com", vec![ADMIN_ROLE]))
        .await
        .unwrap();
    let admin_token = token_for(&auth, &admin, &[ADMIN_NAME]);

    TestApp {
        router: api::create_router(state),
        users,
        auth,
        admin,
        admin_token,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Store a regular user directly through the service.
    pub async fn seed_user(&self, name: &str, email: &str) -> User {
        self.users
            .store(new_user(name, email, vec![USER_ROLE]))
            .await
            .unwrap()
    }

    pub fn user_token(&self, user: &User) -> String {
        token_for(&self.auth, user, &["user"])
    }

    pub async fn user_count(&self) -> i64 {
        self.users.count(&Default::default()).await.unwrap()
    }
}

pub fn new_user(name: &str, email: &str, roles: Vec<i64>) -> CreateUserInput {
    CreateUserInput {
        name: name.to_string(),
        email: email.to_string(),
        password: "secret123".to_string(),
        password_confirmation: "secret123".to_string(),
        roles,
    }
}

pub fn token_for(auth: &AuthState, user: &User, roles: &[&str]) -> String {
    let roles = roles.iter().map(|r| r.to_string()).collect();
    auth.issue_token(&user.id, &user.email, &user.name, roles)
        .unwrap()
}

pub fn get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::GET)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

pub fn ajax_get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::GET)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header("X-Requested-With", "XMLHttpRequest")
        .body(Body::empty())
        .unwrap()
}

pub fn form(method: Method, uri: &str, token: &str, body: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(method)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, FORM)
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

pub fn location(response: &Response<Body>) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
}

/// Flash set by a response, if any.
pub fn flash_of(response: &Response<Body>) -> Option<Flash> {
    let prefix = format!("{FLASH_COOKIE}=");
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .find_map(|cookie| cookie.strip_prefix(prefix.as_str()))
        .and_then(|rest| rest.split(';').next())
        .and_then(Flash::decode)
}

/// Cookie header value that sends `flash` back.
pub fn flash_cookie(flash: &Flash) -> String {
    format!("{FLASH_COOKIE}={}", flash.encode())
}
