//! API route definitions.

use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::{Router, middleware, routing::get};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth::auth_middleware;

use super::handlers::{self, profile, users};
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let auth_state = state.auth.clone();

    // Everything except /health needs an identity.
    let protected_routes = Router::new()
        .route("/users", get(users::index).post(users::store))
        .route("/users/create", get(users::create))
        .route(
            "/users/{id}",
            get(users::show)
                .put(users::update)
                .patch(users::update)
                .post(users::update)
                .delete(users::destroy),
        )
        .route("/users/{id}/edit", get(users::edit))
        .route("/profile/edit", get(profile::edit))
        .route("/profile", get(profile::edit).post(profile::update).put(profile::update))
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    let public_routes = Router::new().route("/health", get(handlers::health));

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .layer(trace_layer)
        .layer(cors)
        .with_state(state)
}

/// CORS for the configured origins; dev mode also admits a local frontend.
fn build_cors_layer(state: &AppState) -> CorsLayer {
    const DEV_ORIGINS: &[&str] = &["http://localhost:3000", "http://127.0.0.1:3000"];

    let dev_origins = state
        .auth
        .is_dev_mode()
        .then_some(DEV_ORIGINS)
        .unwrap_or_default();

    let mut origins: Vec<HeaderValue> = Vec::new();
    for origin in state
        .auth
        .allowed_origins()
        .iter()
        .map(String::as_str)
        .chain(dev_origins.iter().copied())
    {
        match HeaderValue::from_str(origin) {
            Ok(value) if !origins.contains(&value) => origins.push(value),
            Ok(_) => {}
            Err(_) => tracing::warn!(origin, "ignoring unparsable CORS origin"),
        }
    }

    if origins.is_empty() {
        tracing::warn!("no CORS origins configured; cross-origin requests are refused");
        return CorsLayer::new();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers([
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-requested-with"),
        ])
        .allow_credentials(true)
}
