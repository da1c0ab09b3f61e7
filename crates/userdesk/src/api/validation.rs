//! Form validation that runs before a handler sees its input.

use axum::{
    Json,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::Form;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value, json};
use tracing::debug;

use super::web::{FieldErrors, Flash, PreviousUrl, RequestMode, redirect_with_flash};
use crate::user::{CreateUserInput, UpdateProfileInput, UpdateUserInput};

const MAX_STRING: usize = 191;
const MIN_PASSWORD: usize = 6;

/// Fields never echoed back into a form.
const DONT_FLASH: &[&str] = &["password", "password_confirmation"];

/// A form payload with declarative rules.
pub trait Validate: Serialize {
    /// Collect rule violations; empty when the input is acceptable.
    fn validate(&self) -> FieldErrors;

    /// Submitted input to repopulate the form with, minus secret fields.
    fn old_input(&self) -> Map<String, Value> {
        let mut old = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for field in DONT_FLASH {
            old.remove(*field);
        }
        old
    }
}

/// Extractor that deserializes an urlencoded form and applies its rules.
///
/// On failure a page request is redirected back with the errors and old
/// input in the flash; an AJAX request gets `422 {message, errors}`.
#[derive(Debug, Clone)]
pub struct ValidatedForm<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedForm<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let mode = RequestMode::from_headers(req.headers());
        let back = PreviousUrl::from_headers(req.headers()).or(&form_page(req.uri().path()));

        let Form(input) = Form::<T>::from_request(req, state)
            .await
            .map_err(IntoResponse::into_response)?;

        let errors = input.validate();
        if errors.is_empty() {
            return Ok(Self(input));
        }

        debug!(fields = ?errors.keys().collect::<Vec<_>>(), "Form validation failed");
        Err(invalid_response(mode, &back, errors, input.old_input()))
    }
}

fn invalid_response(
    mode: RequestMode,
    back: &str,
    errors: FieldErrors,
    old: Map<String, Value>,
) -> Response {
    match mode {
        RequestMode::Ajax => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "message": "The given data was invalid.",
                "errors": errors,
            })),
        )
            .into_response(),
        RequestMode::Page => redirect_with_flash(back, Flash::form_errors(errors, old)),
    }
}

/// Form page a submission to `path` came from.
pub(crate) fn form_page(path: &str) -> String {
    let path = path.trim_end_matches('/');
    if path == "/users" {
        "/users/create".to_string()
    } else if path == "/profile" {
        "/profile/edit".to_string()
    } else {
        format!("{}/edit", path)
    }
}

fn add(errors: &mut FieldErrors, field: &str, message: String) {
    errors.entry(field.to_string()).or_default().push(message);
}

fn label(field: &str) -> String {
    field.replace('_', " ")
}

fn check_string(errors: &mut FieldErrors, field: &str, value: &str) {
    if value.trim().is_empty() {
        add(errors, field, format!("The {} field is required.", label(field)));
    } else if value.chars().count() > MAX_STRING {
        add(
            errors,
            field,
            format!("The {} may not be greater than {} characters.", label(field), MAX_STRING),
        );
    }
}

fn check_email(errors: &mut FieldErrors, value: &str) {
    check_string(errors, "email", value);
    if !value.trim().is_empty() && !is_valid_email(value.trim()) {
        add(errors, "email", "The email must be a valid email address.".to_string());
    }
}

/// Checks a password that is present; `required` adds the empty case.
fn check_password(
    errors: &mut FieldErrors,
    password: Option<&str>,
    confirmation: Option<&str>,
    required: bool,
) {
    let password = password.filter(|p| !p.is_empty());
    let Some(password) = password else {
        if required {
            add(errors, "password", "The password field is required.".to_string());
        }
        return;
    };

    if password.chars().count() < MIN_PASSWORD {
        add(
            errors,
            "password",
            format!("The password must be at least {} characters.", MIN_PASSWORD),
        );
    }
    if confirmation != Some(password) {
        add(errors, "password", "The password confirmation does not match.".to_string());
    }
}

fn check_roles(errors: &mut FieldErrors, roles: &[i64]) {
    if roles.iter().any(|id| *id <= 0) {
        add(errors, "roles", "The selected roles are invalid.".to_string());
    }
}

fn is_valid_email(email: &str) -> bool {
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return false;
    }
    !parts[0].is_empty()
        && parts[1].contains('.')
        && !parts[1].starts_with('.')
        && !parts[1].ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

impl Validate for CreateUserInput {
    fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        check_string(&mut errors, "name", &self.name);
        check_email(&mut errors, &self.email);
        check_password(
            &mut errors,
            Some(self.password.as_str()),
            Some(self.password_confirmation.as_str()),
            true,
        );
        check_roles(&mut errors, &self.roles);
        errors
    }
}

impl Validate for UpdateUserInput {
    fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        check_string(&mut errors, "name", &self.name);
        check_email(&mut errors, &self.email);
        check_password(
            &mut errors,
            self.password.as_deref(),
            self.password_confirmation.as_deref(),
            false,
        );
        check_roles(&mut errors, &self.roles);
        errors
    }
}

impl Validate for UpdateProfileInput {
    fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        check_string(&mut errors, "name", &self.name);
        check_email(&mut errors, &self.email);
        check_password(
            &mut errors,
            self.password.as_deref(),
            self.password_confirmation.as_deref(),
            false,
        );
        errors
    }
}
