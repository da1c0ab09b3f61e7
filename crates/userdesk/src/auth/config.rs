//! Authentication configuration (`[auth]` section).

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Accept `X-Dev-User` for the identities in `dev_users`.
    pub dev_mode: bool,

    /// HS256 signing secret, or `env:VAR_NAME`. Required outside dev mode.
    pub jwt_secret: Option<String>,

    /// Lifetime of issued tokens.
    pub token_ttl_hours: i64,

    pub dev_users: Vec<DevUser>,

    /// CORS origins. Empty denies cross-origin requests.
    pub allowed_origins: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            dev_mode: false,
            jwt_secret: None,
            token_ttl_hours: 24,
            dev_users: Vec::new(),
            allowed_origins: vec!["http://localhost:8080".to_string()],
        }
    }
}

/// Identity accepted through `X-Dev-User` in dev mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevUser {
    pub id: String,
    pub name: String,
    pub email: String,
    /// Role names, e.g. `["admin"]`.
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error("auth.jwt_secret is required unless auth.dev_mode is set (or USERDESK__AUTH__JWT_SECRET)")]
    MissingJwtSecret,

    #[error("auth.jwt_secret must be at least {MIN_SECRET_LEN} characters")]
    JwtSecretTooShort,

    #[error("auth.jwt_secret refers to env:{0}, which is unset or empty")]
    SecretEnvUnset(String),

    #[error("auth.token_ttl_hours must be positive")]
    InvalidTokenTtl,
}

impl AuthConfig {
    /// The signing secret with `env:VAR_NAME` resolved.
    pub fn resolve_jwt_secret(&self) -> Result<Option<String>, ConfigValidationError> {
        let Some(value) = &self.jwt_secret else {
            return Ok(None);
        };

        match value.strip_prefix("env:") {
            Some(var) => std::env::var(var)
                .ok()
                .filter(|secret| !secret.is_empty())
                .map(Some)
                .ok_or_else(|| ConfigValidationError::SecretEnvUnset(var.to_string())),
            None => Ok(Some(value.clone())),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.token_ttl_hours <= 0 {
            return Err(ConfigValidationError::InvalidTokenTtl);
        }

        let secret = self.resolve_jwt_secret()?;
        if self.dev_mode {
            return Ok(());
        }

        match secret {
            None => Err(ConfigValidationError::MissingJwtSecret),
            Some(s) if s.len() < MIN_SECRET_LEN => Err(ConfigValidationError::JwtSecretTooShort),
            Some(_) => Ok(()),
        }
    }
}
