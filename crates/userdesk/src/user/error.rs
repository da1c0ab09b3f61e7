//! Structured failures returned by user store calls.

use thiserror::Error;

/// Category of a failed store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserErrorKind {
    NotFound,
    Conflict,
    Invalid,
    Storage,
}

impl UserErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Invalid => "invalid",
            Self::Storage => "storage",
        }
    }
}

/// A failed store call. `message` is shown to the user verbatim.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct UserError {
    pub kind: UserErrorKind,
    pub message: String,
}

impl UserError {
    pub fn new(kind: UserErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(UserErrorKind::NotFound, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(UserErrorKind::Conflict, msg)
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::new(UserErrorKind::Invalid, msg)
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::new(UserErrorKind::Storage, msg)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Categorize an anyhow error by its message.
    ///
    /// Patterns recognized:
    /// - "not found" -> NotFound
    /// - "already exists" / "already registered" / "unique constraint" -> Conflict
    /// - "invalid" / "must be" / "does not exist" -> Invalid
    /// - Default -> Storage
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        let msg = err.to_string();
        let chain = format!("{err:#}").to_lowercase();
        let msg_lower = msg.to_lowercase();

        if msg_lower.contains("not found") {
            Self::not_found(msg)
        } else if msg_lower.contains("already exists")
            || msg_lower.contains("already registered")
            || chain.contains("unique constraint")
        {
            Self::conflict(msg)
        } else if msg_lower.contains("invalid")
            || msg_lower.contains("must be")
            || msg_lower.contains("does not exist")
        {
            Self::invalid(msg)
        } else {
            Self::storage(msg)
        }
    }
}

impl From<anyhow::Error> for UserError {
    fn from(err: anyhow::Error) -> Self {
        Self::from_anyhow(err)
    }
}
