//! Error types for the pump verification service
//!
//! One enum for the whole library. Every variant carries a stable wire code
//! so the HTTP layer and the API client agree on what went wrong.

use thiserror::Error;

/// Convenience Result type using the library Error
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Empty or blank RFID tag identifier
    #[error("Invalid tag: {0}")]
    InvalidTag(String),

    /// Malformed request or entity field
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Missing or unknown session token
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated, but the role may not perform the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Lost a race on the same row, or a uniqueness clash
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Operation not allowed in the entity's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport failure talking to a remote API
    #[error("Network error: {0}")]
    Network(String),

    /// Error reported by a remote API, kept with its wire code
    #[error("{code}: {message}")]
    Remote { code: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable code used in the `{success:false, error:{code, ...}}` envelope
    pub fn code(&self) -> &str {
        match self {
            Error::InvalidTag(_) => "INVALID_TAG",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Unauthorized(_) => "UNAUTHORIZED",
            Error::Forbidden(_) => "FORBIDDEN",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Conflict(_) => "CONFLICT",
            Error::InvalidState(_) => "INVALID_STATE",
            Error::Network(_) => "NETWORK_ERROR",
            Error::Remote { code, .. } => code,
            Error::Database(_) => "DATABASE_ERROR",
            Error::Config(_) | Error::Toml(_) => "CONFIG_ERROR",
            Error::Serialization(_) | Error::Csv(_) | Error::Io(_) | Error::Internal(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    /// Message without the variant prefix, for the envelope body
    pub fn message(&self) -> String {
        match self {
            Error::InvalidTag(msg)
            | Error::Validation(msg)
            | Error::Unauthorized(msg)
            | Error::Forbidden(msg)
            | Error::NotFound(msg)
            | Error::Conflict(msg)
            | Error::InvalidState(msg)
            | Error::Config(msg)
            | Error::Network(msg)
            | Error::Internal(msg) => msg.clone(),
            Error::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// True for errors the caller caused (bad input, auth, state), as opposed
    /// to failures inside the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidTag(_)
                | Error::Validation(_)
                | Error::Unauthorized(_)
                | Error::Forbidden(_)
                | Error::NotFound(_)
                | Error::Conflict(_)
                | Error::InvalidState(_)
        )
    }

    pub(crate) fn poisoned(what: &str) -> Error {
        Error::Internal(format!("{} lock poisoned", what))
    }
}
