//! Error types for every subsystem.

use thiserror::Error;

/// Configuration resolution failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {key}: {hint}")]
    Missing { key: String, hint: String },

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("failed to read settings file {path}: {reason}")]
    SettingsFile { path: String, reason: String },
}

/// Failures talking to the hosted backend (tables or auth).
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Transport(String),

    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("failed to decode backend response: {0}")]
    Decode(String),

    #[error("backend operation not supported: {0}")]
    Unsupported(String),

    #[error("database pool error: {0}")]
    Pool(String),

    #[error("query failed: {0}")]
    Query(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for BackendError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::Query(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<deadpool_postgres::PoolError> for BackendError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

/// Authentication and authorization failures surfaced to users.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Your account has been deactivated. Please contact an administrator.")]
    AccountDeactivated,

    #[error("Access denied: administrator privileges required")]
    AccessDenied,

    #[error("No profile found for this account")]
    MissingProfile,

    #[error("Session expired or invalid")]
    InvalidSession,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Email delivery failures. Callers treat these as non-fatal.
#[derive(Debug, Error)]
pub enum EmailError {
    #[error("email provider rejected message ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("email transport failed: {0}")]
    Transport(String),

    #[error("failed to render template '{template}': {reason}")]
    Template { template: String, reason: String },
}

impl From<reqwest::Error> for EmailError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Favorites/report repository failures.
#[derive(Debug, Error)]
pub enum ListError {
    #[error("A list name is required")]
    NameRequired,

    #[error("A list named '{0}' already exists")]
    NameTaken(String),

    #[error("No list named '{0}'")]
    NotFound(String),

    #[error("Row {index} is out of range for list '{name}' ({len} rows)")]
    RowOutOfRange {
        name: String,
        index: usize,
        len: usize,
    },

    #[error("list storage failed: {0}")]
    Storage(String),

    #[error("failed to serialize list: {0}")]
    Serialization(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl From<serde_json::Error> for ListError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ListError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(feature = "libsql")]
impl From<libsql::Error> for ListError {
    fn from(err: libsql::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Gateway lifecycle failures.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway failed to start: {reason}")]
    StartupFailed { reason: String },
}

/// Admin console operation failures.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("{0}")]
    Validation(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Failures while assembling the application from configuration.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Email(#[from] EmailError),

    #[error(transparent)]
    Lists(#[from] ListError),
}
