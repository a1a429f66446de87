//! HTTP gateway: the JSON API over the application services.
//!
//! Handlers return `Result<_, (StatusCode, String)>`; the mappers below turn
//! each error family into a status plus a message safe to show users.

pub mod auth;
pub mod server;
pub mod types;

use axum::http::StatusCode;

use crate::error::{AdminError, AuthError, BackendError, ListError};

pub use server::{GatewayState, RateLimiter, start_server};

pub(crate) fn backend_error(err: BackendError) -> (StatusCode, String) {
    match err {
        BackendError::NotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
        BackendError::Status {
            status: 409,
            message,
        } => (StatusCode::CONFLICT, message),
        BackendError::Status {
            status: 400 | 422,
            message,
        } => (StatusCode::BAD_REQUEST, message),
        BackendError::Unsupported(_) => (StatusCode::NOT_IMPLEMENTED, err.to_string()),
        BackendError::Pool(_) | BackendError::Query(_) => {
            tracing::error!("Database error: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
            )
        }
        BackendError::Transport(_)
        | BackendError::Status { .. }
        | BackendError::Unauthorized(_)
        | BackendError::Decode(_) => {
            tracing::error!("Backend request failed: {}", err);
            (
                StatusCode::BAD_GATEWAY,
                "The data service is unavailable. Try again shortly.".to_string(),
            )
        }
    }
}

pub(crate) fn auth_error(err: AuthError) -> (StatusCode, String) {
    match err {
        AuthError::InvalidCredentials | AuthError::InvalidSession => {
            (StatusCode::UNAUTHORIZED, err.to_string())
        }
        AuthError::AccountDeactivated | AuthError::AccessDenied | AuthError::MissingProfile => {
            (StatusCode::FORBIDDEN, err.to_string())
        }
        AuthError::Validation(message) => (StatusCode::BAD_REQUEST, message),
        AuthError::Backend(e) => backend_error(e),
    }
}

pub(crate) fn list_error(err: ListError) -> (StatusCode, String) {
    match err {
        ListError::NameRequired | ListError::RowOutOfRange { .. } => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
        ListError::NameTaken(_) => (StatusCode::CONFLICT, err.to_string()),
        ListError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        ListError::Storage(_) | ListError::Serialization(_) => {
            tracing::error!("List storage error: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Saved lists are unavailable".to_string(),
            )
        }
        ListError::Backend(e) => backend_error(e),
    }
}

pub(crate) fn admin_error(err: AdminError) -> (StatusCode, String) {
    match err {
        AdminError::Validation(message) => (StatusCode::BAD_REQUEST, message),
        AdminError::NotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
        AdminError::Auth(e) => auth_error(e),
        AdminError::Backend(e) => backend_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_facing_errors_keep_their_message() {
        let (status, message) = auth_error(AuthError::AccountDeactivated);
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(message.contains("deactivated"));

        let (status, message) = list_error(ListError::NameTaken("Q3".to_string()));
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(message.contains("'Q3' already exists"));
    }

    #[test]
    fn backend_internals_are_not_leaked() {
        let (status, message) = backend_error(BackendError::Transport(
            "dns error: backend.internal".to_string(),
        ));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(!message.contains("backend.internal"));

        let (status, _) = admin_error(AdminError::Backend(BackendError::Status {
            status: 422,
            message: "User already registered".to_string(),
        }));
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
