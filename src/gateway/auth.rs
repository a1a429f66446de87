//! Bearer-token middleware for protected routes.
//!
//! Resolves the token to an active profile and stores it as a
//! [`CurrentUser`] request extension for handlers.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};

use crate::backend::UserProfile;
use crate::gateway::auth_error;
use crate::gateway::server::GatewayState;

/// The signed-in user behind the current request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub profile: UserProfile,
    pub access_token: String,
}

impl CurrentUser {
    /// Owner key for the user's favorites and reports.
    pub fn owner(&self) -> String {
        self.profile.id.to_string()
    }

    /// How the user is named in notifications.
    pub fn reporter(&self) -> String {
        let name = self.profile.display_name();
        if name == self.profile.email {
            self.profile.email.clone()
        } else {
            format!("{name} <{}>", self.profile.email)
        }
    }
}

pub(crate) fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn missing_token() -> (StatusCode, String) {
    (
        StatusCode::UNAUTHORIZED,
        "Missing bearer token".to_string(),
    )
}

/// Require any active signed-in user.
pub async fn require_user(
    State(state): State<Arc<GatewayState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    let token = bearer_token(&request).ok_or_else(missing_token)?.to_string();
    let profile = state
        .app
        .auth
        .current_user(&token)
        .await
        .map_err(auth_error)?;
    request.extensions_mut().insert(CurrentUser {
        profile,
        access_token: token,
    });
    Ok(next.run(request).await)
}

/// Require an active admin.
pub async fn require_admin(
    State(state): State<Arc<GatewayState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    let token = bearer_token(&request).ok_or_else(missing_token)?.to_string();
    let profile = state
        .app
        .auth
        .require_admin(&token)
        .await
        .map_err(auth_error)?;
    request.extensions_mut().insert(CurrentUser {
        profile,
        access_token: token,
    });
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;

    use super::*;

    fn request_with(value: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/api/auth/me");
        if let Some(v) = value {
            builder = builder.header(header::AUTHORIZATION, v);
        }
        builder.body(Body::empty()).expect("request")
    }

    #[test]
    fn bearer_token_requires_scheme_and_value() {
        assert_eq!(
            bearer_token(&request_with(Some("Bearer abc123"))),
            Some("abc123")
        );
        assert_eq!(bearer_token(&request_with(Some("Basic abc123"))), None);
        assert_eq!(bearer_token(&request_with(Some("Bearer   "))), None);
        assert_eq!(bearer_token(&request_with(None)), None);
    }
}
