//! Sign-in, sign-up and session checks on top of the backend auth service.
//!
//! Credentials are verified by the backend; the application profile decides
//! whether the account is active and whether it is an admin.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::{
    AdminAuthProvider, AuthProvider, AuthSession, NewProfile, ProfileStore, UserProfile, UserType,
};
use crate::config::is_plausible_email;
use crate::email::{Notice, Notifier};
use crate::error::{AuthError, BackendError};

pub const MIN_PASSWORD_LEN: usize = 8;

/// A verified session plus the profile it belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct SignedIn {
    pub session: AuthSession,
    pub profile: UserProfile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub company: String,
}

pub struct AuthService {
    auth: Arc<dyn AuthProvider>,
    profiles: Arc<dyn ProfileStore>,
    admin: Arc<dyn AdminAuthProvider>,
    notifier: Arc<Notifier>,
}

pub(crate) fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub(crate) fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_ascii_lowercase();
    if !is_plausible_email(&email) {
        return Err(AuthError::Validation(format!(
            "'{email}' is not a valid email address"
        )));
    }
    Ok(email)
}

impl AuthService {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        profiles: Arc<dyn ProfileStore>,
        admin: Arc<dyn AdminAuthProvider>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            auth,
            profiles,
            admin,
            notifier,
        }
    }

    /// Best-effort sign-out used when a session must not survive a failed check.
    async fn revoke(&self, session: &AuthSession) {
        if let Err(e) = self.auth.sign_out(&session.access_token).await {
            tracing::warn!(user = %session.user.id, "Failed to revoke session: {}", e);
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SignedIn, AuthError> {
        let session = self.auth.sign_in(email.trim(), password).await?;
        let profile = match self.profiles.get_profile(session.user.id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                self.revoke(&session).await;
                return Err(AuthError::MissingProfile);
            }
            Err(e) => {
                self.revoke(&session).await;
                return Err(e.into());
            }
        };
        if !profile.is_active {
            tracing::info!(user = %profile.id, "Rejected sign-in for deactivated account");
            self.revoke(&session).await;
            return Err(AuthError::AccountDeactivated);
        }
        tracing::info!(user = %profile.id, "User signed in");
        Ok(SignedIn { session, profile })
    }

    /// Sign in and additionally require the admin role.
    pub async fn admin_sign_in(&self, email: &str, password: &str) -> Result<SignedIn, AuthError> {
        let signed_in = self.sign_in(email, password).await?;
        if !signed_in.profile.is_admin() {
            tracing::warn!(user = %signed_in.profile.id, "Non-admin attempted admin sign-in");
            self.revoke(&signed_in.session).await;
            return Err(AuthError::AccessDenied);
        }
        Ok(signed_in)
    }

    /// Create the account and an active `user` profile, then send a welcome
    /// email. Email failure does not fail sign-up.
    pub async fn sign_up(&self, request: &SignUpRequest) -> Result<UserProfile, AuthError> {
        let email = normalize_email(&request.email)?;
        validate_password(&request.password)?;

        let metadata = serde_json::json!({
            "first_name": request.first_name.trim(),
            "last_name": request.last_name.trim(),
            "company": request.company.trim(),
        });
        let user = self.auth.sign_up(&email, &request.password, &metadata).await?;
        let new_profile = NewProfile {
            id: user.id,
            email: email.clone(),
            first_name: request.first_name.trim().to_string(),
            last_name: request.last_name.trim().to_string(),
            company: request.company.trim().to_string(),
            user_type: UserType::User,
            is_active: true,
        };
        let profile = match self.profiles.insert_profile(&new_profile).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(user = %user.id, "Profile insert failed; removing auth user: {}", e);
                if let Err(cleanup) = self.admin.admin_delete_user(user.id).await {
                    tracing::warn!(user = %user.id, "Failed to remove orphaned auth user: {}", cleanup);
                }
                return Err(e.into());
            }
        };
        tracing::info!(user = %profile.id, "Account created");

        self.notifier
            .send(
                &email,
                Notice::Welcome {
                    name: profile.display_name(),
                },
            )
            .await;
        Ok(profile)
    }

    pub async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        self.auth.sign_out(access_token).await?;
        Ok(())
    }

    /// Resolve a bearer token to an active profile.
    pub async fn current_user(&self, access_token: &str) -> Result<UserProfile, AuthError> {
        let user = self.auth.get_user(access_token).await?;
        let profile = self
            .profiles
            .get_profile(user.id)
            .await?
            .ok_or(AuthError::MissingProfile)?;
        if !profile.is_active {
            return Err(AuthError::AccountDeactivated);
        }
        Ok(profile)
    }

    pub async fn require_admin(&self, access_token: &str) -> Result<UserProfile, AuthError> {
        let profile = self.current_user(access_token).await?;
        if !profile.is_admin() {
            return Err(AuthError::AccessDenied);
        }
        Ok(profile)
    }

    /// Email a recovery link. Unknown addresses succeed silently so the
    /// endpoint cannot be used to probe for accounts.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email)?;
        match self.admin.admin_generate_recovery_link(&email).await {
            Ok(link) => {
                self.notifier
                    .send(&email, Notice::PasswordReset { link })
                    .await;
                Ok(())
            }
            Err(BackendError::NotFound { .. }) => {
                tracing::debug!("Password reset requested for unknown address");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::email::MemoryMailer;

    struct Harness {
        backend: Arc<MemoryBackend>,
        mailer: Arc<MemoryMailer>,
        auth: AuthService,
    }

    fn harness() -> Harness {
        let backend = Arc::new(MemoryBackend::new());
        let mailer = Arc::new(MemoryMailer::new());
        let notifier = Arc::new(
            Notifier::new(mailer.clone(), "http://localhost:3100", None).expect("notifier"),
        );
        let auth = AuthService::new(backend.clone(), backend.clone(), backend.clone(), notifier);
        Harness {
            backend,
            mailer,
            auth,
        }
    }

    #[tokio::test]
    async fn inactive_profile_blocks_sign_in_and_revokes_session() {
        let h = harness();
        h.backend
            .add_account("off@example.com", "password1", UserType::User, true);
        let profile = h
            .auth
            .sign_in("off@example.com", "password1")
            .await
            .expect("active sign in")
            .profile;
        h.backend
            .update_profile(
                profile.id,
                &crate::backend::ProfileUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .expect("deactivate");

        let err = h
            .auth
            .sign_in("off@example.com", "password1")
            .await
            .expect_err("inactive");
        assert!(matches!(err, AuthError::AccountDeactivated));
        assert!(err.to_string().contains("deactivated"));
    }

    #[tokio::test]
    async fn admin_sign_in_requires_admin_role() {
        let h = harness();
        h.backend
            .add_account("user@example.com", "password1", UserType::User, true);
        h.backend
            .add_account("boss@example.com", "password1", UserType::Admin, true);

        assert!(matches!(
            h.auth.admin_sign_in("user@example.com", "password1").await,
            Err(AuthError::AccessDenied)
        ));
        let admin = h
            .auth
            .admin_sign_in("boss@example.com", "password1")
            .await
            .expect("admin");
        let profile = h
            .auth
            .require_admin(&admin.session.access_token)
            .await
            .expect("still admin");
        assert!(profile.is_admin());
    }

    #[tokio::test]
    async fn sign_up_creates_active_user_profile_and_welcomes() {
        let h = harness();
        let profile = h
            .auth
            .sign_up(&SignUpRequest {
                email: " New@Example.com ".to_string(),
                password: "longenough".to_string(),
                first_name: "Nia".to_string(),
                last_name: "Park".to_string(),
                company: "Acme".to_string(),
            })
            .await
            .expect("sign up");
        assert!(profile.is_active);
        assert_eq!(profile.user_type, UserType::User);
        assert_eq!(profile.email, "new@example.com");

        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "new@example.com");
        assert!(sent[0].html.contains("Nia Park"));

        let signed_in = h
            .auth
            .sign_in("new@example.com", "longenough")
            .await
            .expect("sign in");
        assert_eq!(signed_in.profile.id, profile.id);
    }

    #[tokio::test]
    async fn sign_up_rejects_short_password_and_bad_email() {
        let h = harness();
        let short = SignUpRequest {
            email: "a@example.com".to_string(),
            password: "short".to_string(),
            first_name: String::new(),
            last_name: String::new(),
            company: String::new(),
        };
        assert!(matches!(
            h.auth.sign_up(&short).await,
            Err(AuthError::Validation(_))
        ));
        let bad = SignUpRequest {
            email: "not-an-email".to_string(),
            password: "longenough".to_string(),
            ..short
        };
        assert!(matches!(
            h.auth.sign_up(&bad).await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn password_reset_is_silent_for_unknown_addresses() {
        let h = harness();
        h.auth
            .request_password_reset("ghost@example.com")
            .await
            .expect("no error for unknown");
        assert!(h.mailer.sent().is_empty());

        h.backend
            .add_account("real@example.com", "password1", UserType::User, true);
        h.auth
            .request_password_reset("real@example.com")
            .await
            .expect("reset");
        assert_eq!(h.mailer.sent().len(), 1);
        assert!(h.mailer.sent()[0].html.contains("memory://recover"));
    }

    struct RejectingProfiles;

    #[async_trait::async_trait]
    impl ProfileStore for RejectingProfiles {
        async fn get_profile(&self, _id: uuid::Uuid) -> Result<Option<UserProfile>, BackendError> {
            Ok(None)
        }
        async fn list_profiles(&self) -> Result<Vec<UserProfile>, BackendError> {
            Ok(Vec::new())
        }
        async fn insert_profile(&self, _profile: &NewProfile) -> Result<UserProfile, BackendError> {
            Err(BackendError::Status {
                status: 500,
                message: "profiles table unavailable".to_string(),
            })
        }
        async fn update_profile(
            &self,
            id: uuid::Uuid,
            _update: &crate::backend::ProfileUpdate,
        ) -> Result<UserProfile, BackendError> {
            Err(BackendError::NotFound {
                entity: "profile",
                id: id.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn failed_profile_insert_removes_the_new_auth_user() {
        let backend = Arc::new(MemoryBackend::new());
        let mailer = Arc::new(MemoryMailer::new());
        let notifier = Arc::new(
            Notifier::new(mailer.clone(), "http://localhost:3100", None).expect("notifier"),
        );
        let auth = AuthService::new(
            backend.clone(),
            Arc::new(RejectingProfiles),
            backend.clone(),
            notifier,
        );
        let request = SignUpRequest {
            email: "new@example.com".to_string(),
            password: "long-enough".to_string(),
            first_name: "New".to_string(),
            last_name: "Person".to_string(),
            company: String::new(),
        };

        let err = auth.sign_up(&request).await.expect_err("profile insert fails");
        assert!(matches!(err, AuthError::Backend(BackendError::Status { status: 500, .. })));
        assert!(mailer.sent().is_empty());

        // No orphaned account: the credentials are unknown and the address is free.
        assert!(matches!(
            AuthProvider::sign_in(backend.as_ref(), "new@example.com", "long-enough").await,
            Err(AuthError::InvalidCredentials)
        ));
        AuthProvider::sign_up(
            backend.as_ref(),
            "new@example.com",
            "long-enough",
            &serde_json::json!({}),
        )
        .await
        .expect("address can be registered again");
    }

    #[tokio::test]
    async fn unknown_token_is_invalid_session() {
        let h = harness();
        assert!(matches!(
            h.auth.current_user("nope").await,
            Err(AuthError::InvalidSession)
        ));
    }
}
