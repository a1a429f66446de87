//! Admin console operations: advisor CRUD, user management and the
//! dashboard counters.
//!
//! Every action is a direct backend call. Advisor writes clear the filter
//! cache; notification emails never fail the action.

use std::sync::Arc;

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::advisor::cache::FilterCache;
use crate::advisor::filter::FilterState;
use crate::advisor::{Advisor, AdvisorDraft, AdvisorId, AdvisorPatch};
use crate::auth::normalize_email;
use crate::backend::{
    AdvisorPage, AdvisorQuery, Backend, NewProfile, ProfileUpdate, UserProfile, UserType,
};
use crate::config::is_plausible_email;
use crate::email::{Notice, Notifier};
use crate::error::{AdminError, BackendError};

const TEMP_PASSWORD_LEN: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub advisors: u64,
    pub users: usize,
    pub active_users: usize,
    pub inactive_users: usize,
    pub admins: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUserRequest {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub user_type: UserType,
}

/// Result of creating a user. The temporary password is only returned when
/// the invite email could not be delivered.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedUser {
    pub profile: UserProfile,
    pub invite_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporary_password: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub profile: UserProfile,
    pub email_sent: bool,
}

pub(crate) fn temporary_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TEMP_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

fn validate_contact(email: Option<&str>) -> Result<(), AdminError> {
    if let Some(email) = email
        && !email.trim().is_empty()
        && !is_plausible_email(email.trim())
    {
        return Err(AdminError::Validation(format!(
            "'{}' is not a valid email address",
            email.trim()
        )));
    }
    Ok(())
}

fn validate_draft(draft: &AdvisorDraft) -> Result<(), AdminError> {
    if draft.first_name.trim().is_empty() || draft.last_name.trim().is_empty() {
        return Err(AdminError::Validation(
            "First and last name are required".to_string(),
        ));
    }
    validate_contact(draft.email.as_deref())
}

fn validate_patch(patch: &AdvisorPatch) -> Result<(), AdminError> {
    if patch.is_empty() {
        return Err(AdminError::Validation("Nothing to update".to_string()));
    }
    let blank = |v: &Option<String>| v.as_deref().is_some_and(|s| s.trim().is_empty());
    if blank(&patch.first_name) || blank(&patch.last_name) {
        return Err(AdminError::Validation(
            "First and last name cannot be blank".to_string(),
        ));
    }
    validate_contact(patch.email.as_deref())
}

fn advisor_not_found(id: &AdvisorId) -> AdminError {
    AdminError::NotFound {
        entity: "advisor",
        id: id.to_string(),
    }
}

fn user_not_found(id: Uuid) -> AdminError {
    AdminError::NotFound {
        entity: "user",
        id: id.to_string(),
    }
}

/// Maps a backend "not found" onto the admin error of the same shape.
fn lift(err: BackendError) -> AdminError {
    match err {
        BackendError::NotFound { entity, id } => AdminError::NotFound { entity, id },
        other => AdminError::Backend(other),
    }
}

pub struct AdminService {
    backend: Backend,
    cache: Arc<FilterCache>,
    notifier: Arc<Notifier>,
}

impl AdminService {
    pub fn new(backend: Backend, cache: Arc<FilterCache>, notifier: Arc<Notifier>) -> Self {
        Self {
            backend,
            cache,
            notifier,
        }
    }

    pub async fn dashboard(&self) -> Result<DashboardStats, AdminError> {
        let all = FilterState::default();
        let (advisors, profiles) = futures::try_join!(
            self.backend.advisors.count_advisors(&all),
            self.backend.profiles.list_profiles(),
        )?;
        let active_users = profiles.iter().filter(|p| p.is_active).count();
        Ok(DashboardStats {
            advisors,
            users: profiles.len(),
            active_users,
            inactive_users: profiles.len() - active_users,
            admins: profiles.iter().filter(|p| p.is_admin()).count(),
        })
    }

    // ==================== Advisors ====================

    pub async fn list_advisors(
        &self,
        filter: FilterState,
        offset: usize,
        limit: usize,
    ) -> Result<AdvisorPage, AdminError> {
        let query = AdvisorQuery {
            filter: filter.normalized(),
            offset,
            limit: limit.max(1),
            with_count: true,
        };
        Ok(self.backend.advisors.query_advisors(&query).await?)
    }

    pub async fn get_advisor(&self, id: &AdvisorId) -> Result<Advisor, AdminError> {
        self.backend
            .advisors
            .get_advisor(id)
            .await?
            .ok_or_else(|| advisor_not_found(id))
    }

    pub async fn create_advisor(&self, draft: AdvisorDraft) -> Result<Advisor, AdminError> {
        let draft = draft.normalized();
        validate_draft(&draft)?;
        let advisor = self.backend.advisors.insert_advisor(&draft).await?;
        self.cache.clear();
        tracing::info!(advisor = ?advisor.id, "Advisor created");
        Ok(advisor)
    }

    pub async fn update_advisor(
        &self,
        id: &AdvisorId,
        patch: &AdvisorPatch,
    ) -> Result<Advisor, AdminError> {
        validate_patch(patch)?;
        let advisor = self
            .backend
            .advisors
            .update_advisor(id, patch)
            .await
            .map_err(lift)?;
        self.cache.clear();
        tracing::info!(advisor = %id, "Advisor updated");
        Ok(advisor)
    }

    pub async fn delete_advisor(&self, id: &AdvisorId) -> Result<(), AdminError> {
        if !self.backend.advisors.delete_advisor(id).await? {
            return Err(advisor_not_found(id));
        }
        self.cache.clear();
        tracing::info!(advisor = %id, "Advisor deleted");
        Ok(())
    }

    // ==================== Users ====================

    pub async fn list_users(&self) -> Result<Vec<UserProfile>, AdminError> {
        Ok(self.backend.profiles.list_profiles().await?)
    }

    async fn profile(&self, id: Uuid) -> Result<UserProfile, AdminError> {
        self.backend
            .profiles
            .get_profile(id)
            .await?
            .ok_or_else(|| user_not_found(id))
    }

    /// Create an auth user with a generated password plus an active profile,
    /// then send the invite. A failed profile insert removes the auth user.
    pub async fn create_user(&self, request: NewUserRequest) -> Result<CreatedUser, AdminError> {
        let email = normalize_email(&request.email)?;
        let password = temporary_password();
        let metadata = serde_json::json!({
            "first_name": request.first_name.trim(),
            "last_name": request.last_name.trim(),
            "company": request.company.trim(),
        });
        let user = self
            .backend
            .admin
            .admin_create_user(&email, &password, &metadata)
            .await?;

        let new_profile = NewProfile {
            id: user.id,
            email: email.clone(),
            first_name: request.first_name.trim().to_string(),
            last_name: request.last_name.trim().to_string(),
            company: request.company.trim().to_string(),
            user_type: request.user_type,
            is_active: true,
        };
        let profile = match self.backend.profiles.insert_profile(&new_profile).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(user = %user.id, "Profile insert failed; removing auth user: {}", e);
                if let Err(cleanup) = self.backend.admin.admin_delete_user(user.id).await {
                    tracing::warn!(user = %user.id, "Failed to remove orphaned auth user: {}", cleanup);
                }
                return Err(e.into());
            }
        };
        tracing::info!(user = %profile.id, user_type = profile.user_type.as_str(), "User created");

        let invite_sent = self
            .notifier
            .send(
                &email,
                Notice::AdminInvite {
                    name: profile.display_name(),
                    email: email.clone(),
                    temporary_password: password.clone(),
                },
            )
            .await;
        Ok(CreatedUser {
            profile,
            invite_sent,
            temporary_password: (!invite_sent).then_some(password),
        })
    }

    /// Edit profile fields. The active flag only changes through
    /// [`AdminService::set_active`].
    pub async fn update_user(
        &self,
        id: Uuid,
        update: ProfileUpdate,
    ) -> Result<UserProfile, AdminError> {
        let update = ProfileUpdate {
            is_active: None,
            ..update
        };
        if update.is_empty() {
            return Err(AdminError::Validation("Nothing to update".to_string()));
        }
        self.backend
            .profiles
            .update_profile(id, &update)
            .await
            .map_err(lift)
    }

    /// Flip the profile flag, mirror it as a backend ban, then email the
    /// user.
    pub async fn set_active(&self, id: Uuid, active: bool) -> Result<StatusChange, AdminError> {
        self.profile(id).await?;
        let profile = self
            .backend
            .profiles
            .update_profile(
                id,
                &ProfileUpdate {
                    is_active: Some(active),
                    ..Default::default()
                },
            )
            .await
            .map_err(lift)?;
        if let Err(e) = self.backend.admin.admin_set_banned(id, !active).await {
            tracing::warn!(user = %id, active, "Backend ban state not updated: {}", e);
        }
        tracing::info!(user = %id, active, "User status changed");

        let name = profile.display_name();
        let notice = if active {
            Notice::AccountActivated { name }
        } else {
            Notice::AccountDeactivated { name }
        };
        let email_sent = self.notifier.send(&profile.email, notice).await;
        Ok(StatusChange {
            profile,
            email_sent,
        })
    }

    /// Email the user a recovery link. Returns whether the email went out.
    pub async fn reset_password(&self, id: Uuid) -> Result<bool, AdminError> {
        let profile = self.profile(id).await?;
        let link = self
            .backend
            .admin
            .admin_generate_recovery_link(&profile.email)
            .await
            .map_err(lift)?;
        Ok(self
            .notifier
            .send(&profile.email, Notice::PasswordReset { link })
            .await)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::advisor::sample_advisor;
    use crate::backend::AuthProvider;
    use crate::backend::memory::MemoryBackend;
    use crate::email::MemoryMailer;
    use crate::error::AuthError;

    struct Harness {
        backend: Arc<MemoryBackend>,
        mailer: Arc<MemoryMailer>,
        cache: Arc<FilterCache>,
        admin: AdminService,
    }

    fn harness_with(mailer: MemoryMailer) -> Harness {
        let backend = Arc::new(MemoryBackend::new());
        let mailer = Arc::new(mailer);
        let cache = Arc::new(FilterCache::new(8));
        let notifier =
            Arc::new(Notifier::new(mailer.clone(), "http://localhost", None).expect("notifier"));
        let admin = AdminService::new(Backend::from_single(backend.clone()), cache.clone(), notifier);
        Harness {
            backend,
            mailer,
            cache,
            admin,
        }
    }

    fn harness() -> Harness {
        harness_with(MemoryMailer::new())
    }

    #[test]
    fn temporary_passwords_are_long_and_alphanumeric() {
        let a = temporary_password();
        assert_eq!(a.len(), TEMP_PASSWORD_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, temporary_password());
    }

    #[tokio::test]
    async fn deactivation_blocks_sign_in_and_emails_user() {
        let h = harness();
        let profile = h
            .backend
            .add_account("ann@example.com", "password1", UserType::User, true);

        let change = h.admin.set_active(profile.id, false).await.expect("deactivate");
        assert!(!change.profile.is_active);
        assert!(change.email_sent);
        assert!(h.backend.is_banned(profile.id));
        assert!(matches!(
            h.backend.sign_in("ann@example.com", "password1").await,
            Err(AuthError::AccountDeactivated)
        ));
        assert_eq!(
            h.mailer.sent()[0].subject,
            "Your account has been deactivated"
        );

        h.admin.set_active(profile.id, true).await.expect("activate");
        assert!(!h.backend.is_banned(profile.id));
        assert!(h.backend.sign_in("ann@example.com", "password1").await.is_ok());
    }

    #[tokio::test]
    async fn advisor_writes_clear_the_filter_cache() {
        let h = harness();
        let filter = FilterState {
            provinces: BTreeSet::from(["Ontario".to_string()]),
            ..Default::default()
        };
        let epoch = h.cache.epoch();
        h.cache
            .insert_if_current(epoch, filter.key(), Arc::new(Vec::new()));
        assert_eq!(h.cache.len(), 1);

        let created = h
            .admin
            .create_advisor(AdvisorDraft {
                first_name: " Jane ".to_string(),
                last_name: "Smith".to_string(),
                province: "Ontario".to_string(),
                email: Some("jane@example.com".to_string()),
                ..Default::default()
            })
            .await
            .expect("create");
        assert_eq!(created.first_name, "Jane");
        assert!(h.cache.is_empty());

        let id = created.id.clone().expect("id assigned");
        let updated = h
            .admin
            .update_advisor(
                &id,
                &AdvisorPatch {
                    city: Some("Ottawa".to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect("update");
        assert_eq!(updated.city, "Ottawa");

        h.admin.delete_advisor(&id).await.expect("delete");
        assert!(matches!(
            h.admin.get_advisor(&id).await,
            Err(AdminError::NotFound { .. })
        ));
        assert!(matches!(
            h.admin.delete_advisor(&id).await,
            Err(AdminError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn advisor_validation_rejects_missing_names_and_bad_email() {
        let h = harness();
        let missing = AdvisorDraft {
            first_name: "Jane".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            h.admin.create_advisor(missing).await,
            Err(AdminError::Validation(_))
        ));
        let bad_email = AdvisorDraft {
            first_name: "Jane".to_string(),
            last_name: "Smith".to_string(),
            email: Some("jane at example".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            h.admin.create_advisor(bad_email).await,
            Err(AdminError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn created_user_can_sign_in_with_the_invited_password() {
        let h = harness();
        let created = h
            .admin
            .create_user(NewUserRequest {
                email: "new@example.com".to_string(),
                first_name: "New".to_string(),
                last_name: "Person".to_string(),
                company: String::new(),
                user_type: UserType::Admin,
            })
            .await
            .expect("create user");
        assert!(created.invite_sent);
        assert!(created.temporary_password.is_none());
        assert_eq!(created.profile.user_type, UserType::Admin);

        let invite = &h.mailer.sent()[0];
        let password = invite
            .html
            .split("<code>")
            .nth(1)
            .and_then(|rest| rest.split("</code>").next())
            .expect("password in invite")
            .to_string();
        assert!(
            h.backend
                .sign_in("new@example.com", &password)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn undelivered_invite_returns_the_password() {
        let h = harness_with(MemoryMailer::failing());
        let created = h
            .admin
            .create_user(NewUserRequest {
                email: "quiet@example.com".to_string(),
                first_name: String::new(),
                last_name: String::new(),
                company: String::new(),
                user_type: UserType::User,
            })
            .await
            .expect("create user despite email failure");
        assert!(!created.invite_sent);
        let password = created.temporary_password.expect("password returned");
        assert!(
            h.backend
                .sign_in("quiet@example.com", &password)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn dashboard_counts_users_by_state_and_role() {
        let h = harness();
        h.backend.seed_advisors([
            sample_advisor("A", "One", None),
            sample_advisor("B", "Two", None),
        ]);
        h.backend
            .add_account("a@example.com", "password1", UserType::Admin, true);
        h.backend
            .add_account("b@example.com", "password1", UserType::User, true);
        h.backend
            .add_account("c@example.com", "password1", UserType::User, false);

        let stats = h.admin.dashboard().await.expect("dashboard");
        assert_eq!(
            stats,
            DashboardStats {
                advisors: 2,
                users: 3,
                active_users: 2,
                inactive_users: 1,
                admins: 1,
            }
        );
    }

    #[tokio::test]
    async fn update_user_ignores_active_flag() {
        let h = harness();
        let profile = h
            .backend
            .add_account("d@example.com", "password1", UserType::User, true);
        let updated = h
            .admin
            .update_user(
                profile.id,
                ProfileUpdate {
                    company: Some("Acme".to_string()),
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .expect("update");
        assert_eq!(updated.company, "Acme");
        assert!(updated.is_active);

        assert!(matches!(
            h.admin
                .update_user(
                    profile.id,
                    ProfileUpdate {
                        is_active: Some(false),
                        ..Default::default()
                    }
                )
                .await,
            Err(AdminError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.admin.set_active(Uuid::new_v4(), false).await,
            Err(AdminError::NotFound { entity: "user", .. })
        ));
        assert!(matches!(
            h.admin.reset_password(Uuid::new_v4()).await,
            Err(AdminError::NotFound { .. })
        ));
    }
}
