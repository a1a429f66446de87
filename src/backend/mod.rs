//! Backend abstraction layer.
//!
//! The hosted backend provides advisor/profile tables and session auth. Each
//! concern is a sub-trait so consumers depend only on what they use:
//!
//! - [`AdvisorStore`]: the `advisors` table
//! - [`ProfileStore`]: the `user_profiles` table
//! - [`AuthProvider`]: password sessions
//! - [`AdminAuthProvider`]: privileged user management (service key)
//!
//! Implementations:
//!
//! - `rest` (default): PostgREST tables + GoTrue auth over HTTP
//! - `memory`: process-local, for tests and demos
//! - `postgres` (feature): direct table access; auth still over HTTP

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod rest;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::advisor::filter::FilterState;
use crate::advisor::{Advisor, AdvisorDraft, AdvisorId, AdvisorPatch};
use crate::config::{BackendConfig, TableBackend};
use crate::error::{AuthError, BackendError};

/// Windowed advisor query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvisorQuery {
    pub filter: FilterState,
    pub offset: usize,
    pub limit: usize,
    /// Ask the backend for the total match count as well.
    pub with_count: bool,
}

impl AdvisorQuery {
    pub fn first_page(filter: FilterState, limit: usize) -> Self {
        Self {
            filter,
            offset: 0,
            limit,
            with_count: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdvisorPage {
    pub rows: Vec<Advisor>,
    /// Present when the query asked for a count.
    pub total: Option<u64>,
}

/// Columns that feed the filter dropdowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionColumn {
    Province,
    City,
    Firm,
    Team,
}

impl OptionColumn {
    pub fn column(self) -> &'static str {
        match self {
            Self::Province => "province",
            Self::City => "city",
            Self::Firm => "firm",
            Self::Team => "team_name",
        }
    }

    pub fn value(self, advisor: &Advisor) -> &str {
        match self {
            Self::Province => &advisor.province,
            Self::City => &advisor.city,
            Self::Firm => &advisor.firm,
            Self::Team => &advisor.team_name,
        }
    }
}

/// Application role stored on the profile row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Admin,
    #[default]
    User,
}

impl UserType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }

    /// Only an exact `admin` grants admin; anything else is a regular user.
    pub fn from_db_value(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("admin") {
            Self::Admin
        } else {
            Self::User
        }
    }
}

/// Raw profile row. Older rows carry a `status` text column instead of
/// `is_active`; both are folded into one flag.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ProfileRow {
    pub(crate) id: Uuid,
    #[serde(default)]
    pub(crate) email: Option<String>,
    #[serde(default)]
    pub(crate) first_name: Option<String>,
    #[serde(default)]
    pub(crate) last_name: Option<String>,
    #[serde(default)]
    pub(crate) company: Option<String>,
    #[serde(default, alias = "role")]
    pub(crate) user_type: Option<String>,
    #[serde(default)]
    pub(crate) is_active: Option<bool>,
    #[serde(default)]
    pub(crate) status: Option<String>,
    #[serde(default)]
    pub(crate) created_at: Option<DateTime<Utc>>,
}

/// Application profile for an authenticated account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ProfileRow")]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub company: String,
    pub user_type: UserType,
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<ProfileRow> for UserProfile {
    fn from(row: ProfileRow) -> Self {
        let status_inactive = row
            .status
            .as_deref()
            .is_some_and(|s| {
                matches!(
                    s.trim().to_ascii_lowercase().as_str(),
                    "inactive" | "deactivated" | "disabled"
                )
            });
        Self {
            id: row.id,
            email: row.email.unwrap_or_default(),
            first_name: row.first_name.unwrap_or_default(),
            last_name: row.last_name.unwrap_or_default(),
            company: row.company.unwrap_or_default(),
            user_type: row
                .user_type
                .as_deref()
                .map(UserType::from_db_value)
                .unwrap_or_default(),
            is_active: row.is_active.unwrap_or(!status_inactive) && !status_inactive,
            created_at: row.created_at,
        }
    }
}

impl UserProfile {
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.email.clone()
        } else {
            name.to_string()
        }
    }

    pub fn is_admin(&self) -> bool {
        self.user_type == UserType::Admin
    }
}

/// Row inserted at sign-up or by an admin.
#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub company: String,
    pub user_type: UserType,
    pub is_active: bool,
}

impl NewProfile {
    pub fn into_profile(self, created_at: Option<DateTime<Utc>>) -> UserProfile {
        UserProfile {
            id: self.id,
            email: self.email,
            first_name: self.first_name,
            last_name: self.last_name,
            company: self.company,
            user_type: self.user_type,
            is_active: self.is_active,
            created_at,
        }
    }
}

/// Partial profile update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<UserType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.company.is_none()
            && self.user_type.is_none()
            && self.is_active.is_none()
    }

    pub fn apply_to(&self, profile: &mut UserProfile) {
        if let Some(ref v) = self.first_name {
            profile.first_name = v.trim().to_string();
        }
        if let Some(ref v) = self.last_name {
            profile.last_name = v.trim().to_string();
        }
        if let Some(ref v) = self.company {
            profile.company = v.trim().to_string();
        }
        if let Some(v) = self.user_type {
            profile.user_type = v;
        }
        if let Some(v) = self.is_active {
            profile.is_active = v;
        }
    }
}

/// Identity returned by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub user: AuthUser,
}

// ==================== Sub-traits ====================

#[async_trait]
pub trait AdvisorStore: Send + Sync {
    async fn query_advisors(&self, query: &AdvisorQuery) -> Result<AdvisorPage, BackendError>;
    async fn count_advisors(&self, filter: &FilterState) -> Result<u64, BackendError>;
    /// Sorted distinct non-empty values of a filter column.
    async fn distinct_values(&self, column: OptionColumn) -> Result<Vec<String>, BackendError>;
    async fn get_advisor(&self, id: &AdvisorId) -> Result<Option<Advisor>, BackendError>;
    async fn insert_advisor(&self, draft: &AdvisorDraft) -> Result<Advisor, BackendError>;
    async fn update_advisor(
        &self,
        id: &AdvisorId,
        patch: &AdvisorPatch,
    ) -> Result<Advisor, BackendError>;
    /// Returns whether a row was deleted.
    async fn delete_advisor(&self, id: &AdvisorId) -> Result<bool, BackendError>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, id: Uuid) -> Result<Option<UserProfile>, BackendError>;
    async fn list_profiles(&self) -> Result<Vec<UserProfile>, BackendError>;
    async fn insert_profile(&self, profile: &NewProfile) -> Result<UserProfile, BackendError>;
    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<UserProfile, BackendError>;
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Verify credentials. Banned accounts fail with
    /// [`AuthError::AccountDeactivated`].
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError>;
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &serde_json::Value,
    ) -> Result<AuthUser, AuthError>;
    async fn sign_out(&self, access_token: &str) -> Result<(), BackendError>;
    /// Resolve the user behind an access token.
    async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthError>;
}

#[async_trait]
pub trait AdminAuthProvider: Send + Sync {
    async fn admin_create_user(
        &self,
        email: &str,
        password: &str,
        metadata: &serde_json::Value,
    ) -> Result<AuthUser, BackendError>;
    async fn admin_list_users(&self) -> Result<Vec<AuthUser>, BackendError>;
    async fn admin_set_banned(&self, user_id: Uuid, banned: bool) -> Result<(), BackendError>;
    async fn admin_delete_user(&self, user_id: Uuid) -> Result<(), BackendError>;
    /// Create a password-recovery link. Unknown emails yield `NotFound`.
    async fn admin_generate_recovery_link(&self, email: &str) -> Result<String, BackendError>;
}

/// Configured handles to every backend concern.
#[derive(Clone)]
pub struct Backend {
    pub advisors: Arc<dyn AdvisorStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub admin: Arc<dyn AdminAuthProvider>,
}

impl Backend {
    /// Use one implementation for every concern.
    pub fn from_single<B>(backend: Arc<B>) -> Self
    where
        B: AdvisorStore + ProfileStore + AuthProvider + AdminAuthProvider + 'static,
    {
        Self {
            advisors: backend.clone(),
            profiles: backend.clone(),
            auth: backend.clone(),
            admin: backend,
        }
    }
}

/// Build the backend described by `config`.
pub async fn connect_from_config(config: &BackendConfig) -> Result<Backend, BackendError> {
    match config.kind {
        TableBackend::Memory => {
            let backend = memory::MemoryBackend::new();
            if let Some(ref path) = config.seed_path {
                let loaded = backend.seed_from_file(path).await?;
                tracing::info!("Seeded in-memory backend with {} advisors from {}", loaded, path);
            }
            Ok(Backend::from_single(Arc::new(backend)))
        }
        TableBackend::Rest => {
            let rest = rest::RestBackend::new(config)?;
            Ok(Backend::from_single(Arc::new(rest)))
        }
        #[cfg(feature = "postgres")]
        TableBackend::Postgres => {
            let rest = Arc::new(rest::RestBackend::new(config)?);
            let pg = Arc::new(postgres::PgTables::new(config).await?);
            pg.run_migrations().await?;
            Ok(Backend {
                advisors: pg.clone(),
                profiles: pg,
                auth: rest.clone(),
                admin: rest,
            })
        }
        #[cfg(not(feature = "postgres"))]
        TableBackend::Postgres => Err(BackendError::Unsupported(
            "the 'postgres' backend requires building with the 'postgres' feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_adapter_folds_status_column() {
        let legacy: UserProfile = serde_json::from_value(serde_json::json!({
            "id": "6f1c6f0e-2f5f-4a63-9d1c-0d4f7d2b8e11",
            "email": "ann@example.com",
            "role": "Admin",
            "status": "inactive"
        }))
        .expect("decode");
        assert!(!legacy.is_active);
        assert_eq!(legacy.user_type, UserType::Admin);

        let modern: UserProfile = serde_json::from_value(serde_json::json!({
            "id": "6f1c6f0e-2f5f-4a63-9d1c-0d4f7d2b8e11",
            "user_type": "user",
            "is_active": true
        }))
        .expect("decode");
        assert!(modern.is_active);
        assert_eq!(modern.email, "");

        let defaulted: UserProfile = serde_json::from_value(serde_json::json!({
            "id": "6f1c6f0e-2f5f-4a63-9d1c-0d4f7d2b8e11"
        }))
        .expect("decode");
        assert!(defaulted.is_active);
        assert_eq!(defaulted.user_type, UserType::User);
    }

    #[test]
    fn only_exact_admin_grants_admin() {
        assert_eq!(UserType::from_db_value(" admin "), UserType::Admin);
        assert_eq!(UserType::from_db_value("administrator"), UserType::User);
        assert_eq!(UserType::from_db_value(""), UserType::User);
    }

    #[test]
    fn profile_update_applies_only_present_fields() {
        let mut profile = NewProfile {
            id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            first_name: "Ann".to_string(),
            last_name: "Lee".to_string(),
            company: "Old Co".to_string(),
            user_type: UserType::User,
            is_active: true,
        }
        .into_profile(None);
        ProfileUpdate {
            company: Some(" New Co ".to_string()),
            is_active: Some(false),
            ..Default::default()
        }
        .apply_to(&mut profile);
        assert_eq!(profile.company, "New Co");
        assert!(!profile.is_active);
        assert_eq!(profile.first_name, "Ann");
        assert_eq!(profile.display_name(), "Ann Lee");
    }
}
